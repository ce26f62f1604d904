//! Shared HTTP plumbing for the quote provider adapters.

use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::domain::error::StockbookError;

pub const USER_AGENT: &str = concat!("stockbook/", env!("CARGO_PKG_VERSION"));

/// A client with a request timeout; one per adapter.
pub fn build_client(timeout: Duration) -> Result<Client, StockbookError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| StockbookError::provider("http", format!("failed to build client: {e}")))
}

pub(crate) fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// GET `url` with `query` and decode a JSON body of type `T`.
///
/// Transport failures, non-2xx statuses and undecodable bodies all become
/// `Provider` errors tagged with `source_name`.
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    source_name: &str,
    url: &str,
    query: &[(&str, &str)],
) -> Result<T, StockbookError> {
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| StockbookError::provider(source_name, format!("request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| StockbookError::provider(source_name, format!("failed to read body: {e}")))?;
    debug!(
        source = source_name,
        %status,
        body = truncate(&body, 512),
        "provider response"
    );
    if !status.is_success() {
        return Err(StockbookError::provider(
            source_name,
            format!("responded with status {status}: {}", truncate(&body, 256)),
        ));
    }

    serde_json::from_str(&body).map_err(|e| {
        StockbookError::provider(
            source_name,
            format!(
                "failed to parse response: {e} (body snippet: {})",
                truncate(&body, 256)
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn user_agent_names_the_crate() {
        assert!(USER_AGENT.starts_with("stockbook/"));
    }
}
