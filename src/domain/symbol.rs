//! Ticker symbol rules and the well-known company table.

/// Normalise user input: trim and uppercase.
pub fn normalize(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Format accepted by the quote providers: 1-5 uppercase ASCII letters.
pub fn is_quote_symbol(symbol: &str) -> bool {
    (1..=5).contains(&symbol.len()) && symbol.bytes().all(|b| b.is_ascii_uppercase())
}

/// Format accepted for a stored instrument: 1-10 uppercase alphanumerics.
pub fn is_instrument_symbol(symbol: &str) -> bool {
    (1..=10).contains(&symbol.len())
        && symbol
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Commonly traded symbols with their company names.
pub const WELL_KNOWN: &[(&str, &str)] = &[
    ("AAPL", "Apple Inc."),
    ("MSFT", "Microsoft Corporation"),
    ("GOOGL", "Alphabet Inc."),
    ("AMZN", "Amazon.com Inc."),
    ("TSLA", "Tesla Inc."),
    ("META", "Meta Platforms Inc."),
    ("NVDA", "NVIDIA Corporation"),
    ("JPM", "JPMorgan Chase & Co."),
    ("JNJ", "Johnson & Johnson"),
    ("V", "Visa Inc."),
    ("PG", "Procter & Gamble Co."),
    ("HD", "Home Depot Inc."),
    ("UNH", "UnitedHealth Group Inc."),
    ("BAC", "Bank of America Corp."),
    ("MA", "Mastercard Inc."),
    ("DIS", "Walt Disney Co."),
    ("ADBE", "Adobe Inc."),
    ("NFLX", "Netflix Inc."),
    ("CRM", "Salesforce Inc."),
    ("XOM", "Exxon Mobil Corp."),
];

/// Company name for `symbol`, falling back to "<SYMBOL> Corporation".
pub fn company_name(symbol: &str) -> String {
    let symbol = normalize(symbol);
    WELL_KNOWN
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("{symbol} Corporation"))
}
