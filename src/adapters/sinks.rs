//! Price change event sinks.

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::domain::price_event::PriceChangeEvent;
use crate::ports::event_sink::EventSink;

/// Fans events out to any number of subscribers. Slow subscribers lose the
/// oldest events once `capacity` is exceeded.
pub struct BroadcastSink {
    tx: broadcast::Sender<PriceChangeEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PriceChangeEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &PriceChangeEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!(symbol = %event.symbol, "no subscribers for price change");
        }
    }
}

/// Writes each event to the log. Refreshes that left the price where it
/// was are logged at debug level.
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &PriceChangeEvent) {
        if event.is_unchanged() {
            debug!(symbol = %event.symbol, price = %event.new_price, "price unchanged");
            return;
        }
        info!(
            symbol = %event.symbol,
            price = %event.new_price,
            previous = ?event.previous_price,
            delta = %event.delta,
            delta_percent = %event.delta_percent,
            "price changed"
        );
    }
}
