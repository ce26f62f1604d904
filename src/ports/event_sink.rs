//! Price change fan-out port.

use crate::domain::price_event::PriceChangeEvent;

/// Receives committed price changes. Delivery is best effort: a sink must
/// not fail the refresh that produced the event.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &PriceChangeEvent);
}
