//! Port traits: the seams between domain logic and the outside world.

pub mod config_port;
pub mod event_sink;
pub mod price_source;
pub mod store;
