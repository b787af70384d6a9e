//! Market data feed
//!
//! WebSocket connectivity to the CLOB market channel: a supervised
//! connection with exponential backoff, wire message parsing, and
//! subscription bookkeeping.

pub mod connection;
pub mod messages;
pub mod subscriptions;

use std::time::Duration;
use thiserror::Error;

pub use connection::{reconnect_delay, ConnectionState, FeedConnection, FeedHandle};
pub use messages::{
    parse_frame, BookEvent, FeedEvent, LastTradePriceEvent, LevelChange, PriceChangeEvent,
    SubscribeFrame,
};
pub use subscriptions::SubscriptionManager;

/// Everything consumers see from the feed. `Connected` fires once per
/// successful handshake, `Disconnected` once per teardown, and events
/// only flow in between.
#[derive(Debug)]
pub enum FeedUpdate {
    Connected,
    Disconnected,
    Event(FeedEvent),
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("feed connection is shut down")]
    Shutdown,

    #[error("subscriptions not acknowledged within {0:?}")]
    ReadinessTimeout(Duration),
}
