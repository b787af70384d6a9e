//! Core domain entities: order book replicas and tracked orders.

pub mod order;
pub mod orderbook;

pub use order::{OrderState, TrackedOrder};
pub use orderbook::{BookError, BookSide, OrderBookReplica, PriceLevel, Side};
