//! Maker engine
//!
//! Keeps local order book replicas in sync with the CLOB market feed and
//! decides when resting maker orders must be cancelled and requoted to
//! stay reward-eligible.

pub mod client;
pub mod config;
pub mod domain;
pub mod engine;
pub mod feed;
pub mod utils;

pub use client::{
    ApiError, CancelOutcome, ClobClient, NewOrder, OpenOrder, OrderApi, ScoringOracle,
};
pub use config::{ConfigError, MakerConfig};
pub use domain::{OrderBookReplica, PriceLevel, Side, TrackedOrder};
pub use engine::MakerEngine;
pub use utils::{init_tracing, ShutdownManager};
