//! Exchange-facing collaborators
//!
//! Order submission, cancellation, open-order listing and the reward
//! scoring oracle, behind async traits so the engine can be driven by
//! fakes in tests.

pub mod rest;
pub mod types;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::orderbook::Side;

pub use rest::ClobClient;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A replacement order to submit.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub asset_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// One open order as the exchange reports it.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub asset_id: String,
    pub side: String,
    pub price: Decimal,
    pub original_size: Decimal,
    pub size_matched: Decimal,
}

impl OpenOrder {
    pub fn remaining_size(&self) -> Decimal {
        self.original_size - self.size_matched
    }
}

/// Result of a batch cancel. Orders that were already closed when the
/// cancel landed count as done, not as failures.
#[derive(Debug, Clone, Default)]
pub struct CancelOutcome {
    pub cancelled: Vec<String>,
    pub already_closed: Vec<String>,
}

/// Order placement and lifecycle operations. At-least-once; idempotent
/// per order id.
#[async_trait]
pub trait OrderApi: Send + Sync {
    /// Submit one limit order. Returns the exchange-assigned order id.
    async fn submit_order(&self, order: &NewOrder) -> Result<String, ApiError>;

    /// Cancel a batch of orders. A cancel racing a fill or targeting an
    /// already-closed order is a success, not an error.
    async fn cancel_orders(&self, order_ids: &[String]) -> Result<CancelOutcome, ApiError>;

    /// Authoritative list of our open orders.
    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ApiError>;
}

/// Reward-eligibility oracle.
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    /// Whether each order currently counts toward liquidity rewards.
    async fn are_orders_scoring(
        &self,
        order_ids: &[String],
    ) -> Result<HashMap<String, bool>, ApiError>;
}
