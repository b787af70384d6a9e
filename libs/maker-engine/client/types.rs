//! REST wire types
//!
//! The exchange speaks decimal strings for every price and size;
//! `Decimal`'s serde support parses either strings or numbers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OpenOrder;

#[derive(Debug, Serialize)]
pub struct NewOrderRequest {
    pub asset_id: String,
    pub side: String,
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct NewOrderResponse {
    #[serde(alias = "orderID", alias = "orderId")]
    pub order_id: String,
    #[serde(default)]
    pub success: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CancelOrdersRequest {
    pub order_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelOrdersResponse {
    #[serde(default)]
    pub canceled: Vec<String>,
    /// Order id to failure reason. An already-closed order shows up
    /// here; that still counts as done.
    #[serde(default)]
    pub not_canceled: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenOrderDto {
    pub id: String,
    pub asset_id: String,
    pub side: String,
    pub price: Decimal,
    pub original_size: Decimal,
    #[serde(default)]
    pub size_matched: Decimal,
}

impl From<OpenOrderDto> for OpenOrder {
    fn from(dto: OpenOrderDto) -> Self {
        OpenOrder {
            order_id: dto.id,
            asset_id: dto.asset_id,
            side: dto.side,
            price: dto.price,
            original_size: dto.original_size,
            size_matched: dto.size_matched,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScoringRequest {
    pub order_ids: Vec<String>,
}
