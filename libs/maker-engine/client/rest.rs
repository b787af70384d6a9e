//! CLOB REST client
//!
//! Thin reqwest wrapper implementing [`OrderApi`] and [`ScoringOracle`].
//! Signing and auth headers come from the credentials in config; the
//! engine never looks inside them.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{info, warn};

use super::types::{
    CancelOrdersRequest, CancelOrdersResponse, NewOrderRequest, NewOrderResponse, OpenOrderDto,
    ScoringRequest,
};
use super::{ApiError, CancelOutcome, NewOrder, OpenOrder, OrderApi, ScoringOracle};
use crate::config::ApiConfig;

pub struct ClobClient {
    http: reqwest::Client,
    base_url: String,
}

impl ClobClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = &config.api_key {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(key) {
                headers.insert("POLY-API-KEY", value);
            }
        }
        if let Some(passphrase) = &config.api_passphrase {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(passphrase) {
                headers.insert("POLY-PASSPHRASE", value);
            }
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn rejection(response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ApiError::Rejected { status, body }
    }
}

#[async_trait]
impl OrderApi for ClobClient {
    async fn submit_order(&self, order: &NewOrder) -> Result<String, ApiError> {
        let request = NewOrderRequest {
            asset_id: order.asset_id.clone(),
            side: order.side.as_wire().to_string(),
            price: order.price,
            size: order.size,
        };

        let response = self
            .http
            .post(self.url("/order"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let parsed: NewOrderResponse = response.json().await?;
        info!(
            "[Clob] Submitted {} {} @ {} on {}: id {}",
            order.side, order.size, order.price, order.asset_id, parsed.order_id
        );
        Ok(parsed.order_id)
    }

    async fn cancel_orders(&self, order_ids: &[String]) -> Result<CancelOutcome, ApiError> {
        if order_ids.is_empty() {
            return Ok(CancelOutcome::default());
        }

        let request = CancelOrdersRequest {
            order_ids: order_ids.to_vec(),
        };
        let response = self
            .http
            .delete(self.url("/orders"))
            .json(&request)
            .send()
            .await?;

        // An order that no longer exists cannot be cancelled; the race
        // with a fill is benign and counts as done.
        if response.status() == StatusCode::NOT_FOUND {
            info!("[Clob] Cancel targeted already-closed orders, treating as done");
            return Ok(CancelOutcome {
                cancelled: Vec::new(),
                already_closed: order_ids.to_vec(),
            });
        }
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let parsed: CancelOrdersResponse = response.json().await.unwrap_or_default();
        for (id, reason) in &parsed.not_canceled {
            warn!("[Clob] Order {} not cancelled: {}", id, reason);
        }
        info!("[Clob] Cancelled {} orders", parsed.canceled.len());
        Ok(CancelOutcome {
            cancelled: parsed.canceled,
            already_closed: parsed.not_canceled.into_keys().collect(),
        })
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ApiError> {
        let response = self.http.get(self.url("/data/orders")).send().await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let orders: Vec<OpenOrderDto> = response.json().await?;
        Ok(orders.into_iter().map(OpenOrder::from).collect())
    }
}

#[async_trait]
impl ScoringOracle for ClobClient {
    async fn are_orders_scoring(
        &self,
        order_ids: &[String],
    ) -> Result<HashMap<String, bool>, ApiError> {
        if order_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let request = ScoringRequest {
            order_ids: order_ids.to_vec(),
        };
        let response = self
            .http
            .post(self.url("/orders-scoring"))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let scoring: HashMap<String, bool> = response.json().await?;
        Ok(scoring)
    }
}
