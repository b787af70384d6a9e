//! Reorder planning
//!
//! After a batch of cancellations empties an asset's resting orders, the
//! cancelled size is requoted as two clips below the best bid. Planning
//! is pure; submission happens elsewhere. A per-asset single-flight set
//! guarantees a second trigger during an in-progress reorder is a no-op.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::engine::decision::MarketParams;

/// One replacement order to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clip {
    pub price: Decimal,
    pub size: Decimal,
}

/// Split knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ReorderParams {
    /// Fractions of the cancelled size per clip, in clip order. Must sum
    /// to 1.
    #[serde(default = "default_split_fractions")]
    pub split_fractions: Vec<Decimal>,
}

fn default_split_fractions() -> Vec<Decimal> {
    vec![
        Decimal::new(3, 1), // 0.3
        Decimal::new(7, 1), // 0.7
    ]
}

impl Default for ReorderParams {
    fn default() -> Self {
        Self {
            split_fractions: default_split_fractions(),
        }
    }
}

/// Plan replacement clips for a cancelled total size.
///
/// Clip k (1-based) is priced at `best_bid - k * tick_size`, clamped up
/// to `best_bid - max_incentive_spread` so no clip leaves the incentive
/// band.
pub fn plan_reorder(
    total_size: Decimal,
    best_bid: Decimal,
    market: &MarketParams,
    params: &ReorderParams,
) -> Vec<Clip> {
    if total_size <= Decimal::ZERO {
        return Vec::new();
    }
    let price_floor = best_bid - market.max_incentive_spread;

    params
        .split_fractions
        .iter()
        .enumerate()
        .map(|(i, fraction)| {
            let k = Decimal::from(i as u64 + 1);
            let mut price = best_bid - k * market.tick_size;
            if price < price_floor {
                price = price_floor;
            }
            let mut size = total_size * fraction;
            if market.min_order_size > Decimal::ZERO && size < market.min_order_size {
                size = market.min_order_size;
            }
            Clip { price, size }
        })
        .collect()
}

/// Per-asset single-flight registry. `begin` hands out a guard whose
/// drop releases the slot; a second `begin` for the same asset while a
/// guard lives returns `None`.
#[derive(Default)]
pub struct InFlightReorders {
    assets: Arc<Mutex<HashSet<String>>>,
}

impl InFlightReorders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, asset_id: &str) -> Option<ReorderGuard> {
        let mut assets = self.assets.lock();
        if !assets.insert(asset_id.to_string()) {
            return None;
        }
        Some(ReorderGuard {
            assets: Arc::clone(&self.assets),
            asset_id: asset_id.to_string(),
        })
    }

    pub fn is_in_flight(&self, asset_id: &str) -> bool {
        self.assets.lock().contains(asset_id)
    }
}

pub struct ReorderGuard {
    assets: Arc<Mutex<HashSet<String>>>,
    asset_id: String,
}

impl Drop for ReorderGuard {
    fn drop(&mut self) {
        self.assets.lock().remove(&self.asset_id);
    }
}
