//! Order book domain entities
//!
//! Per-asset local mirror of bids/asks, built from a full snapshot plus
//! incremental deltas. Prices and sizes are exact decimals keyed in a
//! `BTreeMap`, so level lookup never depends on float tolerance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum BookError {
    /// A delta arrived before the first snapshot (or after the replica
    /// was marked stale by a disconnect). The delta must be discarded
    /// and a fresh snapshot requested.
    #[error("stale replica for asset {0}: delta discarded, snapshot required")]
    StaleReplica(String),

    #[error("unknown side: {0}")]
    UnknownSide(String),
}

// =============================================================================
// Side and PriceLevel
// =============================================================================

/// One side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Parse the wire representation ("BUY"/"SELL", case-insensitive).
    pub fn from_wire(s: &str) -> Result<Self, BookError> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Bid),
            "SELL" => Ok(Side::Ask),
            other => Err(BookError::UnknownSide(other.to_string())),
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Side::Bid => "BUY",
            Side::Ask => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Price level in the order book. The exchange sends prices and sizes as
/// decimal strings; `Decimal`'s serde impl parses them losslessly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// Dollar value resting at this level.
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

// =============================================================================
// BookSide - one side of the replica
// =============================================================================

/// A single side of the replica. A level with size zero does not exist:
/// it is deleted, never stored as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookSide {
    levels: BTreeMap<Decimal, Decimal>,
}

impl BookSide {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire side with snapshot data. Zero-size entries in
    /// the snapshot are dropped.
    pub fn replace(&mut self, levels: &[PriceLevel]) {
        self.levels.clear();
        for level in levels {
            if level.size > Decimal::ZERO {
                self.levels.insert(level.price, level.size);
            }
        }
    }

    /// Upsert a single price level; size zero deletes the key.
    pub fn upsert(&mut self, price: Decimal, size: Decimal) {
        if size == Decimal::ZERO {
            self.levels.remove(&price);
        } else {
            self.levels.insert(price, size);
        }
    }

    /// Highest price on this side.
    pub fn max_level(&self) -> Option<PriceLevel> {
        self.levels
            .last_key_value()
            .map(|(p, s)| PriceLevel::new(*p, *s))
    }

    /// Lowest price on this side.
    pub fn min_level(&self) -> Option<PriceLevel> {
        self.levels
            .first_key_value()
            .map(|(p, s)| PriceLevel::new(*p, *s))
    }

    pub fn size_at(&self, price: Decimal) -> Decimal {
        self.levels.get(&price).copied().unwrap_or(Decimal::ZERO)
    }

    /// Sum of price × size over all levels.
    pub fn notional(&self) -> Decimal {
        self.levels.iter().map(|(p, s)| *p * *s).sum()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.levels.iter().map(|(p, s)| PriceLevel::new(*p, *s))
    }
}

// =============================================================================
// OrderBookReplica - complete replica for one asset
// =============================================================================

/// Local replica of one asset's order book.
///
/// `synced` is false until the first snapshot arrives and again after any
/// disconnect; while unsynced the replica must not feed the decision
/// engine and deltas are rejected.
#[derive(Debug, Clone)]
pub struct OrderBookReplica {
    pub asset_id: String,
    bids: BookSide,
    asks: BookSide,
    synced: bool,
}

impl OrderBookReplica {
    pub fn new(asset_id: String) -> Self {
        Self {
            asset_id,
            bids: BookSide::new(),
            asks: BookSide::new(),
            synced: false,
        }
    }

    /// Apply a full snapshot ("book" event): wholesale replace of both
    /// sides. Marks the replica synced.
    pub fn apply_snapshot(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.bids.replace(bids);
        self.asks.replace(asks);
        self.synced = true;
        self.check_crossed();
    }

    /// Apply a single delta ("price_change" event). Size zero deletes the
    /// level. Rejected while the replica is unsynced.
    pub fn apply_delta(
        &mut self,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<(), BookError> {
        if !self.synced {
            return Err(BookError::StaleReplica(self.asset_id.clone()));
        }
        match side {
            Side::Bid => self.bids.upsert(price, size),
            Side::Ask => self.asks.upsert(price, size),
        }
        self.check_crossed();
        Ok(())
    }

    /// Mark the replica stale (called after a disconnect). The next
    /// snapshot re-syncs it.
    pub fn mark_stale(&mut self) {
        self.synced = false;
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Best bid: highest bid price. Empty side means no liquidity.
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.max_level()
    }

    /// Best ask: lowest ask price.
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.min_level()
    }

    /// Average of best bid and best ask.
    pub fn midpoint(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::from(2)),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    pub fn bids(&self) -> &BookSide {
        &self.bids
    }

    pub fn asks(&self) -> &BookSide {
        &self.asks
    }

    /// A crossed book is logged, never silently accepted.
    fn check_crossed(&self) {
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid.price > ask.price {
                warn!(
                    "[Book] Crossed book for asset {}: best_bid {} > best_ask {}",
                    self.asset_id, bid.price, ask.price
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
