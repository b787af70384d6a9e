//! Shared order book store
//!
//! Thread-safe map of per-asset replicas. Writers are the feed consumer
//! task; readers take cheap point-in-time [`BookView`] snapshots so no
//! lock is ever held across an await point or a network call.

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::orderbook::{BookError, OrderBookReplica, PriceLevel, Side};

/// Point-in-time view of one replica, detached from the store's lock.
#[derive(Debug, Clone)]
pub struct BookView {
    pub asset_id: String,
    pub synced: bool,
    pub best_bid: Option<PriceLevel>,
    pub best_ask: Option<PriceLevel>,
    pub midpoint: Option<Decimal>,
    /// Total dollar value resting on each side.
    pub bid_notional: Decimal,
    pub ask_notional: Decimal,
}

#[derive(Default)]
pub struct BookStore {
    books: RwLock<HashMap<String, OrderBookReplica>>,
}

impl BookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a replica exists for the asset (unsynced until its
    /// first snapshot).
    pub fn ensure(&self, asset_id: &str) {
        let mut books = self.books.write();
        books
            .entry(asset_id.to_string())
            .or_insert_with(|| OrderBookReplica::new(asset_id.to_string()));
    }

    /// Apply a full snapshot, creating the replica if needed.
    pub fn apply_snapshot(&self, asset_id: &str, bids: &[PriceLevel], asks: &[PriceLevel]) {
        let mut books = self.books.write();
        let replica = books
            .entry(asset_id.to_string())
            .or_insert_with(|| OrderBookReplica::new(asset_id.to_string()));
        replica.apply_snapshot(bids, asks);
        debug!(
            "[BookStore] Snapshot for {}: {} bids, {} asks",
            asset_id,
            replica.bids().len(),
            replica.asks().len()
        );
    }

    /// Apply one level delta. Fails with [`BookError::StaleReplica`] if
    /// the replica has no snapshot yet.
    pub fn apply_delta(
        &self,
        asset_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<(), BookError> {
        let mut books = self.books.write();
        let replica = books
            .entry(asset_id.to_string())
            .or_insert_with(|| OrderBookReplica::new(asset_id.to_string()));
        replica.apply_delta(side, price, size)
    }

    /// Mark every replica stale. Called on feed disconnect; replicas
    /// resync from their next snapshot.
    pub fn mark_all_stale(&self) {
        let mut books = self.books.write();
        for replica in books.values_mut() {
            replica.mark_stale();
        }
    }

    /// Drop a replica we no longer track.
    pub fn release(&self, asset_id: &str) {
        self.books.write().remove(asset_id);
    }

    /// Snapshot the replica's derived quantities. `None` when the asset
    /// is unknown.
    pub fn view(&self, asset_id: &str) -> Option<BookView> {
        let books = self.books.read();
        let replica = books.get(asset_id)?;
        Some(BookView {
            asset_id: asset_id.to_string(),
            synced: replica.is_synced(),
            best_bid: replica.best_bid(),
            best_ask: replica.best_ask(),
            midpoint: replica.midpoint(),
            bid_notional: replica.bids().notional(),
            ask_notional: replica.asks().notional(),
        })
    }

    pub fn asset_ids(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }
}
