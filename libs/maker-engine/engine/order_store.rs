//! Order lifecycle store
//!
//! Thread-safe registry of our resting maker orders. The exchange's
//! open-orders endpoint is authoritative; periodic reconciliation folds
//! its answer into the local view. A tracked order missing from two
//! consecutive reconciliation passes is retired, which rides out the
//! endpoint's eventual consistency without reacting to a single blip.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::client::OpenOrder;
use crate::domain::order::{OrderState, TrackedOrder};
use crate::domain::orderbook::Side;

/// Consecutive misses before a tracked order is declared gone.
const MAX_MISSES: u8 = 2;

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Exchange orders we were not tracking, now adopted.
    pub discovered: usize,
    /// Tracked orders retired (miss limit hit or cancellation confirmed).
    pub removed: usize,
    /// Tracked orders the exchange confirmed as still open.
    pub confirmed: usize,
}

#[derive(Default)]
pub struct OrderLifecycleStore {
    orders: RwLock<HashMap<String, TrackedOrder>>,
}

impl OrderLifecycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: TrackedOrder) {
        self.orders.write().insert(order.order_id.clone(), order);
    }

    pub fn get(&self, order_id: &str) -> Option<TrackedOrder> {
        self.orders.read().get(order_id).cloned()
    }

    /// Live orders resting on one asset.
    pub fn live_for_asset(&self, asset_id: &str) -> Vec<TrackedOrder> {
        self.orders
            .read()
            .values()
            .filter(|o| o.asset_id == asset_id && o.is_live())
            .cloned()
            .collect()
    }

    pub fn all_live(&self) -> Vec<TrackedOrder> {
        self.orders
            .read()
            .values()
            .filter(|o| o.is_live())
            .cloned()
            .collect()
    }

    /// Flag orders as awaiting cancellation confirmation. Unknown ids are
    /// ignored.
    pub fn mark_cancelling(&self, order_ids: &[String]) {
        let mut orders = self.orders.write();
        for id in order_ids {
            if let Some(order) = orders.get_mut(id) {
                order.state = OrderState::Cancelling;
            }
        }
    }

    /// Put orders back to Resting after a failed cancel request, so a
    /// later evaluation pass retries them.
    pub fn revert_cancelling(&self, order_ids: &[String]) {
        let mut orders = self.orders.write();
        for id in order_ids {
            if let Some(order) = orders.get_mut(id) {
                if order.state == OrderState::Cancelling {
                    order.state = OrderState::Resting;
                }
            }
        }
    }

    /// Update reward-scoring flags from the scoring oracle.
    pub fn set_scoring(&self, order_id: &str, scoring: bool) {
        if let Some(order) = self.orders.write().get_mut(order_id) {
            order.scoring = scoring;
        }
    }

    /// Fold the authoritative open-orders answer into the local view.
    ///
    /// Present orders are confirmed (miss counter reset, sizes updated,
    /// Pending promoted to Resting). Absent orders accrue a miss, or are
    /// retired immediately when a cancellation was already in flight.
    /// Unknown exchange orders are adopted so the engine manages orders
    /// placed out-of-band too.
    pub fn reconcile(&self, open_orders: &[OpenOrder]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let open_ids: HashSet<&str> = open_orders.iter().map(|o| o.order_id.as_str()).collect();

        let mut orders = self.orders.write();

        let mut filled: Vec<String> = Vec::new();
        for open in open_orders {
            match orders.get_mut(&open.order_id) {
                Some(tracked) => {
                    tracked.misses = 0;
                    tracked.remaining_size = open.remaining_size();
                    if tracked.remaining_size <= rust_decimal::Decimal::ZERO {
                        tracked.state = OrderState::Filled;
                        filled.push(open.order_id.clone());
                        report.removed += 1;
                        continue;
                    }
                    if tracked.state == OrderState::Pending {
                        tracked.state = OrderState::Resting;
                    }
                    report.confirmed += 1;
                }
                None => {
                    debug!(
                        "[OrderStore] Adopting untracked order {} on {}",
                        open.order_id, open.asset_id
                    );
                    let side = Side::from_wire(&open.side).unwrap_or(Side::Bid);
                    let mut adopted = TrackedOrder::new(
                        open.order_id.clone(),
                        open.asset_id.clone(),
                        side,
                        open.price,
                        open.original_size,
                    );
                    adopted.remaining_size = open.remaining_size();
                    adopted.state = OrderState::Resting;
                    orders.insert(adopted.order_id.clone(), adopted);
                    report.discovered += 1;
                }
            }
        }

        for id in &filled {
            orders.remove(id);
        }

        orders.retain(|id, tracked| {
            if open_ids.contains(id.as_str()) {
                return true;
            }
            if tracked.state == OrderState::Cancelling {
                // Absence is exactly the confirmation we were waiting for.
                tracked.state = OrderState::Cancelled;
                report.removed += 1;
                return false;
            }
            tracked.misses += 1;
            if tracked.misses >= MAX_MISSES {
                info!(
                    "[OrderStore] Order {} missing {} passes, retiring",
                    id, tracked.misses
                );
                tracked.state = OrderState::Removed;
                report.removed += 1;
                false
            } else {
                true
            }
        });

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn tracked(id: &str, asset: &str) -> TrackedOrder {
        TrackedOrder::new(
            id.to_string(),
            asset.to_string(),
            Side::Bid,
            d("0.48"),
            d("100"),
        )
    }

    fn open(id: &str, asset: &str) -> OpenOrder {
        OpenOrder {
            order_id: id.to_string(),
            asset_id: asset.to_string(),
            side: "BUY".to_string(),
            price: d("0.48"),
            original_size: d("100"),
            size_matched: d("0"),
        }
    }

    #[test]
    fn test_confirm_resets_misses_and_promotes_pending() {
        let store = OrderLifecycleStore::new();
        let mut order = tracked("o1", "a1");
        order.misses = 1;
        store.insert(order);

        let report = store.reconcile(&[open("o1", "a1")]);
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.removed, 0);

        let order = store.get("o1").unwrap();
        assert_eq!(order.misses, 0);
        assert_eq!(order.state, OrderState::Resting);
    }

    #[test]
    fn test_removal_after_two_consecutive_misses() {
        let store = OrderLifecycleStore::new();
        store.insert(tracked("o1", "a1"));

        // First miss: kept
        let report = store.reconcile(&[]);
        assert_eq!(report.removed, 0);
        assert_eq!(store.get("o1").unwrap().misses, 1);

        // Second consecutive miss: retired
        let report = store.reconcile(&[]);
        assert_eq!(report.removed, 1);
        assert!(store.get("o1").is_none());
    }

    #[test]
    fn test_reappearance_resets_miss_counter() {
        let store = OrderLifecycleStore::new();
        store.insert(tracked("o1", "a1"));

        store.reconcile(&[]);
        store.reconcile(&[open("o1", "a1")]);
        store.reconcile(&[]);

        // Only one consecutive miss, so still tracked
        assert_eq!(store.get("o1").unwrap().misses, 1);
    }

    #[test]
    fn test_cancelling_order_removed_on_first_absence() {
        let store = OrderLifecycleStore::new();
        store.insert(tracked("o1", "a1"));
        store.mark_cancelling(&["o1".to_string()]);

        let report = store.reconcile(&[]);
        assert_eq!(report.removed, 1);
        assert!(store.get("o1").is_none());
    }

    #[test]
    fn test_untracked_open_order_adopted() {
        let store = OrderLifecycleStore::new();
        let report = store.reconcile(&[open("mystery", "a1")]);
        assert_eq!(report.discovered, 1);

        let adopted = store.get("mystery").unwrap();
        assert_eq!(adopted.state, OrderState::Resting);
        assert_eq!(adopted.asset_id, "a1");
    }

    #[test]
    fn test_fully_filled_order_retired() {
        let store = OrderLifecycleStore::new();
        store.insert(tracked("o1", "a1"));

        let mut filled = open("o1", "a1");
        filled.size_matched = d("100");
        let report = store.reconcile(&[filled]);

        assert_eq!(report.removed, 1);
        assert_eq!(report.confirmed, 0);
        assert!(store.get("o1").is_none());
    }

    #[test]
    fn test_partial_fill_updates_remaining() {
        let store = OrderLifecycleStore::new();
        store.insert(tracked("o1", "a1"));

        let mut partially_filled = open("o1", "a1");
        partially_filled.size_matched = d("40");
        store.reconcile(&[partially_filled]);

        assert_eq!(store.get("o1").unwrap().remaining_size, d("60"));
    }

    #[test]
    fn test_live_for_asset_filters() {
        let store = OrderLifecycleStore::new();
        store.insert(tracked("o1", "a1"));
        store.insert(tracked("o2", "a2"));
        store.mark_cancelling(&["o1".to_string()]);

        assert!(store.live_for_asset("a1").is_empty());
        assert_eq!(store.live_for_asset("a2").len(), 1);
    }
}
