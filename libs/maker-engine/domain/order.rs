//! Tracked order lifecycle
//!
//! The engine mirrors the exchange's view of our resting orders. State
//! only moves forward through the lifecycle; reconciliation against the
//! REST open-orders endpoint is what retires entries.

use rust_decimal::Decimal;

use crate::domain::orderbook::Side;

/// Lifecycle of an order as seen by the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    /// Submitted, not yet confirmed on the exchange.
    Pending,
    /// Confirmed resting on the book.
    Resting,
    /// Cancellation requested, awaiting confirmation of absence.
    Cancelling,
    /// Fully matched.
    Filled,
    /// Cancellation confirmed.
    Cancelled,
    /// Absent from the exchange without an explicit cancel or fill.
    Removed,
}

/// One of our maker orders as the engine tracks it.
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub order_id: String,
    pub asset_id: String,
    pub side: Side,
    pub price: Decimal,
    pub original_size: Decimal,
    pub remaining_size: Decimal,
    pub state: OrderState,
    /// Whether the exchange currently counts this order toward rewards.
    pub scoring: bool,
    /// Consecutive reconciliation passes where the exchange did not
    /// report this order. Two misses retire it.
    pub misses: u8,
}

impl TrackedOrder {
    pub fn new(
        order_id: String,
        asset_id: String,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            order_id,
            asset_id,
            side,
            price,
            original_size: size,
            remaining_size: size,
            state: OrderState::Pending,
            // Assume scoring until the oracle says otherwise; a fresh
            // order must not be cancelled before its first oracle check.
            scoring: true,
            misses: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, OrderState::Pending | OrderState::Resting)
    }

    /// Dollar value still resting.
    pub fn remaining_notional(&self) -> Decimal {
        self.price * self.remaining_size
    }
}
