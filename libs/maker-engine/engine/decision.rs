//! Quote decision engine
//!
//! Pure predicate logic over a [`BookView`] and a tracked order. Nothing
//! here touches the network or a lock; callers gather inputs, run the
//! predicates, and act on the verdict.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::order::TrackedOrder;
use crate::engine::book_store::BookView;

/// Market-imbalance verdict. While unstable, every resting order for the
/// asset is cancelled and reordering is suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookStability {
    Stable,
    Unstable,
}

/// Why a resting order must be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// |price − midpoint| exceeds the reward range.
    OutsideRewardRange,
    /// best_bid − price exceeds the max incentive spread.
    BeyondIncentiveSpread,
    /// Sitting exactly at the touch disqualifies the order from rewards.
    AtBestBid,
    /// Best-bid dollar depth below the reward-eligibility threshold.
    ThinBook,
    /// The eligibility oracle says the order is not scoring.
    NotScoring,
    /// Book classified unstable by the imbalance guard.
    UnstableBook,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CancelReason::OutsideRewardRange => "outside reward range",
            CancelReason::BeyondIncentiveSpread => "beyond max incentive spread",
            CancelReason::AtBestBid => "priced at best bid",
            CancelReason::ThinBook => "best bid too thin",
            CancelReason::NotScoring => "not scoring per oracle",
            CancelReason::UnstableBook => "book unstable",
        };
        f.write_str(text)
    }
}

/// Market structure parameters, consumed as given and never re-derived.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketParams {
    pub tick_size: Decimal,
    pub max_incentive_spread: Decimal,
    /// Reward range = multiplier × tick_size.
    #[serde(default = "default_reward_range_multiplier")]
    pub reward_range_multiplier: Decimal,
    /// Minimum best-bid dollar value for reward eligibility.
    #[serde(default = "default_min_liquidity_notional")]
    pub min_liquidity_notional: Decimal,
    /// Reorder clips below this size are raised to it. Zero disables
    /// the floor.
    #[serde(default)]
    pub min_order_size: Decimal,
}

fn default_reward_range_multiplier() -> Decimal {
    Decimal::from(3)
}

fn default_min_liquidity_notional() -> Decimal {
    Decimal::from(500)
}

impl MarketParams {
    pub fn reward_range(&self) -> Decimal {
        self.reward_range_multiplier * self.tick_size
    }
}

/// Imbalance guard thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardParams {
    /// Book is unstable when one side's dollar volume exceeds the
    /// other's by more than this ratio.
    pub max_imbalance_ratio: Decimal,
    /// Book is unstable when the best bid's dollar depth falls below
    /// this.
    pub min_best_bid_notional: Decimal,
}

/// Classify the book before any per-order predicate runs. An unsynced
/// view is never stable; neither is one missing a side.
pub fn classify(view: &BookView, guard: &GuardParams) -> BookStability {
    if !view.synced {
        return BookStability::Unstable;
    }
    let best_bid = match &view.best_bid {
        Some(level) => level,
        None => return BookStability::Unstable,
    };
    if view.best_ask.is_none() {
        return BookStability::Unstable;
    }
    if best_bid.notional() < guard.min_best_bid_notional {
        return BookStability::Unstable;
    }
    if view.bid_notional.is_zero() || view.ask_notional.is_zero() {
        return BookStability::Unstable;
    }
    let ratio = if view.bid_notional >= view.ask_notional {
        view.bid_notional / view.ask_notional
    } else {
        view.ask_notional / view.bid_notional
    };
    if ratio > guard.max_imbalance_ratio {
        return BookStability::Unstable;
    }
    BookStability::Stable
}

/// Evaluate the ordered cancellation predicates for one resting order.
/// Any hit cancels; the first hit names the reason. The scoring flag on
/// the order must be fresh; its refresh belongs to the caller owning the
/// oracle.
pub fn evaluate(
    order: &TrackedOrder,
    view: &BookView,
    market: &MarketParams,
) -> Option<CancelReason> {
    let best_bid = view.best_bid.as_ref()?;
    let midpoint = view.midpoint?;

    let distance = (order.price - midpoint).abs();
    if distance > market.reward_range() {
        return Some(CancelReason::OutsideRewardRange);
    }

    if best_bid.price - order.price > market.max_incentive_spread {
        return Some(CancelReason::BeyondIncentiveSpread);
    }

    if order.price == best_bid.price {
        return Some(CancelReason::AtBestBid);
    }

    if best_bid.notional() < market.min_liquidity_notional {
        return Some(CancelReason::ThinBook);
    }

    if !order.scoring {
        return Some(CancelReason::NotScoring);
    }

    None
}
