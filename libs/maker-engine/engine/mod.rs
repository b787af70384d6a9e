//! Decision and orchestration layer.

pub mod book_store;
pub mod decision;
pub mod order_store;
pub mod orchestrator;
pub mod reorder;

pub use book_store::{BookStore, BookView};
pub use decision::{classify, evaluate, BookStability, CancelReason, GuardParams, MarketParams};
pub use order_store::{OrderLifecycleStore, ReconcileReport};
pub use orchestrator::MakerEngine;
pub use reorder::{plan_reorder, Clip, InFlightReorders, ReorderParams};
