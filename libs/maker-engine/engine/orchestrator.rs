//! Engine orchestration
//!
//! Owns every shared structure, wires the feed into the book store and
//! the decision logic, and runs the periodic reconciliation loop. The
//! feed event path stays synchronous; anything that talks to the network
//! (cancels, reorder clips, oracle queries) runs on a bounded worker
//! pool so the read path never blocks on I/O.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::{NewOrder, OrderApi, ScoringOracle};
use crate::config::MakerConfig;
use crate::domain::order::TrackedOrder;
use crate::domain::orderbook::Side;
use crate::engine::book_store::BookStore;
use crate::engine::decision::{classify, evaluate, BookStability};
use crate::engine::order_store::OrderLifecycleStore;
use crate::engine::reorder::{plan_reorder, InFlightReorders};
use crate::feed::{
    FeedConnection, FeedEvent, FeedHandle, FeedUpdate, SubscriptionManager,
};
use crate::utils::ShutdownManager;

pub struct MakerEngine {
    config: MakerConfig,
    books: Arc<BookStore>,
    orders: Arc<OrderLifecycleStore>,
    in_flight: Arc<InFlightReorders>,
    api: Arc<dyn OrderApi>,
    oracle: Arc<dyn ScoringOracle>,
    workers: Arc<Semaphore>,
    /// Assets currently classified unstable, kept for transition logging
    /// and reorder suppression.
    unstable: Mutex<HashSet<String>>,
}

impl MakerEngine {
    pub fn new(
        config: MakerConfig,
        api: Arc<dyn OrderApi>,
        oracle: Arc<dyn ScoringOracle>,
    ) -> Arc<Self> {
        let workers = Arc::new(Semaphore::new(config.engine.submission_workers));
        Arc::new(Self {
            config,
            books: Arc::new(BookStore::new()),
            orders: Arc::new(OrderLifecycleStore::new()),
            in_flight: Arc::new(InFlightReorders::new()),
            api,
            oracle,
            workers,
            unstable: Mutex::new(HashSet::new()),
        })
    }

    pub fn books(&self) -> &Arc<BookStore> {
        &self.books
    }

    pub fn orders(&self) -> &Arc<OrderLifecycleStore> {
        &self.orders
    }

    /// Run until shutdown triggers. Connects the feed, waits for the
    /// initial subscriptions to confirm, then serves events and
    /// reconciliation until the flag clears.
    pub async fn run(self: &Arc<Self>, shutdown: Arc<ShutdownManager>) -> anyhow::Result<()> {
        info!(
            "[Engine] Starting with {} assets",
            self.config.assets.len()
        );

        for asset in &self.config.assets {
            self.books.ensure(asset);
        }

        let (handle, mut updates) = FeedConnection::new(self.config.feed.clone()).spawn();
        let handle = Arc::new(handle);
        let subs = SubscriptionManager::new(
            self.config.assets.clone(),
            Duration::from_secs(self.config.feed.readiness_timeout_secs),
        );

        self.wait_until_subscribed(&mut updates, &handle, &subs)
            .await
            .context("initial subscriptions never confirmed")?;
        info!("[Engine] All subscriptions confirmed, entering main loop");

        let reconcile_task = self.spawn_reconcile_task(
            Arc::clone(&handle),
            Arc::clone(&subs),
            Arc::clone(&shutdown),
        );

        let mut shutdown_check = tokio::time::interval(Duration::from_millis(250));
        loop {
            if !shutdown.is_running() {
                break;
            }
            tokio::select! {
                update = updates.recv() => match update {
                    Some(update) => self.handle_update(update, &handle, &subs),
                    None => {
                        // Feed task gone without a shutdown request.
                        error!("[Engine] Feed channel closed unexpectedly");
                        break;
                    }
                },
                _ = shutdown_check.tick() => {}
            }
        }

        info!("[Engine] Shutting down");
        self.cancel_all_orders().await;
        handle.shutdown();
        shutdown.trigger();
        if let Err(e) = reconcile_task.await {
            warn!("[Engine] Reconcile task ended abnormally: {}", e);
        }
        info!("[Engine] Stopped");
        Ok(())
    }

    /// Drive feed updates until every initial subscription has its first
    /// snapshot. The readiness wait itself lives in the subscription
    /// manager; this only keeps the acks flowing while it runs.
    async fn wait_until_subscribed(
        self: &Arc<Self>,
        updates: &mut mpsc::UnboundedReceiver<FeedUpdate>,
        handle: &Arc<FeedHandle>,
        subs: &Arc<SubscriptionManager>,
    ) -> anyhow::Result<()> {
        let ready = subs.wait_ready();
        tokio::pin!(ready);
        loop {
            tokio::select! {
                result = &mut ready => return result.map_err(Into::into),
                update = updates.recv() => match update {
                    Some(update) => self.handle_update(update, handle, subs),
                    None => anyhow::bail!("feed closed before subscriptions confirmed"),
                },
            }
        }
    }

    fn handle_update(
        self: &Arc<Self>,
        update: FeedUpdate,
        handle: &Arc<FeedHandle>,
        subs: &Arc<SubscriptionManager>,
    ) {
        match update {
            FeedUpdate::Connected => {
                info!("[Engine] Feed connected, subscribing");
                if let Err(e) = subs.on_connected(handle) {
                    warn!("[Engine] Subscribe failed: {}", e);
                }
            }
            FeedUpdate::Disconnected => {
                info!("[Engine] Feed disconnected, marking replicas stale");
                self.books.mark_all_stale();
                subs.on_disconnected();
            }
            FeedUpdate::Event(event) => self.handle_event(event, handle, subs),
        }
    }

    fn handle_event(
        self: &Arc<Self>,
        event: FeedEvent,
        handle: &Arc<FeedHandle>,
        subs: &Arc<SubscriptionManager>,
    ) {
        match event {
            FeedEvent::Book(book) => {
                subs.mark_acked(&book.asset_id);
                self.books
                    .apply_snapshot(&book.asset_id, &book.bids, &book.asks);
                self.evaluate_asset(&book.asset_id);
            }
            FeedEvent::PriceChange(change) => {
                let mut touched = false;
                for delta in &change.changes {
                    let side = match Side::from_wire(&delta.side) {
                        Ok(side) => side,
                        Err(e) => {
                            warn!("[Engine] Skipping delta for {}: {}", change.asset_id, e);
                            continue;
                        }
                    };
                    match self
                        .books
                        .apply_delta(&change.asset_id, side, delta.price, delta.size)
                    {
                        Ok(()) => touched = true,
                        Err(e) => {
                            // Delta without a snapshot: discard, resync.
                            warn!("[Engine] {}", e);
                            if let Err(e) = subs.request_resync(handle) {
                                warn!("[Engine] Resync request failed: {}", e);
                            }
                            return;
                        }
                    }
                }
                if touched {
                    self.evaluate_asset(&change.asset_id);
                }
            }
            FeedEvent::LastTradePrice(trade) => {
                debug!(
                    "[Engine] Last trade on {}: {} ({})",
                    trade.asset_id,
                    trade.price,
                    trade.side.as_deref().unwrap_or("?")
                );
            }
        }
    }

    /// Run the decision predicates for every live order on one asset and
    /// dispatch the resulting cancels/reorders to the worker pool.
    fn evaluate_asset(self: &Arc<Self>, asset_id: &str) {
        let view = match self.books.view(asset_id) {
            Some(view) => view,
            None => return,
        };
        if !view.synced {
            return;
        }

        let live = self.orders.live_for_asset(asset_id);
        if live.is_empty() {
            return;
        }

        if classify(&view, &self.config.guard) == BookStability::Unstable {
            if self.unstable.lock().insert(asset_id.to_string()) {
                warn!(
                    "[Engine] Book unstable on {}, cancelling all resting orders",
                    asset_id
                );
            }
            let ids: Vec<String> = live.iter().map(|o| o.order_id.clone()).collect();
            self.spawn_cancel_task(ids);
            return;
        }
        if self.unstable.lock().remove(asset_id) {
            info!("[Engine] Book stable again on {}", asset_id);
        }

        let mut to_cancel: Vec<&TrackedOrder> = Vec::new();
        for order in &live {
            if let Some(reason) = evaluate(order, &view, &self.config.market) {
                info!(
                    "[Engine] Cancelling {} on {}: {}",
                    order.order_id, asset_id, reason
                );
                to_cancel.push(order);
            }
        }
        if to_cancel.is_empty() {
            return;
        }

        if to_cancel.len() == live.len() {
            // Whole book of resting orders goes; requote the size.
            let best_bid = match &view.best_bid {
                Some(level) => level.price,
                None => return,
            };
            let total: Decimal = to_cancel.iter().map(|o| o.remaining_size).sum();
            let ids: Vec<String> = to_cancel.iter().map(|o| o.order_id.clone()).collect();
            self.spawn_reorder_task(asset_id.to_string(), ids, total, best_bid);
        } else {
            let ids: Vec<String> = to_cancel.iter().map(|o| o.order_id.clone()).collect();
            self.spawn_cancel_task(ids);
        }
    }

    /// Cancel a batch on the worker pool. Failures revert the orders to
    /// Resting so the next evaluation retries.
    fn spawn_cancel_task(self: &Arc<Self>, order_ids: Vec<String>) {
        if order_ids.is_empty() {
            return;
        }
        self.orders.mark_cancelling(&order_ids);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = match engine.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            match engine.api.cancel_orders(&order_ids).await {
                Ok(outcome) => {
                    debug!(
                        "[Engine] Cancelled {} orders, {} already closed",
                        outcome.cancelled.len(),
                        outcome.already_closed.len()
                    );
                }
                Err(e) => {
                    warn!("[Engine] Cancel failed: {}", e);
                    engine.orders.revert_cancelling(&order_ids);
                }
            }
        });
    }

    /// Cancel-then-requote on the worker pool, single-flight per asset.
    fn spawn_reorder_task(
        self: &Arc<Self>,
        asset_id: String,
        order_ids: Vec<String>,
        total_size: Decimal,
        best_bid: Decimal,
    ) {
        let guard = match self.in_flight.begin(&asset_id) {
            Some(guard) => guard,
            // One reorder already running for this asset.
            None => return,
        };
        self.orders.mark_cancelling(&order_ids);

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            let _permit = match engine.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            if let Err(e) = engine.api.cancel_orders(&order_ids).await {
                warn!("[Engine] Reorder cancel failed on {}: {}", asset_id, e);
                engine.orders.revert_cancelling(&order_ids);
                return;
            }

            let clips = plan_reorder(
                total_size,
                best_bid,
                &engine.config.market,
                &engine.config.reorder,
            );
            for clip in clips {
                let order = NewOrder {
                    asset_id: asset_id.clone(),
                    side: Side::Bid,
                    price: clip.price,
                    size: clip.size,
                };
                match engine.api.submit_order(&order).await {
                    Ok(order_id) => {
                        engine.orders.insert(TrackedOrder::new(
                            order_id,
                            asset_id.clone(),
                            Side::Bid,
                            clip.price,
                            clip.size,
                        ));
                    }
                    Err(e) => {
                        // Rejected orders are never tracked; retrying is
                        // the next evaluation's business.
                        warn!(
                            "[Engine] Clip {} @ {} rejected on {}: {}",
                            clip.size, clip.price, asset_id, e
                        );
                    }
                }
            }
        });
    }

    /// Periodic reconciliation loop: open orders, scoring flags,
    /// subscription targets, replica lifecycle.
    fn spawn_reconcile_task(
        self: &Arc<Self>,
        handle: Arc<FeedHandle>,
        subs: Arc<SubscriptionManager>,
        shutdown: Arc<ShutdownManager>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let interval = Duration::from_secs(self.config.engine.reconcile_interval_secs);
        tokio::spawn(async move {
            while shutdown.is_running() {
                engine.reconcile_once(&handle, &subs).await;
                shutdown.interruptible_sleep(interval).await;
            }
            info!("[Engine] Reconcile loop stopped");
        })
    }

    async fn reconcile_once(&self, handle: &Arc<FeedHandle>, subs: &Arc<SubscriptionManager>) {
        let open = match self.api.get_open_orders().await {
            Ok(open) => open,
            Err(e) => {
                warn!("[Engine] Open-order poll failed: {}", e);
                return;
            }
        };

        let report = self.orders.reconcile(&open);
        debug!(
            "[Engine] Reconciled: {} confirmed, {} discovered, {} removed",
            report.confirmed, report.discovered, report.removed
        );

        let live = self.orders.all_live();
        let ids: Vec<String> = live.iter().map(|o| o.order_id.clone()).collect();
        if !ids.is_empty() {
            match self.oracle.are_orders_scoring(&ids).await {
                Ok(scoring) => {
                    for (id, is_scoring) in scoring {
                        self.orders.set_scoring(&id, is_scoring);
                    }
                }
                Err(e) => {
                    // Oracle flap must not trigger a cancel storm; keep
                    // the last known flags.
                    warn!("[Engine] Scoring query failed, keeping flags: {}", e);
                }
            }
        }

        // Configured assets stay subscribed; orders discovered on other
        // assets pull those in too. Replicas with no orders and no
        // configured interest are released.
        let mut target: HashSet<String> = self.config.assets.iter().cloned().collect();
        for order in &live {
            target.insert(order.asset_id.clone());
        }
        for asset in self.books.asset_ids() {
            if !target.contains(&asset) {
                debug!("[Engine] Releasing replica for {}", asset);
                self.books.release(&asset);
            }
        }
        for asset in &target {
            self.books.ensure(asset);
        }
        if let Err(e) = subs.set_targets(target.into_iter().collect(), handle) {
            warn!("[Engine] Subscription sync failed: {}", e);
        }
    }

    /// Best-effort cancel of everything we track. Failures are logged
    /// and never block shutdown.
    async fn cancel_all_orders(&self) {
        let ids: Vec<String> = self
            .orders
            .all_live()
            .iter()
            .map(|o| o.order_id.clone())
            .collect();
        if ids.is_empty() {
            return;
        }
        info!("[Engine] Cancelling {} resting orders before exit", ids.len());
        self.orders.mark_cancelling(&ids);
        if let Err(e) = self.api.cancel_orders(&ids).await {
            warn!("[Engine] Final cancel failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiError, CancelOutcome, OpenOrder};
    use crate::config::{ApiConfig, EngineConfig, FeedConfig};
    use crate::domain::orderbook::PriceLevel;
    use crate::engine::decision::{GuardParams, MarketParams};
    use crate::engine::reorder::ReorderParams;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn test_config() -> MakerConfig {
        MakerConfig {
            assets: vec!["a1".to_string()],
            feed: FeedConfig {
                ws_url: "wss://example.invalid/ws/market".to_string(),
                readiness_timeout_secs: 15,
                stable_connection_secs: 30,
                max_backoff_secs: 60,
            },
            api: ApiConfig {
                base_url: "https://example.invalid".to_string(),
                request_timeout_secs: 30,
                api_key: None,
                api_passphrase: None,
            },
            market: MarketParams {
                tick_size: d("0.01"),
                max_incentive_spread: d("0.02"),
                reward_range_multiplier: d("3"),
                min_liquidity_notional: d("500"),
                min_order_size: Decimal::ZERO,
            },
            guard: GuardParams {
                max_imbalance_ratio: d("4"),
                min_best_bid_notional: d("100"),
            },
            reorder: ReorderParams::default(),
            engine: EngineConfig::default(),
        }
    }

    #[derive(Default)]
    struct FakeApi {
        submissions: Mutex<Vec<NewOrder>>,
        cancel_batches: Mutex<Vec<Vec<String>>>,
        next_id: AtomicUsize,
    }

    #[async_trait]
    impl OrderApi for FakeApi {
        async fn submit_order(&self, order: &NewOrder) -> Result<String, ApiError> {
            self.submissions.lock().push(order.clone());
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(format!("order-{}", id))
        }

        async fn cancel_orders(&self, order_ids: &[String]) -> Result<CancelOutcome, ApiError> {
            // Hold the single-flight slot long enough for a competing
            // trigger to observe it.
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.cancel_batches.lock().push(order_ids.to_vec());
            Ok(CancelOutcome {
                cancelled: order_ids.to_vec(),
                already_closed: Vec::new(),
            })
        }

        async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ApiError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl ScoringOracle for FakeApi {
        async fn are_orders_scoring(
            &self,
            order_ids: &[String],
        ) -> Result<HashMap<String, bool>, ApiError> {
            Ok(order_ids.iter().map(|id| (id.clone(), true)).collect())
        }
    }

    fn engine_with_fake() -> (Arc<MakerEngine>, Arc<FakeApi>) {
        let api = Arc::new(FakeApi::default());
        let engine = MakerEngine::new(test_config(), api.clone(), api.clone());
        (engine, api)
    }

    fn snapshot(engine: &MakerEngine, bid: (&str, &str), ask: (&str, &str)) {
        engine.books.apply_snapshot(
            "a1",
            &[PriceLevel::new(d(bid.0), d(bid.1))],
            &[PriceLevel::new(d(ask.0), d(ask.1))],
        );
    }

    fn resting_order(engine: &MakerEngine, id: &str, price: &str, size: &str) {
        let mut order = TrackedOrder::new(
            id.to_string(),
            "a1".to_string(),
            Side::Bid,
            d(price),
            d(size),
        );
        order.state = crate::domain::order::OrderState::Resting;
        engine.orders.insert(order);
    }

    #[tokio::test]
    async fn test_at_best_bid_triggers_reorder_clips() {
        let (engine, api) = engine_with_fake();
        snapshot(&engine, ("0.50", "4000"), ("0.52", "4000"));
        resting_order(&engine, "o1", "0.50", "100");

        engine.evaluate_asset("a1");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let cancels = api.cancel_batches.lock().clone();
        assert_eq!(cancels, vec![vec!["o1".to_string()]]);

        let submissions = api.submissions.lock().clone();
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0].price, d("0.49"));
        assert_eq!(submissions[0].size, d("30.0"));
        assert_eq!(submissions[1].price, d("0.48"));
        assert_eq!(submissions[1].size, d("70.0"));

        // Replacement clips are tracked, the old id is gone
        assert!(engine.orders.get("o1").map(|o| !o.is_live()).unwrap_or(true));
        assert_eq!(engine.orders.all_live().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_yield_one_reorder() {
        let (engine, api) = engine_with_fake();
        snapshot(&engine, ("0.50", "4000"), ("0.52", "4000"));
        resting_order(&engine, "o1", "0.50", "100");

        // Two book updates in quick succession while the first reorder's
        // cancel is still in flight
        engine.evaluate_asset("a1");
        engine.evaluate_asset("a1");
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(api.cancel_batches.lock().len(), 1);
        assert_eq!(api.submissions.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_unstable_book_cancels_without_requoting() {
        let (engine, api) = engine_with_fake();
        // Ask side carries 5x the bid side's dollars
        snapshot(&engine, ("0.50", "1000"), ("0.52", "5000"));
        resting_order(&engine, "o1", "0.48", "100");

        engine.evaluate_asset("a1");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(api.cancel_batches.lock().len(), 1);
        assert!(api.submissions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_healthy_order_left_alone() {
        let (engine, api) = engine_with_fake();
        snapshot(&engine, ("0.50", "4000"), ("0.52", "4000"));
        resting_order(&engine, "o1", "0.49", "100");

        engine.evaluate_asset("a1");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(api.cancel_batches.lock().is_empty());
        assert!(api.submissions.lock().is_empty());
        assert_eq!(engine.orders.all_live().len(), 1);
    }
}
