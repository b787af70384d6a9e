//! Subscription bookkeeping
//!
//! Tracks the desired asset set against the set the feed has confirmed.
//! The market channel has no explicit ack; the first "book" snapshot for
//! an asset is its acknowledgement. Every change is pushed as one batched
//! frame carrying the complete desired set, never one frame per asset.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::connection::FeedHandle;
use super::messages::SubscribeFrame;
use super::FeedError;

#[derive(Default)]
struct SubscriptionState {
    target: HashSet<String>,
    acked: HashSet<String>,
}

pub struct SubscriptionManager {
    state: Mutex<SubscriptionState>,
    readiness_timeout: Duration,
}

impl SubscriptionManager {
    pub fn new(assets: Vec<String>, readiness_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SubscriptionState {
                target: assets.into_iter().collect(),
                acked: HashSet::new(),
            }),
            readiness_timeout,
        })
    }

    /// Replace the desired set and push one batched frame with the new
    /// complete set. Removals need no separate frame; the server treats
    /// each frame as authoritative.
    pub fn set_targets(
        &self,
        assets: Vec<String>,
        handle: &FeedHandle,
    ) -> Result<(), FeedError> {
        let new_target: HashSet<String> = assets.into_iter().collect();
        {
            let mut state = self.state.lock();
            let added = new_target.difference(&state.target).count();
            let removed = state.target.difference(&new_target).count();
            if added == 0 && removed == 0 {
                return Ok(());
            }
            info!(
                "[Subscriptions] Target change: +{} -{} ({} total)",
                added,
                removed,
                new_target.len()
            );
            state.acked.retain(|asset| new_target.contains(asset));
            state.target = new_target;
        }
        self.send_subscribe(handle)
    }

    /// Re-subscribe after a (re)connect. Acks were cleared on disconnect,
    /// so readiness starts over.
    pub fn on_connected(&self, handle: &FeedHandle) -> Result<(), FeedError> {
        self.send_subscribe(handle)
    }

    /// The feed dropped; every confirmation is void until fresh snapshots
    /// arrive.
    pub fn on_disconnected(&self) {
        self.state.lock().acked.clear();
    }

    /// Record a snapshot arrival for an asset. Returns true if the asset
    /// is one we asked for.
    pub fn mark_acked(&self, asset_id: &str) -> bool {
        let mut state = self.state.lock();
        if !state.target.contains(asset_id) {
            warn!("[Subscriptions] Snapshot for unrequested asset {}", asset_id);
            return false;
        }
        state.acked.insert(asset_id.to_string());
        true
    }

    /// All desired assets have delivered at least one snapshot since the
    /// last (re)connect.
    pub fn is_ready(&self) -> bool {
        let state = self.state.lock();
        !state.target.is_empty() && state.acked.len() == state.target.len()
    }

    /// Wait until every subscription is confirmed. Fails loudly after
    /// the configured readiness timeout instead of retrying silently.
    pub async fn wait_ready(&self) -> Result<(), FeedError> {
        let deadline = tokio::time::Instant::now() + self.readiness_timeout;
        loop {
            if self.is_ready() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(FeedError::ReadinessTimeout(self.readiness_timeout));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Ask the server for fresh snapshots by re-sending the full set.
    /// Used when a replica went stale and needs a resync.
    pub fn request_resync(&self, handle: &FeedHandle) -> Result<(), FeedError> {
        info!("[Subscriptions] Requesting resync of all assets");
        self.send_subscribe(handle)
    }

    pub fn targets(&self) -> Vec<String> {
        self.state.lock().target.iter().cloned().collect()
    }

    fn send_subscribe(&self, handle: &FeedHandle) -> Result<(), FeedError> {
        let assets = self.targets();
        if assets.is_empty() {
            return Ok(());
        }
        let frame = serde_json::to_string(&SubscribeFrame::market(assets))?;
        handle.send_text(frame)
    }
}
