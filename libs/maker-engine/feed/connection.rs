//! Supervised WebSocket connection
//!
//! Owns the connect/read/reconnect loop for the market channel. Consumers
//! get a [`FeedHandle`] for sending frames and shutting down, plus an
//! update channel carrying connection transitions and parsed events.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::messages::parse_frame;
use super::{FeedError, FeedUpdate};
use crate::config::FeedConfig;

/// Delay before reconnect attempt N (1-based): 2^(N-1) seconds capped at
/// `max_secs`. The initial connect on startup is not a reconnect and
/// waits nothing.
pub fn reconnect_delay(attempt: u32, max_secs: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let exp = (attempt - 1).min(63);
    let secs = 1u64.checked_shl(exp).unwrap_or(u64::MAX);
    Duration::from_secs(secs.min(max_secs))
}

/// Connection lifecycle, owned exclusively by the connection task.
/// Everyone else observes it through the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Stopped,
    Connecting,
    /// Socket up and serving frames.
    Subscribed,
    Closing,
}

/// Handle to a spawned feed connection. Cloneable sender side; shutdown
/// is idempotent.
pub struct FeedHandle {
    outbound: mpsc::UnboundedSender<Message>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl FeedHandle {
    /// Queue a text frame for sending. Frames queued while disconnected
    /// are flushed once the socket is back up.
    pub fn send_text(&self, frame: String) -> Result<(), FeedError> {
        self.outbound
            .send(Message::Text(frame))
            .map_err(|_| FeedError::Shutdown)
    }

    /// Request shutdown. Safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait for the connection task to finish.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// WebSocket feed connection factory.
pub struct FeedConnection {
    config: FeedConfig,
}

impl FeedConnection {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    /// Spawn the connection task. Returns the control handle and the
    /// update stream.
    pub fn spawn(self) -> (FeedHandle, mpsc::UnboundedReceiver<FeedUpdate>) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Stopped);

        let task = tokio::spawn(run_connection_loop(
            self.config,
            outbound_rx,
            updates_tx,
            shutdown_rx,
            state_tx,
        ));

        (
            FeedHandle {
                outbound: outbound_tx,
                shutdown: shutdown_tx,
                state: state_rx,
                task,
            },
            updates_rx,
        )
    }
}

async fn run_connection_loop(
    config: FeedConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    updates_tx: mpsc::UnboundedSender<FeedUpdate>,
    mut shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let url = config.ws_url.clone();
    // Consecutive reconnect attempts since the last stable connection.
    let mut attempt: u32 = 0;

    'reconnect: loop {
        if *shutdown_rx.borrow() {
            break 'reconnect;
        }
        let _ = state_tx.send(ConnectionState::Connecting);

        let delay = reconnect_delay(attempt, config.max_backoff_secs);
        if !delay.is_zero() {
            info!(
                "[Feed] Reconnect attempt {} in {}s",
                attempt,
                delay.as_secs()
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => break 'reconnect,
            }
        }

        let ws_stream = match connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                error!("[Feed] Connection failed: {}", e);
                attempt += 1;
                continue 'reconnect;
            }
        };

        info!("[Feed] Connected to {}", url);
        let _ = state_tx.send(ConnectionState::Subscribed);
        let connected_at = Instant::now();
        if updates_tx.send(FeedUpdate::Connected).is_err() {
            break 'reconnect;
        }

        let (mut ws_sink, mut ws_source) = ws_stream.split();

        'connected: loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    let _ = state_tx.send(ConnectionState::Closing);
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break 'reconnect;
                }

                frame = outbound_rx.recv() => {
                    match frame {
                        Some(msg) => {
                            if let Err(e) = ws_sink.send(msg).await {
                                warn!("[Feed] Send failed, reconnecting: {}", e);
                                break 'connected;
                            }
                        }
                        // All handles dropped; nothing left to serve.
                        None => break 'reconnect,
                    }
                }

                incoming = ws_source.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            for event in parse_frame(&text) {
                                if updates_tx.send(FeedUpdate::Event(event)).is_err() {
                                    break 'reconnect;
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if ws_sink.send(Message::Pong(payload)).await.is_err() {
                                break 'connected;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("[Feed] Server closed connection: {:?}", frame);
                            break 'connected;
                        }
                        Some(Ok(other)) => {
                            debug!("[Feed] Ignoring non-text message: {:?}", other);
                        }
                        Some(Err(e)) => {
                            warn!("[Feed] Read error, reconnecting: {}", e);
                            break 'connected;
                        }
                        None => {
                            info!("[Feed] Stream ended, reconnecting");
                            break 'connected;
                        }
                    }
                }
            }
        }

        if connected_at.elapsed() >= Duration::from_secs(config.stable_connection_secs) {
            attempt = 1;
        } else {
            attempt += 1;
        }
        if updates_tx.send(FeedUpdate::Disconnected).is_err() {
            break 'reconnect;
        }
    }

    // Final transition so consumers can mark replicas stale on shutdown.
    let _ = state_tx.send(ConnectionState::Stopped);
    let _ = updates_tx.send(FeedUpdate::Disconnected);
    info!("[Feed] Connection loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> FeedConfig {
        FeedConfig {
            ws_url: "ws://127.0.0.1:1/nowhere".to_string(),
            readiness_timeout_secs: 15,
            stable_connection_secs: 30,
            max_backoff_secs: 60,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(reconnect_delay(0, 60), Duration::ZERO);
        assert_eq!(reconnect_delay(1, 60), Duration::from_secs(1));
        assert_eq!(reconnect_delay(2, 60), Duration::from_secs(2));
        assert_eq!(reconnect_delay(3, 60), Duration::from_secs(4));
        assert_eq!(reconnect_delay(6, 60), Duration::from_secs(32));
        assert_eq!(reconnect_delay(7, 60), Duration::from_secs(60));
        assert_eq!(reconnect_delay(100, 60), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let conn = FeedConnection::new(test_config());
        let (handle, mut updates) = conn.spawn();

        handle.shutdown();
        handle.shutdown();
        handle.join().await;

        // The loop always emits a final Disconnected before exiting.
        let mut saw_disconnect = false;
        while let Some(update) = updates.recv().await {
            if matches!(update, FeedUpdate::Disconnected) {
                saw_disconnect = true;
            }
        }
        assert!(saw_disconnect);
    }

    #[tokio::test]
    async fn test_send_after_shutdown_errors() {
        let conn = FeedConnection::new(test_config());
        let (handle, mut updates) = conn.spawn();
        handle.shutdown();
        // The update channel closes only once the task has exited.
        while updates.recv().await.is_some() {}
        assert_eq!(handle.state(), ConnectionState::Stopped);
        assert!(matches!(
            handle.send_text("{}".to_string()),
            Err(FeedError::Shutdown)
        ));
    }
}
