//! Maker bot entry point
//!
//! Loads config, connects the feed and runs the engine until Ctrl+C.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use maker_engine::client::ClobClient;
use maker_engine::config::MakerConfig;
use maker_engine::engine::MakerEngine;
use maker_engine::utils::{init_tracing, ShutdownManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config_path =
        std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    info!("Loading config from {}", config_path);
    let config = MakerConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path))?;

    let client = Arc::new(ClobClient::new(&config.api).context("building CLOB client")?);
    let engine = MakerEngine::new(config, client.clone(), client);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.spawn_signal_handler();

    engine.run(shutdown).await
}
