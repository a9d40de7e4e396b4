// src/main.rs
use crate::config::AppConfig;
use crate::connectors::binance::BinanceClient;
use crate::connectors::traits::AccountClient;
use crate::core::engine::MonitorEngine;
use crate::core::shutdown;
use crate::core::state::StateStore;
use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod connectors;
mod core;
mod error;
mod tui;
mod types;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // 1. Load Configuration
    let config = AppConfig::new().context("Failed to load configuration")?;

    // 2. Logging goes to a file; the terminal belongs to the TUI.
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "watcher.log");
    let (log_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(log_writer)
        .with_ansi(false)
        .init();

    info!(
        "Watcher starting. REST: {}, streams: {}",
        config.rest_base_url, config.ws_base_url
    );

    // 3. Initialize Components
    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let client: Arc<dyn AccountClient> = Arc::new(BinanceClient::from_config(&config));
    let store = Arc::new(StateStore::new(config.balance_asset.clone(), ui_tx.clone()));
    let engine = MonitorEngine::new(config, client, store, ui_tx);

    let (trigger, shutdown) = shutdown::channel();

    // 4. Run Engine
    let engine_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { engine.run(shutdown).await })
    };

    // 5. Ctrl+C from outside the terminal (raw mode swallows it inside the TUI).
    let trigger = Arc::new(trigger);
    {
        let trigger = trigger.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received");
                trigger.trigger();
            }
        });
    }

    // 6. Run TUI until the user quits or shutdown is requested.
    let ui_result = tui::run(ui_rx, shutdown).await;

    trigger.trigger();
    info!("Shutting down");
    match tokio::time::timeout(Duration::from_secs(5), engine_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Engine task failed: {}", e),
        Err(_) => error!("Engine did not stop within 5s"),
    }

    if let Err(e) = ui_result {
        eprintln!("Fatal UI Error: {}", e);
        return Err(e);
    }
    Ok(())
}
