// src/core/engine.rs
use crate::config::{AppConfig, UserStreamFailurePolicy};
use crate::connectors::traits::AccountClient;
use crate::core::backoff::Backoff;
use crate::core::market_stream::MarketPriceStream;
use crate::core::shutdown::{self, Shutdown};
use crate::core::snapshot::{SessionKeyManager, SnapshotLoader};
use crate::core::state::StateStore;
use crate::core::user_stream::UserEventStream;
use crate::types::UiEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Session supervisor: snapshot, session key, then both streams until something breaks.
pub struct MonitorEngine {
    config: AppConfig,
    client: Arc<dyn AccountClient>,
    store: Arc<StateStore>,
    ui_sender: mpsc::UnboundedSender<UiEvent>,
}

impl MonitorEngine {
    pub fn new(
        config: AppConfig,
        client: Arc<dyn AccountClient>,
        store: Arc<StateStore>,
        ui_sender: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            config,
            client,
            store,
            ui_sender,
        }
    }

    fn send_ui_log(&self, msg: String) {
        if self.ui_sender.send(UiEvent::Log(msg)).is_err() {
            error!("UI Channel closed! Interface is likely dead.");
        }
    }

    /// Runs sessions back to back until `shutdown` fires. Nothing in here is fatal:
    /// REST and stream failures are logged and retried.
    pub async fn run(&self, mut shutdown: Shutdown) {
        let streams = &self.config.streams;
        info!(
            "Engine starting. User stream failure policy: {:?}",
            streams.on_user_stream_failure
        );

        let loader = SnapshotLoader::new(self.client.clone());
        let mut keys = SessionKeyManager::new(
            self.client.clone(),
            Backoff::exponential(
                Duration::from_millis(streams.key_retry_initial_ms),
                Duration::from_millis(streams.key_retry_max_ms),
            ),
        );
        let mut session_backoff = Backoff::fixed(streams.session_retry_delay());

        loop {
            if shutdown.is_triggered() {
                break;
            }

            match loader.fetch_snapshot().await {
                Ok(snapshot) => self.store.apply_snapshot(snapshot),
                Err(e) => {
                    warn!("{e}, retrying in {:?}", streams.session_retry_delay());
                    self.send_ui_log(format!("Snapshot failed: {e}"));
                    if !session_backoff.wait(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            }

            self.run_session(&mut keys, &mut shutdown).await;

            if shutdown.is_triggered() || !session_backoff.wait(&mut shutdown).await {
                break;
            }
            info!("Restarting session from a fresh snapshot");
            self.send_ui_log("Resynchronizing account".to_string());
        }

        info!("Engine stopped");
    }

    /// One session: the market stream runs alongside for its whole length, the user
    /// stream is (re)connected according to the failure policy.
    async fn run_session(&self, keys: &mut SessionKeyManager, shutdown: &mut Shutdown) {
        let streams = &self.config.streams;
        let (session_trigger, session_shutdown) = shutdown::channel();

        let market = MarketPriceStream::new(
            &self.config.ws_base_url,
            streams.connect_timeout(),
            streams.market_reconnect_delay(),
            self.store.clone(),
            self.ui_sender.clone(),
        );
        let market_task = tokio::spawn(market.run(session_shutdown));

        let mut user_stream = UserEventStream::new(
            &self.config.ws_base_url,
            streams.connect_timeout(),
            self.store.clone(),
            self.ui_sender.clone(),
        );
        let mut reconnect = Backoff::fixed(streams.user_reconnect_delay());

        loop {
            let Some(key) = keys.acquire_with_retry(shutdown).await else {
                break;
            };

            match user_stream.run(&key, shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    warn!("User data stream {}: {e}", user_stream.state());
                    match streams.on_user_stream_failure {
                        UserStreamFailurePolicy::FullResync => break,
                        UserStreamFailurePolicy::Reconnect => {
                            info!(
                                "Reconnecting user data stream in {:?}",
                                streams.user_reconnect_delay()
                            );
                            if !reconnect.wait(shutdown).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        session_trigger.trigger();
        if let Err(e) = market_task.await {
            error!("Market stream task failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::core::snapshot::mock::MockClient;
    use crate::types::{Order, OrderStatus, Side};
    use futures_util::SinkExt;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    fn order(id: u64) -> Order {
        Order {
            id,
            symbol: "BTCUSDT".to_string(),
            order_type: "LIMIT".to_string(),
            side: Side::Buy,
            price: Decimal::from(50_000),
            quantity: Decimal::ONE,
            stop_price: None,
            status: OrderStatus::New,
        }
    }

    /// User data endpoint that fills order 1 and hangs up, on every connection.
    async fn flaky_user_stream() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(tcp).await else {
                        return;
                    };
                    let fill = r#"{"e":"ORDER_TRADE_UPDATE","o":{"s":"BTCUSDT","i":1,"X":"FILLED"}}"#;
                    let _ = ws.send(Message::Text(fill.to_string())).await;
                    let _ = ws.close(None).await;
                });
            }
        });
        (format!("ws://{addr}"), server)
    }

    fn engine_for(
        ws_base_url: String,
        policy: UserStreamFailurePolicy,
        client: Arc<MockClient>,
    ) -> (MonitorEngine, Arc<StateStore>) {
        let mut config = test_config();
        config.ws_base_url = ws_base_url;
        config.streams.user_reconnect_ms = 20;
        config.streams.session_retry_ms = 20;
        config.streams.key_retry_initial_ms = 20;
        config.streams.key_retry_max_ms = 20;
        config.streams.on_user_stream_failure = policy;

        let (tx, _rx) = mpsc::unbounded_channel();
        let store = Arc::new(StateStore::new("USDT", tx.clone()));
        (MonitorEngine::new(config, client, store.clone(), tx), store)
    }

    async fn wait_for_calls(client: &MockClient, counter: &AtomicUsize, at_least: usize) {
        timeout(Duration::from_secs(10), async {
            while counter.load(Ordering::SeqCst) < at_least {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("calls so far: {:?}", client.calls.lock().unwrap()));
    }

    fn count(client: &MockClient, call: &str) -> usize {
        client
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == call)
            .count()
    }

    #[tokio::test]
    async fn test_full_resync_reloads_snapshot_after_stream_loss() {
        let (url, server) = flaky_user_stream().await;
        let client = Arc::new(MockClient {
            orders: vec![order(1), order(2)],
            ..Default::default()
        });
        let (engine, store) =
            engine_for(url, UserStreamFailurePolicy::FullResync, client.clone());
        let (trigger, shutdown) = shutdown::channel();
        let engine = tokio::spawn(async move { engine.run(shutdown).await });

        wait_for_calls(&client, &client.key_requests, 3).await;
        trigger.trigger();
        timeout(Duration::from_secs(5), engine).await.unwrap().unwrap();
        server.abort();

        // Every lost stream rebuilt the session from REST first.
        assert!(count(&client, "positions") >= 3);
        assert!(count(&client, "positions") >= count(&client, "listen_key"));
        // The last session may have been cut before its fill arrived.
        assert!(!store.view().orders.is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_policy_keeps_state() {
        let (url, server) = flaky_user_stream().await;
        let client = Arc::new(MockClient {
            orders: vec![order(1), order(2)],
            ..Default::default()
        });
        let (engine, store) =
            engine_for(url, UserStreamFailurePolicy::Reconnect, client.clone());
        let (trigger, shutdown) = shutdown::channel();
        let engine = tokio::spawn(async move { engine.run(shutdown).await });

        wait_for_calls(&client, &client.key_requests, 3).await;
        trigger.trigger();
        timeout(Duration::from_secs(5), engine).await.unwrap().unwrap();
        server.abort();

        assert_eq!(count(&client, "positions"), 1);
        let ids: Vec<u64> = store.view().orders.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_snapshot_failure_retries_session() {
        let client = Arc::new(MockClient {
            fail_positions: AtomicUsize::new(2),
            ..Default::default()
        });
        // Nothing listens here; the user stream keeps failing to dial.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let (engine, _store) =
            engine_for(url, UserStreamFailurePolicy::Reconnect, client.clone());
        let (trigger, shutdown) = shutdown::channel();
        let engine = tokio::spawn(async move { engine.run(shutdown).await });

        wait_for_calls(&client, &client.key_requests, 1).await;
        trigger.trigger();
        timeout(Duration::from_secs(5), engine).await.unwrap().unwrap();

        assert_eq!(count(&client, "positions"), 3);
        // Orders and account are only requested by the attempt that got positions.
        assert_eq!(count(&client, "orders"), 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let client = Arc::new(MockClient::default());
        let (engine, _store) = engine_for(
            "ws://127.0.0.1:9".to_string(),
            UserStreamFailurePolicy::FullResync,
            client.clone(),
        );
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();

        timeout(Duration::from_secs(5), engine.run(shutdown))
            .await
            .unwrap();
        assert!(client.calls.lock().unwrap().is_empty());
    }
}
