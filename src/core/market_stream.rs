// src/core/market_stream.rs
use crate::connectors::messages::{
    decode_market_frame, mark_price_topic, MarketFrame, SubscribeRequest,
};
use crate::core::backoff::Backoff;
use crate::core::shutdown::Shutdown;
use crate::core::state::StateStore;
use crate::error::StreamError;
use crate::types::{StreamKind, StreamState, UiEvent};
use futures_util::{Sink, SinkExt, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, info, trace, warn};

/// Why a healthy connection was left.
enum Exit {
    Shutdown,
    /// Nothing left to watch; reconnect once positions appear again.
    Idle,
}

/// Mark-price feed for every symbol the store holds, over one combined stream.
pub struct MarketPriceStream {
    ws_base_url: String,
    connect_timeout: Duration,
    store: Arc<StateStore>,
    ui_sender: mpsc::UnboundedSender<UiEvent>,
    reconnect_delay: Duration,
    backoff: Backoff,
    state: StreamState,
    request_id: u64,
}

impl MarketPriceStream {
    pub fn new(
        ws_base_url: &str,
        connect_timeout: Duration,
        reconnect_delay: Duration,
        store: Arc<StateStore>,
        ui_sender: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            ws_base_url: ws_base_url.trim_end_matches('/').to_string(),
            connect_timeout,
            store,
            ui_sender,
            reconnect_delay,
            backoff: Backoff::fixed(reconnect_delay),
            state: StreamState::Disconnected,
            request_id: 0,
        }
    }

    fn set_state(&mut self, state: StreamState) {
        if self.state == state {
            return;
        }
        debug!("Market stream: {} -> {}", self.state, state);
        self.state = state;
        let _ = self.ui_sender.send(UiEvent::Stream(StreamKind::Market, state));
    }

    fn endpoint(&self, symbols: &BTreeSet<String>) -> String {
        let topics: Vec<String> = symbols.iter().map(|s| mark_price_topic(s)).collect();
        format!("{}/stream?streams={}", self.ws_base_url, topics.join("/"))
    }

    /// Runs until shutdown, reconnecting after a fixed delay on every failure.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        let mut symbols_rx = self.store.subscribe_symbols();
        info!("Market stream task started");

        loop {
            if shutdown.is_triggered() {
                break;
            }

            let symbols = symbols_rx.borrow_and_update().clone();
            if symbols.is_empty() {
                debug!("No positions held, market stream idle");
                tokio::select! {
                    changed = symbols_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = shutdown.triggered() => break,
                }
            }

            match self
                .run_connection(symbols, &mut symbols_rx, &mut shutdown)
                .await
            {
                Ok(Exit::Shutdown) => break,
                Ok(Exit::Idle) => continue,
                Err(e) => {
                    warn!(
                        "Market stream error: {e}, reconnecting in {:?}",
                        self.reconnect_delay
                    );
                    let _ = self
                        .ui_sender
                        .send(UiEvent::Log(format!("Market stream lost: {e}")));
                    if !self.backoff.wait(&mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.set_state(StreamState::Disconnected);
        info!("Market stream task finished");
    }

    async fn run_connection(
        &mut self,
        symbols: BTreeSet<String>,
        symbols_rx: &mut watch::Receiver<BTreeSet<String>>,
        shutdown: &mut Shutdown,
    ) -> Result<Exit, StreamError> {
        self.set_state(StreamState::Connecting);
        let url = self.endpoint(&symbols);

        let connected = tokio::select! {
            res = timeout(self.connect_timeout, connect_async(url.as_str())) => res,
            _ = shutdown.triggered() => return Ok(Exit::Shutdown),
        };
        let (ws_stream, _) = match connected {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                self.set_state(StreamState::Disconnected);
                return Err(StreamError::Connect(e.to_string()));
            }
            Err(_) => {
                self.set_state(StreamState::Disconnected);
                return Err(StreamError::Timeout);
            }
        };

        self.set_state(StreamState::Connected);
        info!("Market stream connected for {} symbols", symbols.len());

        let (mut write, mut read) = ws_stream.split();
        let mut subscribed = symbols;

        let result = loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break Err(e.into());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("Market stream closed by server: {:?}", frame);
                        break Err(StreamError::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(StreamError::WebSocket(e)),
                    None => break Err(StreamError::Ended),
                },
                changed = symbols_rx.changed() => {
                    if changed.is_err() {
                        let _ = write.send(Message::Close(None)).await;
                        break Ok(Exit::Shutdown);
                    }
                    let wanted = symbols_rx.borrow_and_update().clone();
                    if wanted.is_empty() {
                        info!("All positions closed, leaving market stream");
                        let _ = write.send(Message::Close(None)).await;
                        break Ok(Exit::Idle);
                    }
                    if let Err(e) = self.resubscribe(&mut write, &subscribed, &wanted).await {
                        break Err(e);
                    }
                    subscribed = wanted;
                }
                _ = shutdown.triggered() => {
                    let _ = write.send(Message::Close(None)).await;
                    break Ok(Exit::Shutdown);
                }
            }
        };

        self.set_state(match &result {
            Ok(_) => StreamState::Disconnected,
            Err(_) => StreamState::Closed,
        });
        result
    }

    /// Moves the open connection from `current` to `wanted` topics.
    async fn resubscribe<S>(
        &mut self,
        write: &mut S,
        current: &BTreeSet<String>,
        wanted: &BTreeSet<String>,
    ) -> Result<(), StreamError>
    where
        S: Sink<Message, Error = WsError> + Unpin,
    {
        let (unsubscribe, subscribe) = subscription_diff(current, wanted);
        for (method, params) in [("UNSUBSCRIBE", unsubscribe), ("SUBSCRIBE", subscribe)] {
            if params.is_empty() {
                continue;
            }
            self.request_id += 1;
            let request = SubscribeRequest {
                method,
                params,
                id: self.request_id,
            };
            info!("Market stream {} {:?}", method, request.params);
            write
                .send(Message::Text(serde_json::to_string(&request)?))
                .await?;
        }
        Ok(())
    }

    fn handle_text(&self, text: &str) {
        match decode_market_frame(text) {
            Ok(MarketFrame::Tick { stream, data }) => {
                if !self.store.apply_mark_price(&data.symbol, data.mark_price) {
                    trace!("Tick on {} for untracked {} dropped", stream, data.symbol);
                }
            }
            Ok(MarketFrame::Reply { id, result }) => {
                debug!("Subscription reply {}: {:?}", id, result);
            }
            Err(e) => warn!("Dropping market stream message: {e}"),
        }
    }
}

/// Topics to drop and topics to add when moving from `current` to `wanted`.
fn subscription_diff(
    current: &BTreeSet<String>,
    wanted: &BTreeSet<String>,
) -> (Vec<String>, Vec<String>) {
    let removed = current
        .difference(wanted)
        .map(|s| mark_price_topic(s))
        .collect();
    let added = wanted
        .difference(current)
        .map(|s| mark_price_topic(s))
        .collect();
    (removed, added)
}
