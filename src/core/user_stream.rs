// src/core/user_stream.rs
use crate::connectors::messages::{decode_user_event, UserEvent};
use crate::core::shutdown::Shutdown;
use crate::core::snapshot::SessionKey;
use crate::core::state::StateStore;
use crate::error::StreamError;
use crate::types::{StreamKind, StreamState, UiEvent};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Private account stream: balance and order changes for one listen key.
pub struct UserEventStream {
    ws_base_url: String,
    connect_timeout: Duration,
    store: Arc<StateStore>,
    ui_sender: mpsc::UnboundedSender<UiEvent>,
    state: StreamState,
}

impl UserEventStream {
    pub fn new(
        ws_base_url: &str,
        connect_timeout: Duration,
        store: Arc<StateStore>,
        ui_sender: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            ws_base_url: ws_base_url.trim_end_matches('/').to_string(),
            connect_timeout,
            store,
            ui_sender,
            state: StreamState::Disconnected,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    fn set_state(&mut self, state: StreamState) {
        if self.state == state {
            return;
        }
        debug!("User stream: {} -> {}", self.state, state);
        self.state = state;
        let _ = self.ui_sender.send(UiEvent::Stream(StreamKind::User, state));
    }

    fn log_ui(&self, msg: String) {
        let _ = self.ui_sender.send(UiEvent::Log(msg));
    }

    fn endpoint(&self, key: &SessionKey) -> String {
        format!("{}/ws/{}", self.ws_base_url, key.as_str())
    }

    /// Runs a single connection to completion.
    ///
    /// `Ok(())` means shutdown was requested; any `Err` means the connection is gone
    /// and the caller decides how to recover.
    pub async fn run(
        &mut self,
        key: &SessionKey,
        shutdown: &mut Shutdown,
    ) -> Result<(), StreamError> {
        self.set_state(StreamState::Connecting);
        let url = self.endpoint(key);

        let connected = tokio::select! {
            res = timeout(self.connect_timeout, connect_async(url.as_str())) => res,
            _ = shutdown.triggered() => {
                self.set_state(StreamState::Disconnected);
                return Ok(());
            }
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
        info!("User data stream connected");
        self.log_ui("User data stream connected".to_string());

        let (mut write, mut read) = ws_stream.split();

        let result = loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.handle_text(&text) {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break Err(e.into());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("User data stream closed by server: {:?}", frame);
                        break Err(StreamError::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(StreamError::WebSocket(e)),
                    None => break Err(StreamError::Ended),
                },
                _ = shutdown.triggered() => {
                    let _ = write.send(Message::Close(None)).await;
                    break Ok(());
                }
            }
        };

        match &result {
            Ok(()) => self.set_state(StreamState::Disconnected),
            Err(e) => {
                self.set_state(StreamState::Closed);
                self.log_ui(format!("User data stream lost: {e}"));
            }
        }
        result
    }

    /// Applies one inbound text frame. Undecodable frames are dropped; only an
    /// expired listen key ends the connection.
    fn handle_text(&self, text: &str) -> Result<(), StreamError> {
        let event = match decode_user_event(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping user stream message: {e}");
                return Ok(());
            }
        };

        match event {
            UserEvent::AccountUpdate { update } => {
                let balances = update
                    .balances
                    .iter()
                    .map(|b| (b.asset.as_str(), b.wallet_balance));
                if self.store.apply_account_update(balances) {
                    debug!("Account update applied");
                }
            }
            UserEvent::OrderTradeUpdate { order } => {
                let terminal = order.status.is_terminal();
                if self.store.apply_order_status(order.order_id, order.status) && terminal {
                    info!(
                        "Order {} {} {}, removed",
                        order.order_id, order.symbol, order.status
                    );
                }
            }
            UserEvent::ListenKeyExpired => {
                warn!("Listen key expired");
                return Err(StreamError::SessionExpired);
            }
            UserEvent::Unknown => debug!("Ignoring unhandled user event"),
        }
        Ok(())
    }
}
