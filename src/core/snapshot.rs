// src/core/snapshot.rs
use crate::connectors::traits::AccountClient;
use crate::core::backoff::Backoff;
use crate::core::shutdown::Shutdown;
use crate::error::SyncError;
use crate::types::Snapshot;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Pulls the REST view of the account that a session starts from.
pub struct SnapshotLoader {
    client: Arc<dyn AccountClient>,
}

impl SnapshotLoader {
    pub fn new(client: Arc<dyn AccountClient>) -> Self {
        Self { client }
    }

    /// All three parts or nothing; flat positions are dropped.
    pub async fn fetch_snapshot(&self) -> Result<Snapshot, SyncError> {
        let positions = self
            .client
            .fetch_positions()
            .await
            .map_err(SyncError::Snapshot)?;
        let reported = positions.len();
        let positions: Vec<_> = positions
            .into_iter()
            .filter(|p| !p.amount.is_zero())
            .collect();

        let orders = self
            .client
            .fetch_open_orders()
            .await
            .map_err(SyncError::Snapshot)?;
        let account = self
            .client
            .fetch_account()
            .await
            .map_err(SyncError::Snapshot)?;

        info!(
            "Snapshot loaded: {} open positions (of {} reported), {} open orders, wallet {}",
            positions.len(),
            reported,
            orders.len(),
            account.wallet_balance
        );

        Ok(Snapshot {
            positions,
            orders,
            account,
        })
    }
}

/// Listen key for the user data stream. Kept out of `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionKey {
    fn from(key: String) -> Self {
        SessionKey(key)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

pub struct SessionKeyManager {
    client: Arc<dyn AccountClient>,
    backoff: Backoff,
}

impl SessionKeyManager {
    pub fn new(client: Arc<dyn AccountClient>, backoff: Backoff) -> Self {
        Self { client, backoff }
    }

    pub async fn acquire_session_key(&self) -> Result<SessionKey, SyncError> {
        let key = self
            .client
            .create_listen_key()
            .await
            .map_err(SyncError::SessionKey)?;
        Ok(SessionKey::from(key))
    }

    /// Keeps asking until a key arrives. `None` only on shutdown.
    pub async fn acquire_with_retry(&mut self, shutdown: &mut Shutdown) -> Option<SessionKey> {
        loop {
            if shutdown.is_triggered() {
                return None;
            }
            match self.acquire_session_key().await {
                Ok(key) => {
                    self.backoff.reset();
                    info!("Session key acquired");
                    return Some(key);
                }
                Err(e) => {
                    warn!("{e}, retrying");
                    if !self.backoff.wait(shutdown).await {
                        return None;
                    }
                }
            }
        }
    }
}
