use crate::types::{AccountSnapshot, Order, Position};
use anyhow::Result;
use async_trait::async_trait;

/// Read-only REST access to one futures account.
#[async_trait]
pub trait AccountClient: Send + Sync {
    /// Every position the exchange reports, including flat ones.
    async fn fetch_positions(&self) -> Result<Vec<Position>>;

    async fn fetch_open_orders(&self) -> Result<Vec<Order>>;

    async fn fetch_account(&self) -> Result<AccountSnapshot>;

    /// Creates the short-lived key that authorizes the user data stream.
    async fn create_listen_key(&self) -> Result<String>;
}
