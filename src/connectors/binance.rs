// src/connectors/binance.rs
use crate::config::AppConfig;
use crate::connectors::messages::{AccountInfo, ListenKeyResponse, OpenOrder, PositionRisk};
use crate::connectors::traits::AccountClient;
use crate::types::{AccountSnapshot, Order, Position};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// USDT-M futures REST client.
pub struct BinanceClient {
    api_key: String,
    secret_key: String,
    http_client: Client,
    base_rest_url: String,
    recv_window_ms: u64,
}

impl BinanceClient {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key,
            secret_key,
            http_client: Client::new(),
            base_rest_url: "https://fapi.binance.com".to_string(),
            recv_window_ms: 5000,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_rest_url: config.rest_base_url.trim_end_matches('/').to_string(),
            recv_window_ms: config.recv_window_ms,
            ..Self::new(config.api_key.clone(), config.secret_key.clone())
        }
    }

    /// Hex-encoded HMAC-SHA256 of `query_string` under the secret key.
    fn sign(&self, query_string: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .context("Invalid secret key length")?;
        mac.update(query_string.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn sign_and_build_query(&self, params: Vec<(&str, String)>) -> Result<String> {
        let mut params = params;
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query_string = serde_urlencoded::to_string(&params)?;
        let signature = self.sign(&query_string)?;

        Ok(format!("{}&signature={}", query_string, signature))
    }

    async fn send_signed_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T> {
        let full_query = self.sign_and_build_query(params)?;
        let url = format!("{}{}?{}", self.base_rest_url, endpoint, full_query);
        self.send(method, &url).await
    }

    /// Endpoints that only need the API key header (listen key management).
    async fn send_keyed_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        endpoint: &str,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_rest_url, endpoint);
        self.send(method, &url).await
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, method: Method, url: &str) -> Result<T> {
        debug!("{} {}", method, url.split('?').next().unwrap_or(url));

        let response = self
            .http_client
            .request(method, url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?
            .error_for_status()?;

        let json_resp = response.json::<T>().await?;
        Ok(json_resp)
    }
}

#[async_trait]
impl AccountClient for BinanceClient {
    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        let resp: Vec<PositionRisk> = self
            .send_signed_request(Method::GET, "/fapi/v2/positionRisk", vec![])
            .await
            .context("positionRisk")?;
        Ok(resp.into_iter().map(Position::from).collect())
    }

    async fn fetch_open_orders(&self) -> Result<Vec<Order>> {
        let resp: Vec<OpenOrder> = self
            .send_signed_request(Method::GET, "/fapi/v1/openOrders", vec![])
            .await
            .context("openOrders")?;
        Ok(resp.into_iter().map(Order::from).collect())
    }

    async fn fetch_account(&self) -> Result<AccountSnapshot> {
        let resp: AccountInfo = self
            .send_signed_request(Method::GET, "/fapi/v2/account", vec![])
            .await
            .context("account")?;
        Ok(resp.into())
    }

    async fn create_listen_key(&self) -> Result<String> {
        let resp: ListenKeyResponse = self
            .send_keyed_request(Method::POST, "/fapi/v1/listenKey")
            .await
            .context("listenKey")?;
        Ok(resp.listen_key)
    }
}
