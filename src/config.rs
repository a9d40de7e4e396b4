// src/config.rs

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// What the supervisor does when the user-event stream drops.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserStreamFailurePolicy {
    /// Tear the session down and rebuild it from a fresh REST snapshot.
    FullResync,
    /// Keep the current state, fetch a new listen key and reconnect only the stream.
    Reconnect,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    pub connect_timeout_ms: u64,
    pub market_reconnect_ms: u64,
    pub user_reconnect_ms: u64,
    pub session_retry_ms: u64,
    pub key_retry_initial_ms: u64,
    pub key_retry_max_ms: u64,
    pub on_user_stream_failure: UserStreamFailurePolicy,
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn market_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.market_reconnect_ms)
    }

    pub fn user_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.user_reconnect_ms)
    }

    pub fn session_retry_delay(&self) -> Duration {
        Duration::from_millis(self.session_retry_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub secret_key: String,
    pub rest_base_url: String,
    pub ws_base_url: String,
    /// Asset whose wallet balance account updates are applied for.
    pub balance_asset: String,
    pub recv_window_ms: u64,
    pub log_dir: String,
    pub streams: StreamConfig,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Self::defaults(Config::builder())?
            .add_source(File::with_name("Settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("api_key", "")?
            .set_default("secret_key", "")?
            .set_default("rest_base_url", "https://fapi.binance.com")?
            .set_default("ws_base_url", "wss://fstream.binance.com")?
            .set_default("balance_asset", "USDT")?
            .set_default("recv_window_ms", 5000)?
            .set_default("log_dir", "logs")?
            .set_default("streams.connect_timeout_ms", 10_000)?
            .set_default("streams.market_reconnect_ms", 1_000)?
            .set_default("streams.user_reconnect_ms", 3_000)?
            .set_default("streams.session_retry_ms", 3_000)?
            .set_default("streams.key_retry_initial_ms", 1_000)?
            .set_default("streams.key_retry_max_ms", 60_000)?
            .set_default("streams.on_user_stream_failure", "full_resync")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Message("api_key is not set (APP_API_KEY)".into()));
        }
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::Message(
                "secret_key is not set (APP_SECRET_KEY)".into(),
            ));
        }
        for (key, value, schemes) in [
            ("rest_base_url", &self.rest_base_url, ["http", "https"]),
            ("ws_base_url", &self.ws_base_url, ["ws", "wss"]),
        ] {
            let url = Url::parse(value)
                .map_err(|e| ConfigError::Message(format!("{key} '{value}': {e}")))?;
            if !schemes.contains(&url.scheme()) {
                return Err(ConfigError::Message(format!(
                    "{key} '{value}': unsupported scheme {}",
                    url.scheme()
                )));
            }
        }
        if self.streams.key_retry_initial_ms > self.streams.key_retry_max_ms {
            return Err(ConfigError::Message(
                "streams.key_retry_initial_ms exceeds streams.key_retry_max_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        api_key: "key".to_string(),
        secret_key: "secret".to_string(),
        rest_base_url: "https://fapi.binance.com".to_string(),
        ws_base_url: "wss://fstream.binance.com".to_string(),
        balance_asset: "USDT".to_string(),
        recv_window_ms: 5000,
        log_dir: "logs".to_string(),
        streams: StreamConfig {
            connect_timeout_ms: 10_000,
            market_reconnect_ms: 1_000,
            user_reconnect_ms: 3_000,
            session_retry_ms: 3_000,
            key_retry_initial_ms: 1_000,
            key_retry_max_ms: 60_000,
            on_user_stream_failure: UserStreamFailurePolicy::FullResync,
        },
    }
}
