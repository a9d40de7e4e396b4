// src/error.rs
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Failures of the REST side of a session.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("snapshot load failed: {0:#}")]
    Snapshot(anyhow::Error),

    #[error("session key request failed: {0:#}")]
    SessionKey(anyhow::Error),
}

/// Failures that end one stream connection. All of them are recoverable.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("WebSocket connection failed: {0}")]
    Connect(String),

    #[error("connection timeout")]
    Timeout,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("closed by server")]
    Closed,

    #[error("stream ended unexpectedly")]
    Ended,

    #[error("session key expired")]
    SessionExpired,

    #[error("subscription request failed: {0}")]
    Subscribe(#[from] serde_json::Error),
}

/// A single inbound message that could not be turned into an event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}
