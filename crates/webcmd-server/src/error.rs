//! Error types for the command server.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pty error: {0}")]
    Pty(String),

    #[error("cannot resolve listen address {0}")]
    Resolve(String),
}
