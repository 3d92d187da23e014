//! Error types for the client transport.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("transport closed")]
    Closed,
}

#[cfg(test)]
impl TransportError {
    /// What a connect to a port nobody listens on reports.
    pub(crate) fn refused() -> Self {
        TransportError::WebSocket(tokio_tungstenite::tungstenite::Error::Io(
            std::io::ErrorKind::ConnectionRefused.into(),
        ))
    }
}
