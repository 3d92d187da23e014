//! Byte transports and the connectors that open them.
//!
//! A [`Transport`] is the client half of a channel pair: inbound
//! [`TransportEvent`]s and outbound byte chunks. The channel closing is the
//! socket's close. [`WsConnector`] backs it with a WebSocket; tests back it
//! with the [`TransportPeer`] directly.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use webcmd_core::Endpoint;

use crate::error::TransportError;

/// Capacity of each direction of a transport channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Something the remote side of a transport reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw bytes for the surface.
    Data(Vec<u8>),
    /// A socket error. Always followed by the channel closing.
    Error(String),
}

/// Client half of a transport.
pub struct Transport {
    incoming: mpsc::Receiver<TransportEvent>,
    outgoing: mpsc::Sender<Vec<u8>>,
}

/// Remote half of a transport.
pub struct TransportPeer {
    pub incoming: mpsc::Sender<TransportEvent>,
    pub outgoing: mpsc::Receiver<Vec<u8>>,
}

impl Transport {
    /// Create a connected transport / peer pair.
    pub fn pair(capacity: usize) -> (Transport, TransportPeer) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        (
            Transport {
                incoming: in_rx,
                outgoing: out_tx,
            },
            TransportPeer {
                incoming: in_tx,
                outgoing: out_rx,
            },
        )
    }

    /// Next inbound event, or `None` once the socket has closed.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.incoming.recv().await
    }

    /// Queue bytes for the remote side.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.outgoing
            .send(bytes)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Opens transports to an endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Start connecting. Resolves once the socket is open.
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Transport, TransportError>>;
}

// ---------------------------------------------------------------------------
// WebSocket connector
// ---------------------------------------------------------------------------

/// Connects over WebSocket with `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    capacity: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl Connector for WsConnector {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Transport, TransportError>> {
        let url = endpoint.as_str().to_owned();
        let capacity = self.capacity;
        Box::pin(async move {
            let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
            tracing::debug!(url = %url, "ws transport: connected");
            let (transport, peer) = Transport::pair(capacity);
            tokio::spawn(pump_websocket(ws_stream, peer));
            Ok(transport)
        })
    }
}

/// Move frames between the socket and the peer channels until either side
/// goes away. Dropping the peer closes the transport.
async fn pump_websocket(ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>, peer: TransportPeer) {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let TransportPeer {
        incoming,
        mut outgoing,
    } = peer;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let data = match msg {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            let _ = incoming.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(frame = ?frame, "ws transport: close frame received");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "ws transport: read error");
                        let _ = incoming.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        tracing::debug!("ws transport: stream ended");
                        break;
                    }
                };
                if incoming.send(TransportEvent::Data(data)).await.is_err() {
                    // Binding disposed.
                    break;
                }
            }
            out = outgoing.recv() => {
                match out {
                    Some(bytes) => {
                        let msg = match String::from_utf8(bytes) {
                            Ok(text) => Message::Text(text),
                            Err(e) => Message::Binary(e.into_bytes()),
                        };
                        if let Err(e) = ws_tx.send(msg).await {
                            let _ = incoming.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    None => {
                        let _ = ws_tx.close().await;
                        break;
                    }
                }
            }
        }
    }
}
