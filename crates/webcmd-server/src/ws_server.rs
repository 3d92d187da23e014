use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::output_hub::OutputHub;

/// Default maximum number of concurrent WebSocket connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Default upgrade path.
pub const DEFAULT_WS_PATH: &str = "/ws";

// ---------------------------------------------------------------------------
// Path check
// ---------------------------------------------------------------------------

/// Accept the upgrade only on `path`; anything else gets HTTP 404.
fn check_path(path: &str, req: &Request, resp: Response) -> Result<Response, ErrorResponse> {
    if req.uri().path() == path {
        return Ok(resp);
    }
    tracing::debug!(path = %req.uri().path(), "ws: upgrade on unknown path");
    let err_resp = http::Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(Some("Not Found".into()))
        .expect("building error response");
    Err(err_resp)
}

// ---------------------------------------------------------------------------
// WsServer
// ---------------------------------------------------------------------------

/// WebSocket server streaming an [`OutputHub`] to every client.
///
/// Each client first receives the replay buffer as one binary frame, then
/// live output as binary frames. Text frames from clients are keystrokes.
pub struct WsServer {
    addr: SocketAddr,
    hub: Arc<OutputHub>,
    cancel: CancellationToken,
    max_connections: usize,
    path: Arc<str>,
    input: Option<mpsc::Sender<Vec<u8>>>,
}

impl WsServer {
    pub fn new(addr: SocketAddr, hub: Arc<OutputHub>, cancel: CancellationToken) -> Self {
        Self {
            addr,
            hub,
            cancel,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            path: Arc::from(DEFAULT_WS_PATH),
            input: None,
        }
    }

    /// Set the maximum number of concurrent WebSocket connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Arc::from(path);
        self
    }

    /// Forward keystrokes from clients to `input`. Without it they are
    /// logged and dropped.
    pub fn with_input(mut self, input: mpsc::Sender<Vec<u8>>) -> Self {
        self.input = Some(input);
        self
    }

    /// Bind TCP and serve until the cancellation token fires.
    pub async fn run(&self) -> std::io::Result<()> {
        let (listener, _) = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    /// Useful when binding to port 0 to get an OS-assigned ephemeral port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_connections = self.max_connections, "ws server listening");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    tracing::warn!(
                                        peer = %peer,
                                        max = self.max_connections,
                                        "ws: connection limit reached, rejecting"
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };
                            tracing::debug!(peer = %peer, "ws: TCP connection accepted");
                            let hub = Arc::clone(&self.hub);
                            let input = self.input.clone();
                            let cancel = self.cancel.clone();
                            let path = Arc::clone(&self.path);
                            tokio::spawn(async move {
                                let _permit = permit;
                                let callback = move |req: &Request, resp: Response| check_path(&path, req, resp);
                                match tokio_tungstenite::accept_hdr_async(stream, callback).await {
                                    Ok(ws_stream) => {
                                        tracing::info!(peer = %peer, "client connected");
                                        if let Err(e) = handle_ws_client(ws_stream, hub, input, cancel).await {
                                            tracing::debug!(peer = %peer, error = %e, "ws client handler finished with error");
                                        }
                                        tracing::info!(peer = %peer, "client disconnected");
                                    }
                                    Err(e) => {
                                        tracing::debug!(peer = %peer, error = %e, "ws handshake failed");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("ws server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-client handler
// ---------------------------------------------------------------------------

async fn handle_ws_client(
    ws_stream: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    hub: Arc<OutputHub>,
    input: Option<mpsc::Sender<Vec<u8>>>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (replay, mut output_rx) = hub.subscribe().await;
    if !replay.is_empty() {
        ws_tx.send(Message::Binary(replay)).await?;
    }

    loop {
        tokio::select! {
            // --- incoming WebSocket message ---
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "ws read error, dropping client");
                        return Err(e.into());
                    }
                    None => {
                        tracing::debug!("ws client disconnected (stream ended)");
                        return Ok(());
                    }
                };

                match msg {
                    Message::Text(text) => match &input {
                        Some(input) => {
                            if input.send(text.into_bytes()).await.is_err() {
                                tracing::debug!("ws: input receiver gone, dropping keystrokes");
                            }
                        }
                        None => tracing::debug!(len = text.len(), "ws: web input disabled, dropping keystrokes"),
                    },
                    Message::Close(_) => {
                        tracing::debug!("ws client sent close frame");
                        return Ok(());
                    }
                    Message::Ping(data) => {
                        ws_tx.send(Message::Pong(data)).await?;
                    }
                    Message::Pong(_) => {}
                    other => {
                        tracing::warn!(kind = message_kind(&other), "ws: unexpected message type");
                    }
                }
            }

            // --- command output ---
            output = output_rx.recv() => {
                match output {
                    Ok(data) => ws_tx.send(Message::Binary(data)).await?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // The client catches up from the replay buffer when it reconnects.
                        tracing::warn!(skipped, "ws client output lagged, disconnecting");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(());
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }

            // --- cancellation ---
            _ = cancel.cancelled() => {
                tracing::debug!("ws client handler: cancellation requested");
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

fn message_kind(msg: &Message) -> &'static str {
    match msg {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "frame",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
