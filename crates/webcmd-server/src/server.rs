//! Wires the hub, runner, stdin forwarding and WebSocket server together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::command::{self, CommandRunner, ProcessInput};
use crate::error::ServerError;
use crate::output_hub::{self, OutputHub};
use crate::stdin::{self, StdinTarget};
use crate::ws_server::{self, WsServer};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8000;

const WEB_INPUT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Program and arguments; empty means stdin is streamed instead.
    pub command: Vec<String>,
    pub wait_time: Duration,
    pub buffer_size: usize,
    pub max_connections: usize,
    /// Echo output to local stdout.
    pub echo_output: bool,
    /// Forward keystrokes from web clients into the command.
    pub web_input: bool,
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            command: Vec::new(),
            wait_time: command::DEFAULT_WAIT_TIME,
            buffer_size: output_hub::DEFAULT_BUFFER_SIZE,
            max_connections: ws_server::DEFAULT_MAX_CONNECTIONS,
            echo_output: true,
            web_input: false,
            path: ws_server::DEFAULT_WS_PATH.to_string(),
        }
    }
}

pub struct WebCommandServer {
    config: ServerConfig,
    hub: Arc<OutputHub>,
}

impl WebCommandServer {
    pub fn new(config: ServerConfig) -> Self {
        let mut hub = OutputHub::new(config.buffer_size);
        if config.echo_output {
            hub = hub.with_echo(Box::new(std::io::stdout()));
        }
        Self {
            config,
            hub: Arc::new(hub),
        }
    }

    pub fn hub(&self) -> Arc<OutputHub> {
        Arc::clone(&self.hub)
    }

    /// Resolve and bind the listen address.
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr), ServerError> {
        let target = format!("{}:{}", self.config.host, self.config.port);
        let addr = tokio::net::lookup_host(&target)
            .await?
            .next()
            .ok_or_else(|| ServerError::Resolve(target.clone()))?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok((listener, local_addr))
    }

    /// Serve on `listener` until `cancel` fires, reading server stdin from
    /// `stdin`. The running command is killed before this returns.
    pub async fn serve<R>(
        &self,
        listener: TcpListener,
        stdin: R,
        cancel: CancellationToken,
    ) -> Result<(), ServerError>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let process = ProcessInput::new();
        let children = cancel.child_token();

        let mut ws = WsServer::new(local_addr, Arc::clone(&self.hub), cancel.clone())
            .with_max_connections(self.config.max_connections)
            .with_path(&self.config.path);

        let mut input_task = None;
        if self.config.web_input {
            if self.config.command.is_empty() {
                tracing::warn!("web input needs a command, ignoring");
            } else {
                let (tx, rx) = mpsc::channel(WEB_INPUT_CAPACITY);
                ws = ws.with_input(tx);
                input_task = Some(tokio::spawn(command::forward_input(
                    rx,
                    process.clone(),
                    children.clone(),
                )));
            }
        }

        let runner_task = if self.config.command.is_empty() {
            None
        } else {
            let runner = CommandRunner::new(
                self.config.command.clone(),
                Arc::clone(&self.hub),
                process.clone(),
            )
            .with_wait_time(self.config.wait_time);
            let token = children.clone();
            Some(tokio::spawn(async move { runner.run(token).await }))
        };

        let target = if self.config.command.is_empty() {
            StdinTarget::Hub(Arc::clone(&self.hub))
        } else {
            StdinTarget::Process(process)
        };
        let stdin_token = children.clone();
        let stdin_task = tokio::spawn(async move {
            if let Err(e) = stdin::forward_stdin(stdin, target, stdin_token).await {
                tracing::warn!(error = %e, "stdin forwarding failed");
            }
        });

        tracing::info!(addr = %local_addr, path = %self.config.path, "listening");
        let result = ws.serve(listener).await;

        tracing::info!("exiting");
        children.cancel();
        if let Some(task) = runner_task {
            let _ = task.await;
        }
        if let Some(task) = input_task {
            let _ = task.await;
        }
        // A blocked stdin read cannot be interrupted; do not wait for it.
        stdin_task.abort();

        result.map_err(ServerError::from)
    }

    /// Bind and serve with the process's own stdin.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ServerError> {
        let (listener, _) = self.bind().await?;
        self.serve(listener, tokio::io::stdin(), cancel).await
    }
}
