//! Session factory and handle.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::manager::{ClientConfig, ConnectionManager};
use crate::surface::TerminalSurface;
use crate::transport::Connector;
use crate::viewport;

/// Capacity of the keystroke broadcast channel.
const INPUT_CHANNEL_CAPACITY: usize = 256;

/// A terminal surface bound to one endpoint, not yet started.
pub struct Session<C, S> {
    config: ClientConfig,
    connector: Arc<C>,
    surface: Arc<Mutex<S>>,
    input: broadcast::Sender<Vec<u8>>,
    resizes: Option<mpsc::Receiver<()>>,
    cancel: CancellationToken,
}

impl<C: Connector, S: TerminalSurface> Session<C, S> {
    pub fn new(config: ClientConfig, connector: C, surface: S) -> Self {
        let (input, _) = broadcast::channel(INPUT_CHANNEL_CAPACITY);
        Self {
            config,
            connector: Arc::new(connector),
            surface: Arc::new(Mutex::new(surface)),
            input,
            resizes: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Refit the surface whenever a value arrives on `resizes`.
    pub fn with_resize_events(mut self, resizes: mpsc::Receiver<()>) -> Self {
        self.resizes = Some(resizes);
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sender for keystrokes typed into the surface.
    pub fn input(&self) -> broadcast::Sender<Vec<u8>> {
        self.input.clone()
    }

    pub fn surface(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.surface)
    }

    /// Fit the surface and begin connecting. Must be called inside a tokio
    /// runtime.
    pub fn start(self) -> SessionHandle {
        let Session {
            config,
            connector,
            surface,
            input,
            resizes,
            cancel,
        } = self;
        let manager = ConnectionManager::new(config, connector, Arc::clone(&surface), input.clone());

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            viewport::fit(&surface).await;
            let watcher = resizes.map(|rx| {
                tokio::spawn(viewport::watch_resizes(Arc::clone(&surface), rx, token.clone()))
            });

            manager.run(token.clone()).await;

            if let Some(watcher) = watcher {
                token.cancel();
                let _ = watcher.await;
            }
        });

        SessionHandle {
            cancel,
            input,
            task,
        }
    }
}

/// Handle to a running session.
pub struct SessionHandle {
    cancel: CancellationToken,
    input: broadcast::Sender<Vec<u8>>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Stop the retry cycle: dispose the live binding or disarm the timer.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn input(&self) -> broadcast::Sender<Vec<u8>> {
        self.input.clone()
    }

    /// Wait for the session to finish after [`stop`](Self::stop).
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}
