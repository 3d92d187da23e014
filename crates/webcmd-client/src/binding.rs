//! Transport bindings: one socket attached to the terminal surface.
//!
//! A binding owns a task that opens the socket, then pipes remote bytes into
//! the surface and keystrokes out to the socket without involving the
//! connection manager. It reports `Open`, `Error` and `Close` as
//! [`BindingEvent`]s. `Close` is emitted whenever the task ends on its own,
//! including after a failed connect, so an error is always followed by a
//! close.
//!
//! After `Open` the binding holds the socket until the manager calls
//! [`TransportBinding::release`], so "connected." is on the surface before
//! any remote byte.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use webcmd_core::{Generation, TransportSignal};

use crate::error::TransportError;
use crate::surface::TerminalSurface;
use crate::transport::{Transport, TransportEvent};

/// A lifecycle signal from the binding with the given generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingEvent {
    pub generation: Generation,
    pub signal: TransportSignal,
}

pub struct TransportBinding {
    generation: Generation,
    cancel: CancellationToken,
    released: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl TransportBinding {
    /// Spawn the binding task. `connect` resolves to the open transport.
    ///
    /// Keystrokes are taken from `input` only once the socket is open;
    /// anything typed before that is dropped.
    pub fn attach<S: TerminalSurface>(
        generation: Generation,
        connect: BoxFuture<'static, Result<Transport, TransportError>>,
        surface: Arc<Mutex<S>>,
        input: broadcast::Sender<Vec<u8>>,
        events: mpsc::UnboundedSender<BindingEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let released = Arc::new(Notify::new());
        let task = tokio::spawn(run_binding(
            generation,
            connect,
            surface,
            input,
            events,
            Arc::clone(&released),
            cancel.clone(),
        ));
        Self {
            generation,
            cancel,
            released,
            task: Some(task),
        }
    }

    /// Let an open binding start moving bytes. Called once the `Open` event
    /// has been handled; calling it earlier is remembered.
    pub fn release(&self) {
        self.released.notify_one();
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_disposed(&self) -> bool {
        self.task.is_none()
    }

    /// Detach from the surface and release the socket.
    ///
    /// Returns once the binding task has finished, so no byte from this
    /// binding reaches the surface afterwards. Calling it again is a no-op.
    pub async fn dispose(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.cancel.cancel();
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::warn!(generation = self.generation, "binding task panicked");
            }
        }
        tracing::debug!(generation = self.generation, "binding disposed");
    }
}

impl Drop for TransportBinding {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_binding<S: TerminalSurface>(
    generation: Generation,
    connect: BoxFuture<'static, Result<Transport, TransportError>>,
    surface: Arc<Mutex<S>>,
    input: broadcast::Sender<Vec<u8>>,
    events: mpsc::UnboundedSender<BindingEvent>,
    released: Arc<Notify>,
    cancel: CancellationToken,
) {
    let emit = |signal| {
        let _ = events.send(BindingEvent { generation, signal });
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = connect => result,
    };

    let mut transport = match result {
        Ok(transport) => transport,
        Err(e) => {
            tracing::debug!(generation, error = %e, "binding: connect failed");
            emit(TransportSignal::Error);
            emit(TransportSignal::Close);
            return;
        }
    };
    emit(TransportSignal::Open);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = released.notified() => {}
    }

    let mut keys = input.subscribe();
    let mut keys_open = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            event = transport.recv() => {
                match event {
                    Some(TransportEvent::Data(bytes)) => {
                        let mut surface = surface.lock().await;
                        if let Err(e) = surface.write(&bytes) {
                            tracing::warn!(generation, error = %e, "binding: surface write failed");
                        }
                    }
                    Some(TransportEvent::Error(e)) => {
                        tracing::debug!(generation, error = %e, "binding: socket error");
                        emit(TransportSignal::Error);
                    }
                    None => break,
                }
            }
            key = keys.recv(), if keys_open => {
                match key {
                    Ok(bytes) => {
                        if transport.send(bytes).await.is_err() {
                            tracing::debug!(generation, "binding: socket gone, dropping keystrokes");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(generation, skipped, "binding: input lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => keys_open = false,
                }
            }
        }
    }

    emit(TransportSignal::Close);
}
