//! Viewport fit: refit the surface on attach and on every resize.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::surface::TerminalSurface;

/// Ask the surface to recompute its grid. Failures are logged and ignored.
pub async fn fit<S: TerminalSurface>(surface: &Mutex<S>) {
    let mut surface = surface.lock().await;
    if let Err(e) = surface.fit() {
        tracing::debug!(error = %e, "viewport: fit failed");
    }
}

/// Refit on every resize notification until cancelled or the sender is gone.
pub async fn watch_resizes<S: TerminalSurface>(
    surface: Arc<Mutex<S>>,
    mut resizes: mpsc::Receiver<()>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            resize = resizes.recv() => {
                match resize {
                    Some(()) => fit(&surface).await,
                    None => break,
                }
            }
        }
    }
}
