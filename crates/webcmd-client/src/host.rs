//! The host terminal as a [`TerminalSurface`].
//!
//! Remote bytes go straight to stdout with the terminal in raw mode, so the
//! host terminal emulator does all escape-sequence interpretation. Stdin is
//! read raw and broadcast as keystrokes; `Ctrl-]` detaches.

use std::io::{self, Write};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::surface::TerminalSurface;

/// `Ctrl-]`: ends the session instead of being sent.
pub const DETACH_KEY: u8 = 0x1d;

const READ_BUF_SIZE: usize = 1024;

/// Stdout of the current process, in raw mode while this value lives.
pub struct HostTerminal {
    out: io::Stdout,
    grid: (u16, u16),
    raw: bool,
}

impl HostTerminal {
    /// Put the terminal in raw mode. Restored on drop.
    pub fn new() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        let grid = crossterm::terminal::size().unwrap_or((80, 24));
        Ok(Self {
            out: io::stdout(),
            grid,
            raw: true,
        })
    }

    /// Leave raw mode. Idempotent; also done on drop.
    pub fn restore(&mut self) -> io::Result<()> {
        if self.raw {
            self.raw = false;
            crossterm::terminal::disable_raw_mode()?;
        }
        Ok(())
    }
}

impl TerminalSurface for HostTerminal {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.out.flush()
    }

    fn fit(&mut self) -> io::Result<()> {
        let size = crossterm::terminal::size()?;
        if record_grid(&mut self.grid, size) {
            tracing::debug!(cols = size.0, rows = size.1, "host terminal resized");
        }
        Ok(())
    }
}

/// Store `size` in `grid`; true when it differs from the previous value.
fn record_grid(grid: &mut (u16, u16), size: (u16, u16)) -> bool {
    std::mem::replace(grid, size) != size
}

impl Drop for HostTerminal {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

/// Broadcast chunks read from `reader` as keystrokes until EOF, cancellation,
/// or [`DETACH_KEY`]. The detach key cancels `cancel`; bytes typed before it
/// in the same chunk are still sent.
pub async fn pump_input<R: AsyncRead + Unpin>(
    mut reader: R,
    input: broadcast::Sender<Vec<u8>>,
    cancel: CancellationToken,
) -> io::Result<()> {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            n = reader.read(&mut buf) => n?,
        };
        if n == 0 {
            tracing::debug!("input: EOF");
            return Ok(());
        }
        let chunk = &buf[..n];
        if let Some(pos) = chunk.iter().position(|&b| b == DETACH_KEY) {
            if pos > 0 {
                let _ = input.send(chunk[..pos].to_vec());
            }
            tracing::info!("input: detach key pressed");
            cancel.cancel();
            return Ok(());
        }
        // No receiver means no open binding; keystrokes are dropped.
        let _ = input.send(chunk.to_vec());
    }
}

/// Deliver a notification for every terminal resize (SIGWINCH).
#[cfg(unix)]
pub fn resize_events(cancel: CancellationToken) -> io::Result<mpsc::Receiver<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut winch = signal(SignalKind::window_change())?;
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                sig = winch.recv() => {
                    if sig.is_none() {
                        break;
                    }
                    // A full channel already has a pending refit.
                    if let Err(mpsc::error::TrySendError::Closed(())) = tx.try_send(()) {
                        break;
                    }
                }
            }
        }
    });
    Ok(rx)
}

/// No resize signal on this platform: the surface is fitted once on attach.
#[cfg(not(unix))]
pub fn resize_events(_cancel: CancellationToken) -> io::Result<mpsc::Receiver<()>> {
    let (_tx, rx) = mpsc::channel(1);
    Ok(rx)
}
