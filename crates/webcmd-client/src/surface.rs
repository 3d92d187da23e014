//! The terminal surface seam.
//!
//! A surface renders whatever bytes it is given and interprets escape
//! sequences itself; the client never looks inside the stream.

use std::io;

use tokio::sync::Mutex;

use webcmd_core::Announcement;

/// Something that displays a terminal byte stream.
pub trait TerminalSurface: Send + 'static {
    /// Append raw bytes to the display.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Recompute the character grid to fill the container.
    fn fit(&mut self) -> io::Result<()>;
}

/// Write a styled lifecycle announcement to `surface`.
///
/// Failures are logged; an unwritable surface never stops the lifecycle.
pub async fn announce<S: TerminalSurface>(surface: &Mutex<S>, announcement: &Announcement) {
    tracing::debug!(announcement = %announcement, "surface: announce");
    let mut surface = surface.lock().await;
    if let Err(e) = surface.write(&announcement.render()) {
        tracing::warn!(error = %e, "surface: failed to write announcement");
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSurface;
    use super::*;

    #[tokio::test]
    async fn announce_writes_styled_line() {
        let recorder = RecordingSurface::default();
        let surface = Mutex::new(recorder.clone());
        announce(&surface, &Announcement::Connected).await;
        assert_eq!(recorder.text(), "\x1b[33;1mconnected.\r\n\x1b[0m");
        assert_eq!(recorder.lines(), vec!["connected."]);
    }
}
