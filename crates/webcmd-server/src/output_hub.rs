use std::io::Write;

use tokio::sync::{broadcast, Mutex};

use webcmd_core::announce;

/// Default replay history in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 10_000;

const OUTPUT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// ReplayBuffer
// ---------------------------------------------------------------------------

/// The most recent `capacity` bytes of output.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.min(64 * 1024)),
            capacity,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.capacity {
            self.data.clear();
            self.data
                .extend_from_slice(&bytes[bytes.len() - self.capacity..]);
            return;
        }
        self.data.extend_from_slice(bytes);
        if self.data.len() > self.capacity {
            let excess = self.data.len() - self.capacity;
            self.data.drain(..excess);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// OutputHub
// ---------------------------------------------------------------------------

/// Fans command output out to every connected client.
///
/// Appending to the replay buffer and publishing on the channel happen under
/// one lock, as does [`subscribe`](Self::subscribe), so a new client sees each
/// chunk exactly once: either in its replay snapshot or live.
pub struct OutputHub {
    output_tx: broadcast::Sender<Vec<u8>>,
    inner: Mutex<HubInner>,
}

struct HubInner {
    replay: ReplayBuffer,
    echo: Option<Box<dyn Write + Send>>,
}

impl OutputHub {
    pub fn new(buffer_size: usize) -> Self {
        Self::with_channel_capacity(buffer_size, OUTPUT_CHANNEL_CAPACITY)
    }

    pub fn with_channel_capacity(buffer_size: usize, channel_capacity: usize) -> Self {
        let (output_tx, _) = broadcast::channel(channel_capacity);
        Self {
            output_tx,
            inner: Mutex::new(HubInner {
                replay: ReplayBuffer::new(buffer_size),
                echo: None,
            }),
        }
    }

    /// Also copy every chunk to `writer` (normally local stdout).
    pub fn with_echo(self, writer: Box<dyn Write + Send>) -> Self {
        let mut inner = self.inner.into_inner();
        inner.echo = Some(writer);
        Self {
            output_tx: self.output_tx,
            inner: Mutex::new(inner),
        }
    }

    /// Publish a chunk of output. Empty chunks are ignored.
    pub async fn send(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.replay.push(data);
        // No subscribers is fine; the replay buffer still records it.
        let _ = self.output_tx.send(data.to_vec());
        if let Some(echo) = inner.echo.as_mut() {
            if let Err(e) = echo.write_all(data).and_then(|()| echo.flush()) {
                tracing::warn!(error = %e, "output echo failed, disabling");
                inner.echo = None;
            }
        }
    }

    /// Publish `text` as a warning-styled line.
    pub async fn send_alert(&self, text: &str) {
        self.send(&announce::alert_line(text)).await;
    }

    /// Snapshot of the replay buffer and a receiver for everything after it.
    pub async fn subscribe(&self) -> (Vec<u8>, broadcast::Receiver<Vec<u8>>) {
        let inner = self.inner.lock().await;
        (inner.replay.as_bytes().to_vec(), self.output_tx.subscribe())
    }

    pub async fn replay(&self) -> Vec<u8> {
        self.inner.lock().await.replay.as_bytes().to_vec()
    }

    pub fn client_count(&self) -> usize {
        self.output_tx.receiver_count()
    }
}
