//! Command runner: the configured command in a pseudo-terminal, restarted
//! after it exits.
//!
//! Output is read on a dedicated thread (PTY reads block) and handed to the
//! async side over a channel. Announcements bracket every run so clients can
//! tell restarts apart.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread;
use std::time::Duration;

use portable_pty::{CommandBuilder, PtySize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::output_hub::OutputHub;

/// Default pause between a command exiting and its restart.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(5);

/// End-of-transmission, sent to the process when server stdin closes.
pub const EOF_CHAR: u8 = 0x04;

const READ_BUF_SIZE: usize = 1024;
const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

// ---------------------------------------------------------------------------
// ProcessInput
// ---------------------------------------------------------------------------

/// Write side of the running process's terminal, if one is running.
///
/// Cloned into every input source (server stdin, web clients); writes made
/// while no process runs are dropped.
#[derive(Clone, Default)]
pub struct ProcessInput {
    writer: Arc<StdMutex<Option<Box<dyn Write + Send>>>>,
}

impl ProcessInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route writes to `writer` until [`detach`](Self::detach).
    pub fn attach(&self, writer: Box<dyn Write + Send>) {
        if let Ok(mut slot) = self.writer.lock() {
            *slot = Some(writer);
        }
    }

    pub fn detach(&self) {
        if let Ok(mut slot) = self.writer.lock() {
            *slot = None;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.writer.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Write `data` to the process. Returns `false` when no process runs.
    pub fn write(&self, data: &[u8]) -> io::Result<bool> {
        let mut slot = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("process input lock poisoned"))?;
        match slot.as_mut() {
            Some(writer) => {
                writer.write_all(data)?;
                writer.flush()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn send_eof(&self) -> io::Result<bool> {
        self.write(&[EOF_CHAR])
    }
}

/// Write keystrokes from `keys` into the running process until the channel
/// closes or `cancel` fires.
pub async fn forward_input(
    mut keys: mpsc::Receiver<Vec<u8>>,
    process: ProcessInput,
    cancel: CancellationToken,
) {
    loop {
        let data = tokio::select! {
            _ = cancel.cancelled() => break,
            data = keys.recv() => match data {
                Some(data) => data,
                None => break,
            },
        };
        match process.write(&data) {
            Ok(true) => {}
            Ok(false) => tracing::debug!(len = data.len(), "input: no running process, dropped"),
            Err(e) => tracing::warn!(error = %e, "input: write to process failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// CommandRunner
// ---------------------------------------------------------------------------

/// How a single run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Exited { code: u32 },
    SpawnFailed,
    Cancelled,
}

pub struct CommandRunner {
    command: Vec<String>,
    wait_time: Duration,
    hub: Arc<OutputHub>,
    input: ProcessInput,
    cols: u16,
    rows: u16,
}

impl CommandRunner {
    pub fn new(command: Vec<String>, hub: Arc<OutputHub>, input: ProcessInput) -> Self {
        Self {
            command,
            wait_time: DEFAULT_WAIT_TIME,
            hub,
            input,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Run the command, wait, and repeat until `cancel` fires. A running
    /// process is killed on cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if self.run_once(&cancel).await == RunOutcome::Cancelled {
                break;
            }
            tracing::debug!(wait_secs = self.wait_time.as_secs_f64(), "waiting before restart");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.wait_time) => {}
            }
        }
        tracing::debug!("command runner stopped");
    }

    /// One spawn-pump-reap cycle.
    pub async fn run_once(&self, cancel: &CancellationToken) -> RunOutcome {
        let spawned = match self.spawn() {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!(command = ?self.command, error = %e, "failed to start process");
                return RunOutcome::SpawnFailed;
            }
        };
        let Spawned {
            mut child,
            master,
            mut output_rx,
        } = spawned;
        let pid = child.process_id();
        tracing::debug!(pid = ?pid, command = ?self.command, "process started");
        self.hub.send_alert("Process started.").await;

        let mut cancelled = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(pid = ?pid, "killing process");
                    if let Err(e) = child.kill() {
                        tracing::warn!(pid = ?pid, error = %e, "kill failed");
                    }
                    cancelled = true;
                    break;
                }
                chunk = output_rx.recv() => match chunk {
                    Some(data) => self.hub.send(&data).await,
                    None => break,
                },
            }
        }

        self.input.detach();
        let status = tokio::task::spawn_blocking(move || child.wait()).await;
        drop(master);

        if cancelled {
            return RunOutcome::Cancelled;
        }

        self.hub.send_alert("Process exited.").await;
        let code = match status {
            Ok(Ok(status)) => status.exit_code(),
            Ok(Err(e)) => {
                tracing::warn!(pid = ?pid, error = %e, "wait failed");
                return RunOutcome::Exited { code: 1 };
            }
            Err(e) => {
                tracing::warn!(pid = ?pid, error = %e, "wait task failed");
                return RunOutcome::Exited { code: 1 };
            }
        };
        tracing::debug!(pid = ?pid, code, "process ended");
        if code != 0 {
            tracing::error!(code, "process exited with non-zero status");
        }
        RunOutcome::Exited { code }
    }

    fn spawn(&self) -> Result<Spawned, ServerError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(ServerError::Pty("empty command".into()));
        };
        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let pty_system = portable_pty::native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: self.rows,
                cols: self.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ServerError::Pty(e.to_string()))?;
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ServerError::Pty(e.to_string()))?;
        // The reader sees EOF only once every slave handle is closed.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ServerError::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ServerError::Pty(e.to_string()))?;

        let (tx, output_rx) = mpsc::channel(64);
        thread::Builder::new()
            .name("pty-reader".into())
            .spawn(move || read_pty(reader, tx))?;
        self.input.attach(writer);

        Ok(Spawned {
            child,
            master: pair.master,
            output_rx,
        })
    }
}

struct Spawned {
    child: Box<dyn portable_pty::Child + Send + Sync>,
    master: Box<dyn portable_pty::MasterPty + Send>,
    output_rx: mpsc::Receiver<Vec<u8>>,
}

fn read_pty(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Linux reports EIO once the child side is gone.
            Err(e) => {
                tracing::trace!(error = %e, "pty read ended");
                break;
            }
        }
    }
}
