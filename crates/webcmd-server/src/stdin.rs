//! Server stdin forwarding.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::command::ProcessInput;
use crate::output_hub::OutputHub;

const READ_BUF_SIZE: usize = 1024;

/// Where server stdin goes.
#[derive(Clone)]
pub enum StdinTarget {
    /// Into the running command's terminal.
    Process(ProcessInput),
    /// Straight to clients, with bare `\n` turned into `\r\n`.
    Hub(Arc<OutputHub>),
}

/// Pump `reader` into `target` until EOF or cancellation. On EOF a running
/// process receives an EOF character.
pub async fn forward_stdin<R: AsyncRead + Unpin>(
    mut reader: R,
    target: StdinTarget,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            n = reader.read(&mut buf) => n?,
        };
        if n == 0 {
            break;
        }
        let data = &buf[..n];
        match &target {
            StdinTarget::Process(process) => {
                if let Err(e) = process.write(data) {
                    tracing::warn!(error = %e, "stdin: write to process failed");
                }
            }
            StdinTarget::Hub(hub) => hub.send(&crlf(data)).await,
        }
    }

    tracing::debug!("stdin EOF");
    if let StdinTarget::Process(process) = &target {
        if let Err(e) = process.send_eof() {
            tracing::warn!(error = %e, "stdin: sending EOF failed");
        }
    }
    Ok(())
}

fn crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8);
    for &b in data {
        if b == b'\n' {
            out.push(b'\r');
        }
        out.push(b);
    }
    out
}
