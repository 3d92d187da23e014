use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use webcmd_client::host::{self, HostTerminal};
use webcmd_client::{ClientConfig, Session, WsConnector};
use webcmd_core::{Endpoint, ReconnectPolicy};

use crate::cli::AttachOpts;

/// Accept either a page URL (`http://host:port/`) or a socket URL.
pub fn resolve_endpoint(url: &str, path: &str) -> anyhow::Result<Endpoint> {
    Endpoint::resolve(url, path).with_context(|| format!("invalid URL {url}"))
}

pub async fn run(opts: AttachOpts) -> anyhow::Result<()> {
    let endpoint = resolve_endpoint(&opts.url, &opts.path)?;
    let policy = ReconnectPolicy::fixed(Duration::from_millis(opts.retry_delay_ms));
    tracing::info!(endpoint = %endpoint, retry_delay_ms = opts.retry_delay_ms, "attaching");

    let cancel = CancellationToken::new();
    let terminal = HostTerminal::new().context("cannot switch terminal to raw mode")?;
    let resizes = host::resize_events(cancel.clone()).context("cannot watch for resizes")?;

    let session = Session::new(
        ClientConfig::new(endpoint).with_policy(policy),
        WsConnector::default(),
        terminal,
    )
    .with_resize_events(resizes)
    .with_cancellation(cancel.clone());
    let input = session.input();
    let surface = session.surface();
    let handle = session.start();

    let pump_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = host::pump_input(tokio::io::stdin(), input, pump_cancel.clone()).await {
            tracing::warn!(error = %e, "stdin read failed");
        }
        // Stdin closed or detach pressed: the session ends either way.
        pump_cancel.cancel();
    });

    let joined = handle.join().await;
    surface.lock().await.restore()?;
    joined.context("session task failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_resolves_to_socket() {
        let endpoint = resolve_endpoint("http://localhost:8000/", "ws").unwrap();
        assert_eq!(endpoint.as_str(), "ws://localhost:8000/ws");
    }

    #[test]
    fn socket_url_is_used_as_is() {
        let endpoint = resolve_endpoint("ws://example.com:9000/stream", "ws").unwrap();
        assert_eq!(endpoint.as_str(), "ws://example.com:9000/stream");
    }

    #[test]
    fn uppercase_socket_scheme_is_not_treated_as_page() {
        let endpoint = resolve_endpoint("WS://example.com:9000/stream", "ws").unwrap();
        assert_eq!(endpoint.as_str(), "ws://example.com:9000/stream");
    }

    #[test]
    fn unsupported_scheme_is_reported() {
        let err = resolve_endpoint("ftp://example.com/", "ws").unwrap_err();
        assert!(err.to_string().contains("invalid URL"));
    }
}
