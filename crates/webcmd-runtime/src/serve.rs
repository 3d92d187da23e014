use std::time::Duration;

use tokio_util::sync::CancellationToken;
use webcmd_server::{ServerConfig, WebCommandServer};

use crate::cli::ServeOpts;

pub fn server_config(opts: ServeOpts) -> ServerConfig {
    ServerConfig {
        host: opts.host,
        port: opts.port,
        command: opts.command,
        wait_time: Duration::from_secs(opts.wait_time),
        buffer_size: opts.buffer_size,
        max_connections: opts.max_connections,
        echo_output: !opts.suppress_output,
        web_input: opts.web_input,
        ..ServerConfig::default()
    }
}

pub async fn run(opts: ServeOpts) -> anyhow::Result<()> {
    let config = server_config(opts);
    tracing::info!(host = %config.host, port = config.port, command = ?config.command, "web-command server starting");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
        }
        on_signal.cancel();
    });

    let server = WebCommandServer::new(config);
    server.run(cancel).await?;
    Ok(())
}
