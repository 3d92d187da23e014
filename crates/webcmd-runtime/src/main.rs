//! web-command: stream a command's terminal to WebSocket clients, or attach
//! the local terminal to such a stream with automatic reconnection.

use clap::Parser;

mod attach;
mod cli;
mod serve;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    init_tracing(args.log_level);

    let result = match args.command {
        cli::Command::Serve(opts) => serve::run(opts).await,
        cli::Command::Attach(opts) => attach::run(opts).await,
    };

    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("web-command: {e:#}");
            1
        }
    };
    // Stdin is read on a blocking thread that runtime shutdown would wait on.
    std::process::exit(code);
}

/// Logs go to stderr; stdout carries terminal bytes.
fn init_tracing(level: Option<cli::LogLevel>) {
    let filter = match level {
        Some(level) => level.filter().to_string(),
        None => std::env::var("WEB_COMMAND_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "off".to_string()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}
