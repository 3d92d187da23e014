//! CLI definition using clap derive.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "web-command",
    version,
    about = "Output a command to web browsers, or attach a terminal to one"
)]
pub struct Cli {
    /// Log level (default: none; WEB_COMMAND_LOG or RUST_LOG when unset)
    #[arg(long, short = 'l', global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a command in a pseudo-terminal and stream it over WebSocket
    Serve(ServeOpts),
    /// Attach this terminal to a running web-command server
    Attach(AttachOpts),
}

#[derive(clap::Args)]
pub struct ServeOpts {
    /// Host to bind to
    #[arg(long, short = 'a', env = "WEB_COMMAND_HOST", default_value = "localhost")]
    pub host: String,

    /// Port to bind to
    #[arg(long, short = 'p', env = "WEB_COMMAND_PORT", default_value = "8000")]
    pub port: u16,

    /// Do not echo output to local stdout
    #[arg(long, short = 's')]
    pub suppress_output: bool,

    /// Seconds to wait before restarting the command
    #[arg(long, short = 'w', default_value = "5")]
    pub wait_time: u64,

    /// Bytes of output history replayed to new clients
    #[arg(long, default_value = "10000")]
    pub buffer_size: usize,

    /// Maximum concurrent WebSocket clients
    #[arg(long, default_value = "64")]
    pub max_connections: usize,

    /// Forward keystrokes from web clients into the command
    #[arg(long)]
    pub web_input: bool,

    /// Command to run; stdin is streamed when omitted
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(clap::Args)]
pub struct AttachOpts {
    /// Page URL of the server (http://host:port/) or a ws:// endpoint
    pub url: String,

    /// Socket path resolved against the page URL
    #[arg(long, default_value = "ws")]
    pub path: String,

    /// Milliseconds between a disconnect and the next attempt
    #[arg(long, default_value = "5000")]
    pub retry_delay_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    None,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// `EnvFilter` directive for this level.
    pub fn filter(self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}
