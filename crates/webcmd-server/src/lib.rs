//! webcmd-server: serve a command's terminal output over WebSocket.
//!
//! The command runs in a pseudo-terminal and is restarted after it exits.
//! Output is fanned out to every client through an [`OutputHub`], which keeps
//! a replay buffer so late joiners see recent history first.

pub mod command;
pub mod error;
pub mod output_hub;
pub mod server;
pub mod stdin;
pub mod ws_server;

pub use command::{CommandRunner, ProcessInput};
pub use error::ServerError;
pub use output_hub::{OutputHub, ReplayBuffer};
pub use server::{ServerConfig, WebCommandServer};
pub use ws_server::WsServer;
