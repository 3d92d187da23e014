//! webcmd-client: reconnecting terminal client for a web-command stream.
//!
//! A [`Session`] binds a [`TerminalSurface`] to a WebSocket endpoint through
//! one [`TransportBinding`] at a time. When the socket closes the binding is
//! disposed, a fixed-delay timer is armed, and a fresh binding is created
//! when it fires. The cycle runs until [`SessionHandle::stop`].

pub mod binding;
pub mod error;
pub mod host;
pub mod manager;
pub mod session;
pub mod surface;
pub mod transport;
pub mod viewport;

pub use binding::{BindingEvent, TransportBinding};
pub use error::TransportError;
pub use host::HostTerminal;
pub use manager::{ClientConfig, ConnectionManager};
pub use session::{Session, SessionHandle};
pub use surface::TerminalSurface;
pub use transport::{Connector, Transport, TransportEvent, TransportPeer, WsConnector};

pub use webcmd_core::{Endpoint, ReconnectPolicy};
