//! webcmd-core: pure building blocks shared by the web-command client and server.
//!
//! - [`lifecycle`]: the reconnecting connection state machine.
//! - [`endpoint`]: structured WebSocket endpoint derivation from a page URL.
//! - [`announce`]: warning-styled lifecycle announcements.

pub mod announce;
pub mod endpoint;
pub mod lifecycle;

pub use announce::Announcement;
pub use endpoint::{Endpoint, EndpointError};
pub use lifecycle::{
    ConnectionLifecycle, ConnectionState, Generation, LifecycleAction, LifecycleEvent,
    ReconnectPolicy, TransportSignal,
};
