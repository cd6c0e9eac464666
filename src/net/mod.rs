//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     restart marker unset → listener.rs binds the configured address
//!     restart marker set   → listener.rs adopts the socket at fd 3
//!
//! Serving:
//!     Listener (owned by the lifecycle controller)
//!         → Acceptor (shared handle, given to the serve loop)
//!         → connection.rs (TrackedStream, counted until dropped)
//!         → tls.rs (optional, handshake on the served connection)
//!         → served application
//! ```
//!
//! # Design Decisions
//! - Exactly one listening socket per process
//! - The controller never accepts; it only exports the descriptor on reload
//! - Each accepted connection is counted so a cut-short drain can say how
//!   many connections it abandoned

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionId, ConnectionTracker, TrackedStream};
pub use listener::{
    inspect_socket, Acceptor, Listener, ListenerError, ListenerOrigin, ListenerProvider,
    SocketKind, INHERITED_FD,
};
pub use tls::load_tls_config;
