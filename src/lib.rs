//! Graceful restart and shutdown for a single-listener network service.
//!
//! A running process can be told to hand its listening socket to a freshly
//! started copy of itself (`SIGUSR2`) or to stop (`SIGTERM`/`SIGINT`). In
//! both cases in-flight requests are drained up to a deadline before exit.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::{LifecycleController, Server, Shutdown};
pub use net::{Listener, ListenerProvider};
