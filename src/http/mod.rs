//! HTTP application served under the lifecycle controller.
//!
//! # Data Flow
//! ```text
//! Acceptor (net/listener.rs)
//!     → server.rs (Axum setup, graceful stop)
//!     → tls.rs (HTTPS variant of the serve loop)
//!     → request.rs (add request ID)
//!     → handlers: /, /slow, /health
//! ```

pub mod request;
pub mod server;
pub mod tls;

pub use request::{RequestId, RequestIdLayer, X_REQUEST_ID};
pub use server::{HttpServer, Identity};
