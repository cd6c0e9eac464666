//! Observability subsystem.
//!
//! # Design Decisions
//! - Structured logging through `tracing`; every lifecycle transition is an event
//! - JSON format for machine parsing, pretty format for development
//! - `RUST_LOG` overrides the built-in filter

pub mod logging;

pub use logging::{init_logging, DEFAULT_FILTER};
