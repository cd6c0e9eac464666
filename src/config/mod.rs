//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → command-line overrides applied by the binary, then re-validated
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a new process picks up a new file
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    HttpConfig, LifecycleConfig, ListenerConfig, LogFormat, LoggingConfig, ReloadFailurePolicy,
    ServiceConfig, TlsConfig,
};
pub use validation::{is_bind_address, validate_config, ValidationError};
