//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, address has a `host:port` shape)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::Ipv6Addr;

use thiserror::Error;

use crate::config::schema::ServiceConfig;

/// Longest grace period accepted between spawning a successor and draining.
pub const MAX_RELOAD_GRACE_MS: u64 = 60 * 60 * 1000;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not of the form host:port")]
    BindAddress(String),

    #[error("lifecycle.pid_file must not be empty")]
    EmptyPidFile,

    #[error("lifecycle.shutdown_timeout_ms must be greater than zero")]
    ZeroShutdownTimeout,

    #[error("lifecycle.reload_grace_ms must be below {max}, got {0}", max = MAX_RELOAD_GRACE_MS)]
    ReloadGraceTooLong(u64),

    #[error("http.request_timeout_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("tls.{0} must not be empty")]
    EmptyTlsPath(&'static str),
}

/// Whether `address` looks like `host:port`, `[v6]:port` or `:port`.
///
/// Hostnames are not resolved here; that happens at bind time.
pub fn is_bind_address(address: &str) -> bool {
    let Some((host, port)) = address.rsplit_once(':') else {
        return false;
    };
    if port.parse::<u16>().is_err() {
        return false;
    }

    if let Some(inner) = host.strip_prefix('[') {
        return inner
            .strip_suffix(']')
            .is_some_and(|ip| ip.parse::<Ipv6Addr>().is_ok());
    }

    host.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_bind_address(&config.listener.bind_address) {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.lifecycle.pid_file.trim().is_empty() {
        errors.push(ValidationError::EmptyPidFile);
    }

    if config.lifecycle.shutdown_timeout_ms == 0 {
        errors.push(ValidationError::ZeroShutdownTimeout);
    }

    if config.lifecycle.reload_grace_ms >= MAX_RELOAD_GRACE_MS {
        errors.push(ValidationError::ReloadGraceTooLong(
            config.lifecycle.reload_grace_ms,
        ));
    }

    if config.http.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    if let Some(tls) = &config.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::EmptyTlsPath("cert_path"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::EmptyTlsPath("key_path"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
