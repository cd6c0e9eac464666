//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for a handoff-managed service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Restart and shutdown behaviour.
    pub lifecycle: LifecycleConfig,

    /// Served HTTP application settings.
    pub http: HttpConfig,

    /// Log output settings.
    pub logging: LoggingConfig,

    /// Serve HTTPS instead of plain HTTP when present.
    pub tls: Option<TlsConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address: "0.0.0.0:8080", "localhost:8080", or ":8080" for every
    /// interface. Ignored when the socket is inherited.
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
        }
    }
}

/// What the predecessor does when spawning its successor fails.
///
/// `Abort` is the classic behaviour of treating the failure as fatal.
/// `Continue` is the default so that a bad deploy (missing binary, exhausted
/// process table) leaves the running process serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReloadFailurePolicy {
    /// Log the failure and keep serving; the operator may signal again.
    #[default]
    Continue,
    /// Treat the failure as fatal and exit without draining.
    Abort,
}

/// Lifecycle timing and PID file location.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Path the current pid is written to at startup.
    pub pid_file: String,

    /// Upper bound on a drain, in milliseconds.
    pub shutdown_timeout_ms: u64,

    /// Time given to a freshly spawned successor before the predecessor
    /// stops accepting, in milliseconds.
    pub reload_grace_ms: u64,

    /// Behaviour on a failed reload.
    pub reload_failure: ReloadFailurePolicy,
}

impl LifecycleConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn reload_grace(&self) -> Duration {
        Duration::from_millis(self.reload_grace_ms)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            pid_file: "graceful-handoff.pid".to_string(),
            shutdown_timeout_ms: 20_000,
            reload_grace_ms: 2_000,
            reload_failure: ReloadFailurePolicy::Continue,
        }
    }
}

/// Served application settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
        }
    }
}

/// TLS certificate and key for HTTPS serving.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format; `RUST_LOG` still controls the filter.
    pub format: LogFormat,
}
