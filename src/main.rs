//! graceful-handoff
//!
//! Demo HTTP service run under the lifecycle controller.
//!
//! # Architecture Overview
//!
//! ```text
//!   signals ──▶ tls cert ──▶ pid file ──▶ listener (bind, or adopt fd 3)
//!                                 │
//!                                 ▼
//!   events ───▶ LifecycleController ──▶ HttpServer (axum, HTTP or HTTPS)
//!                   │
//!                   ├─ SIGUSR2: spawn successor with fd 3, grace, drain, exit
//!                   └─ SIGTERM/SIGINT: drain, exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use graceful_handoff::config::{
    load_config, validate_config, ConfigError, LogFormat, ServiceConfig, TlsConfig,
};
use graceful_handoff::http::HttpServer;
use graceful_handoff::lifecycle::{
    listen_for_signals, startup, LifecycleController, LifecycleTiming, ProcessReloader,
    StartupError,
};
use graceful_handoff::observability::init_logging;

/// Serve HTTP or HTTPS with zero-downtime restarts.
#[derive(Debug, Parser)]
#[command(name = "graceful-handoff", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind when not inheriting a listener
    #[arg(long)]
    bind: Option<String>,

    /// Where to write the process id
    #[arg(long)]
    pid_file: Option<String>,

    /// Upper bound on draining in-flight requests
    #[arg(long)]
    shutdown_timeout_ms: Option<u64>,

    /// Delay between spawning a successor and draining
    #[arg(long)]
    reload_grace_ms: Option<u64>,

    /// Log output: pretty or json
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// PEM certificate chain; serve HTTPS
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<String>,

    /// PEM private key for --tls-cert
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<String>,
}

impl Cli {
    /// Load the file (or defaults) and apply flag overrides on top.
    fn resolve_config(&self) -> Result<ServiceConfig, StartupError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ServiceConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(pid_file) = &self.pid_file {
            config.lifecycle.pid_file = pid_file.clone();
        }
        if let Some(ms) = self.shutdown_timeout_ms {
            config.lifecycle.shutdown_timeout_ms = ms;
        }
        if let Some(ms) = self.reload_grace_ms {
            config.lifecycle.reload_grace_ms = ms;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let (Some(cert_path), Some(key_path)) = (&self.tls_cert, &self.tls_key) {
            config.tls = Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            });
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    init_logging(&config.logging)?;

    tracing::info!(
        pid = std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
        "graceful-handoff starting"
    );

    // Before the pid file exists: a reload aimed at this process must never
    // meet the default SIGUSR2 action.
    let events = listen_for_signals()?;
    let tls = startup::load_tls(&config).await?;

    let listener = startup::prepare(&config).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        origin = %listener.origin(),
        tls = tls.is_some(),
        pid_file = %config.lifecycle.pid_file,
        "Listening for connections"
    );

    let mut server = HttpServer::new(&config.http, listener.origin());
    if let Some(tls) = tls {
        server = server.with_tls(tls);
    }

    let controller = LifecycleController::new(
        Arc::new(server),
        listener,
        ProcessReloader::new(),
        events,
        LifecycleTiming::from(&config.lifecycle),
    );

    let termination = controller.run().await?;

    tracing::info!(
        cause = ?termination.cause,
        drain = ?termination.drain,
        "Shutdown complete"
    );
    Ok(())
}
