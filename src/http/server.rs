//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, timeout, request ID)
//! - Serve plain HTTP or HTTPS on the accept handle the lifecycle
//!   controller provides
//! - Stop accepting and drain when asked

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{Extension, Query, State},
    routing::get,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::HttpConfig;
use crate::http::request::{RequestId, RequestIdLayer};
use crate::http::tls::serve_tls;
use crate::lifecycle::{Server, Shutdown};
use crate::net::{Acceptor, ListenerOrigin, TrackedStream};

/// Application state injected into handlers.
#[derive(Debug, Clone, Copy)]
pub struct AppState {
    pub pid: u32,
    pub origin: ListenerOrigin,
}

/// Body returned by `/` and `/slow`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub pid: u32,
    pub origin: String,
}

impl From<AppState> for Identity {
    fn from(state: AppState) -> Self {
        Self {
            pid: state.pid,
            origin: state.origin.as_str().to_string(),
        }
    }
}

/// HTTP application run under the lifecycle controller.
pub struct HttpServer {
    router: Router,
    tls: Option<RustlsConfig>,
    shutdown: Shutdown,
    stopped: Shutdown,
}

impl HttpServer {
    /// Create a new HTTP server for a listener of the given origin.
    pub fn new(config: &HttpConfig, origin: ListenerOrigin) -> Self {
        let state = AppState {
            pid: std::process::id(),
            origin,
        };

        Self {
            router: Self::build_router(config, state),
            tls: None,
            shutdown: Shutdown::new(),
            stopped: Shutdown::new(),
        }
    }

    /// Terminate TLS on accepted connections.
    pub fn with_tls(mut self, tls: RustlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &HttpConfig, state: AppState) -> Router {
        Router::new()
            .route("/", get(identity_handler))
            .route("/slow", get(slow_handler))
            .route("/health", get(|| async { "ok" }))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
    }

    async fn serve_until_stopped(&self, acceptor: Acceptor) -> io::Result<()> {
        let address = acceptor.local_addr()?;
        tracing::info!(%address, "HTTP server starting");

        let shutdown = self.shutdown.clone();
        axum::serve(acceptor, self.router.clone().into_make_service())
            .with_graceful_shutdown(async move { shutdown.triggered().await })
            .await
    }
}

impl Server for HttpServer {
    async fn serve(&self, acceptor: Acceptor) -> io::Result<()> {
        let result = match &self.tls {
            Some(tls) => {
                serve_tls(
                    acceptor,
                    self.router.clone(),
                    tls.clone(),
                    self.shutdown.clone(),
                )
                .await
            }
            None => self.serve_until_stopped(acceptor).await,
        };
        self.stopped.trigger();
        tracing::info!("HTTP server stopped");
        result
    }

    async fn shutdown(&self, deadline: Instant) {
        tracing::info!(
            remaining_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Stopping HTTP server"
        );
        self.shutdown.trigger();
        self.stopped.triggered().await;
    }
}

impl axum::serve::Listener for Acceptor {
    type Io = TrackedStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.accept_tracked().await {
                Ok(connection) => return connection,
                Err(e) => handle_accept_error(e).await,
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Acceptor::local_addr(self)
    }
}

pub(crate) async fn handle_accept_error(e: io::Error) {
    if matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    ) {
        return;
    }

    // Usually fd exhaustion; back off instead of spinning.
    tracing::error!(error = %e, "Accept error");
    tokio::time::sleep(Duration::from_secs(1)).await;
}

async fn identity_handler(State(state): State<AppState>) -> Json<Identity> {
    Json(state.into())
}

#[derive(Debug, Deserialize)]
struct SlowParams {
    #[serde(default)]
    ms: u64,
}

/// Respond after `ms` milliseconds; used to hold a request in flight.
async fn slow_handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<SlowParams>,
) -> Json<Identity> {
    tracing::debug!(%request_id, delay_ms = params.ms, "Holding request");
    tokio::time::sleep(Duration::from_millis(params.ms)).await;
    Json(state.into())
}
