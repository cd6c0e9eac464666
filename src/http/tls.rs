//! HTTPS serve loop over the process listener.
//!
//! # Responsibilities
//! - Accept from the shared [`Acceptor`], run the TLS handshake, serve
//!   HTTP/1.1 and HTTP/2 with the application router
//! - On shutdown: stop accepting, ask every open connection to finish its
//!   current requests, wait for them
//!
//! # Design Decisions
//! - Handshakes run on the connection task, so a slow client cannot stall
//!   the accept loop
//! - A connection still handshaking when shutdown starts is dropped

use std::io;

use axum::Router;
use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use tokio::task::JoinSet;

use crate::http::server::handle_accept_error;
use crate::lifecycle::Shutdown;
use crate::net::{Acceptor, TrackedStream};

/// Serve HTTPS on `acceptor` until `shutdown` fires and open connections drain.
pub(crate) async fn serve_tls(
    acceptor: Acceptor,
    router: Router,
    config: RustlsConfig,
    shutdown: Shutdown,
) -> io::Result<()> {
    let address = acceptor.local_addr()?;
    tracing::info!(%address, "HTTPS server starting");

    let tls = RustlsAcceptor::new(config);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = acceptor.accept_tracked() => match accepted {
                Ok((stream, _)) => {
                    connections.spawn(serve_connection(
                        stream,
                        tls.clone(),
                        router.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => handle_accept_error(e).await,
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    tracing::warn!(error = %e, "HTTPS connection task failed");
                }
            }
            _ = shutdown.triggered() => break,
        }
    }

    tracing::info!(open_connections = connections.len(), "HTTPS server draining");
    while connections.join_next().await.is_some() {}

    Ok(())
}

async fn serve_connection(
    stream: TrackedStream,
    tls: RustlsAcceptor,
    router: Router,
    shutdown: Shutdown,
) {
    let connection_id = stream.id();

    let handshake = tokio::select! {
        result = tls.accept(stream, ()) => result,
        _ = shutdown.triggered() => return,
    };
    let stream = match handshake {
        Ok((stream, ())) => stream,
        Err(e) => {
            tracing::debug!(%connection_id, error = %e, "TLS handshake failed");
            return;
        }
    };

    let builder = Builder::new(TokioExecutor::new());
    let connection = builder
        .serve_connection_with_upgrades(TokioIo::new(stream), TowerToHyperService::new(router));
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.triggered() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(e) = result {
        tracing::debug!(%connection_id, error = %e, "HTTPS connection ended with error");
    }
}
