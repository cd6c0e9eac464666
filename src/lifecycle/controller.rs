//! Process lifecycle state machine.
//!
//! # States
//! ```text
//! Running ──stop──────▶ ShuttingDown ──drain──▶ Terminated
//! Running ──restart───▶ Reloading ──grace, drain──▶ Terminated
//! Reloading ──spawn failed──▶ Running        (policy: continue)
//! Reloading ──spawn failed──▶ Terminated     (policy: abort, no drain)
//! ```
//!
//! # Design Decisions
//! - The controller owns the `Listener`; the serve loop gets an accept
//!   handle and the reloader a borrow
//! - One terminal transition per process: the event channel is closed as
//!   soon as it starts, so repeated signals never reach the state machine
//! - The grace period between spawning and draining is a fixed delay, not
//!   a readiness handshake

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;

use crate::config::{LifecycleConfig, ReloadFailurePolicy};
use crate::lifecycle::reload::{Reload, ReloadError};
use crate::lifecycle::server::Server;
use crate::lifecycle::shutdown::{drain, DrainResult};
use crate::lifecycle::signals::{LifecycleEvent, StopSignal};
use crate::net::Listener;

/// Lifecycle state of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Reloading,
    ShuttingDown,
    Terminated,
}

/// Why the process is terminating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Stop(StopSignal),
    Restart,
    /// Nothing can deliver events any more; treated as a stop.
    EventSourceClosed,
}

/// Result of a completed [`LifecycleController::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub cause: TerminationCause,
    pub drain: DrainResult,
}

/// Errors that end [`LifecycleController::run`] without a drain.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A restart failed under [`ReloadFailurePolicy::Abort`].
    #[error("graceful restart failed: {0}")]
    ReloadFailed(#[source] ReloadError),

    /// The serve loop ended before any transition was requested.
    #[error("serve loop exited: {0}")]
    Serve(#[source] io::Error),
}

/// Timing and policy knobs for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTiming {
    pub shutdown_timeout: Duration,
    pub reload_grace: Duration,
    pub reload_failure: ReloadFailurePolicy,
}

impl From<&LifecycleConfig> for LifecycleTiming {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            shutdown_timeout: config.shutdown_timeout(),
            reload_grace: config.reload_grace(),
            reload_failure: config.reload_failure,
        }
    }
}

impl Default for LifecycleTiming {
    fn default() -> Self {
        Self::from(&LifecycleConfig::default())
    }
}

/// Runs a server on the process listener and drives it through restart or
/// shutdown in response to lifecycle events.
pub struct LifecycleController<S, R> {
    server: Arc<S>,
    listener: Listener,
    reloader: R,
    events: mpsc::Receiver<LifecycleEvent>,
    timing: LifecycleTiming,
    state: watch::Sender<ProcessState>,
}

impl<S: Server, R: Reload> LifecycleController<S, R> {
    pub fn new(
        server: Arc<S>,
        listener: Listener,
        reloader: R,
        events: mpsc::Receiver<LifecycleEvent>,
        timing: LifecycleTiming,
    ) -> Self {
        let (state, _) = watch::channel(ProcessState::Running);
        Self {
            server,
            listener,
            reloader,
            events,
            timing,
            state,
        }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    fn set_state(&self, next: ProcessState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(from = ?previous, to = ?next, "Lifecycle state changed");
    }

    /// Serve until a stop or restart completes.
    pub async fn run(mut self) -> Result<Termination, LifecycleError> {
        let acceptor = self.listener.acceptor();
        let server = Arc::clone(&self.server);
        let mut serve_task = tokio::spawn(async move { server.serve(acceptor).await });

        tracing::info!(
            origin = %self.listener.origin(),
            shutdown_timeout_ms = self.timing.shutdown_timeout.as_millis() as u64,
            reload_grace_ms = self.timing.reload_grace.as_millis() as u64,
            "Serving; waiting for lifecycle signals"
        );

        let cause = loop {
            let event = tokio::select! {
                event = self.events.recv() => event,
                result = &mut serve_task => {
                    self.set_state(ProcessState::Terminated);
                    return Err(LifecycleError::Serve(serve_exit_error(result)));
                }
            };

            match event {
                None => {
                    tracing::warn!("Lifecycle event source closed; shutting down");
                    self.set_state(ProcessState::ShuttingDown);
                    break TerminationCause::EventSourceClosed;
                }
                Some(LifecycleEvent::Stop(signal)) => {
                    tracing::info!(?signal, "Graceful shutdown requested");
                    self.set_state(ProcessState::ShuttingDown);
                    break TerminationCause::Stop(signal);
                }
                Some(LifecycleEvent::Restart) => {
                    tracing::info!("Graceful restart requested");
                    self.set_state(ProcessState::Reloading);

                    match self.reloader.reload(&self.listener) {
                        Ok(()) => break TerminationCause::Restart,
                        Err(e) => match self.timing.reload_failure {
                            ReloadFailurePolicy::Continue => {
                                tracing::error!(error = %e, "Graceful restart failed; still serving");
                                self.set_state(ProcessState::Running);
                            }
                            ReloadFailurePolicy::Abort => {
                                tracing::error!(error = %e, "Graceful restart failed; aborting");
                                self.set_state(ProcessState::Terminated);
                                return Err(LifecycleError::ReloadFailed(e));
                            }
                        },
                    }
                }
            }
        };

        // Deregister: anything sent from here on is dropped.
        self.events.close();

        if cause == TerminationCause::Restart {
            tracing::info!(
                grace_ms = self.timing.reload_grace.as_millis() as u64,
                "Waiting for successor to start"
            );
            tokio::time::sleep(self.timing.reload_grace).await;
        }

        let result = drain(&*self.server, self.timing.shutdown_timeout).await;
        if result == DrainResult::TimedOut {
            tracing::warn!(
                open_connections = self.listener.connections().active_count(),
                "Terminating with connections still open"
            );
            serve_task.abort();
        }

        self.set_state(ProcessState::Terminated);
        Ok(Termination {
            cause,
            drain: result,
        })
    }
}

fn serve_exit_error(result: Result<io::Result<()>, JoinError>) -> io::Error {
    match result {
        Ok(Ok(())) => io::Error::other("serve loop returned before shutdown was requested"),
        Ok(Err(e)) => e,
        Err(e) => io::Error::other(e.to_string()),
    }
}
