//! Shutdown coordination.
//!
//! [`Shutdown`] is the stop trigger a served application hangs its accept
//! loop on. [`drain`] is the deadline-bounded wait the controller runs once
//! it has decided the process is going away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::lifecycle::server::Server;

/// Stop trigger shared between a server and whoever stops it.
///
/// Triggering is sticky: tasks that start waiting after the trigger see it
/// immediately.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once [`Shutdown::trigger`] has been called.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Number of tasks currently waiting on the trigger.
    #[cfg(test)]
    pub(crate) fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainResult {
    /// The server finished its in-flight work before the deadline.
    Completed,
    /// The deadline passed first; remaining work was abandoned.
    TimedOut,
}

/// Ask `server` to stop and wait at most `deadline` for it to drain.
pub async fn drain<S: Server>(server: &S, deadline: Duration) -> DrainResult {
    let started = Instant::now();
    let until = started + deadline;

    tracing::info!(
        deadline_ms = deadline.as_millis() as u64,
        "Draining server"
    );

    match tokio::time::timeout_at(until, server.shutdown(until)).await {
        Ok(()) => {
            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Drain completed"
            );
            DrainResult::Completed
        }
        Err(_) => {
            tracing::warn!(
                deadline_ms = deadline.as_millis() as u64,
                "Drain deadline elapsed; abandoning in-flight work"
            );
            DrainResult::TimedOut
        }
    }
}
