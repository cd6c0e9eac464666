//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for SIGINT, SIGTERM (stop) and SIGUSR2 (restart)
//! - Translate signals into [`LifecycleEvent`]s on a single channel
//!
//! # Design Decisions
//! - Uses Tokio's signal handling; no logic runs inside a raw handler
//! - The channel holds one event. Signals arriving while it is full are
//!   coalesced, since repeats map to the same transition anyway
//! - When the controller closes its receiver the listener task exits.
//!   Tokio keeps the handlers installed, so later signals are swallowed
//!   instead of killing the process mid-drain

use std::io;

use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Signal that requests a graceful restart.
pub const RESTART_SIGNAL: Signal = Signal::SIGUSR2;

/// Signal `handoff-ctl stop` sends.
pub const STOP_SIGNAL: Signal = Signal::SIGTERM;

/// Capacity of the lifecycle event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1;

/// Which signal asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

/// Input to the lifecycle controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Drain and exit.
    Stop(StopSignal),
    /// Hand the listener to a successor, then drain and exit.
    Restart,
}

/// Producer half of the lifecycle event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl EventSender {
    /// Deliver `event` without waiting.
    ///
    /// Returns `false` once the controller has stopped listening.
    pub fn notify(&self, event: LifecycleEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::debug!(?event, "Lifecycle event coalesced with a pending one");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolve once the controller has stopped listening.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Create the lifecycle event channel.
pub fn event_channel() -> (EventSender, mpsc::Receiver<LifecycleEvent>) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    (EventSender { tx }, rx)
}

/// Register the lifecycle signal handlers and forward signals as events.
///
/// Handlers are installed before this returns. Must be called from within a
/// tokio runtime.
pub fn listen_for_signals() -> io::Result<mpsc::Receiver<LifecycleEvent>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut restart = signal(SignalKind::from_raw(RESTART_SIGNAL as i32))?;

    let (sender, rx) = event_channel();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = interrupt.recv() => LifecycleEvent::Stop(StopSignal::Interrupt),
                _ = terminate.recv() => LifecycleEvent::Stop(StopSignal::Terminate),
                _ = restart.recv() => LifecycleEvent::Restart,
                _ = sender.closed() => break,
            };

            tracing::info!(?event, "Signal received");
            if !sender.notify(event) {
                break;
            }
        }
        tracing::debug!("Signal listener stopped");
    });

    Ok(rx)
}
