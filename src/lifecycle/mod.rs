//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Write PID file → Read restart marker → Bind or adopt listener
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → LifecycleEvent::Stop
//!     SIGUSR2        → LifecycleEvent::Restart
//!
//! Controller (controller.rs):
//!     Stop    → Drain (shutdown.rs) → Exit
//!     Restart → Spawn successor (reload.rs) → Grace period → Drain → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: PID file, then listener, then serving
//! - Ordered shutdown: stop accepting, drain, exit
//! - Shutdown has a deadline: the process exits once it passes

pub mod controller;
pub mod reload;
pub mod server;
pub mod shutdown;
pub mod signals;
pub mod startup;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{
    LifecycleController, LifecycleError, LifecycleTiming, ProcessState, Termination,
    TerminationCause,
};
pub use reload::{ProcessReloader, Reload, ReloadError, RESTART_MARKER_ENV};
pub use server::Server;
pub use shutdown::{drain, DrainResult, Shutdown};
pub use signals::{listen_for_signals, LifecycleEvent, StopSignal, RESTART_SIGNAL, STOP_SIGNAL};
pub use startup::{read_pid_file, StartupError};
