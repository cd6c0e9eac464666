//! Test doubles for the lifecycle controller.

use std::io;
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::lifecycle::reload::{Reload, ReloadError};
use crate::lifecycle::server::Server;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::{Acceptor, Listener};

#[derive(Debug, Clone, Copy)]
pub enum ShutdownBehavior {
    /// Stop after the given delay.
    Complete(Duration),
    /// Never return from `shutdown`.
    Hang,
}

/// Server whose serve loop idles until shut down.
#[derive(Debug)]
pub struct MockServer {
    behavior: ShutdownBehavior,
    fail_serve: bool,
    stop: Shutdown,
    serve_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    last_deadline: Mutex<Option<Instant>>,
}

impl MockServer {
    pub fn new(behavior: ShutdownBehavior) -> Self {
        Self {
            behavior,
            fail_serve: false,
            stop: Shutdown::new(),
            serve_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            last_deadline: Mutex::new(None),
        }
    }

    /// A server whose serve loop fails immediately.
    pub fn failing() -> Self {
        Self {
            fail_serve: true,
            ..Self::new(ShutdownBehavior::Complete(Duration::ZERO))
        }
    }

    pub fn serve_calls(&self) -> usize {
        self.serve_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn last_deadline(&self) -> Option<Instant> {
        *self.last_deadline.lock().unwrap()
    }
}

impl Server for MockServer {
    async fn serve(&self, _acceptor: Acceptor) -> io::Result<()> {
        self.serve_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_serve {
            return Err(io::Error::other("accept loop broke"));
        }
        self.stop.triggered().await;
        Ok(())
    }

    async fn shutdown(&self, deadline: Instant) {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_deadline.lock().unwrap() = Some(deadline);
        self.stop.trigger();
        match self.behavior {
            ShutdownBehavior::Complete(delay) => tokio::time::sleep(delay).await,
            ShutdownBehavior::Hang => std::future::pending::<()>().await,
        }
    }
}

/// Reloader that records calls instead of spawning.
#[derive(Debug, Clone, Default)]
pub struct MockReloader {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl MockReloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            calls: Arc::default(),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Reload for MockReloader {
    fn reload(&self, listener: &Listener) -> Result<(), ReloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // The controller must hand over the live socket.
        assert!(crate::net::inspect_socket(listener.as_fd()).is_ok());
        if self.fail {
            Err(ReloadError::Spawn(io::Error::new(
                io::ErrorKind::NotFound,
                "no such executable",
            )))
        } else {
            Ok(())
        }
    }
}
