//! Listening socket acquisition.
//!
//! # Responsibilities
//! - Bind a fresh TCP listener on the configured address
//! - Or adopt the listener handed over by a predecessor at a fixed descriptor
//! - Hand out accept handles sharing the one socket
//!
//! # Design Decisions
//! - One `Listener` per process, owned by the lifecycle controller
//! - Accept handles share the socket through an `Arc`, so there is exactly
//!   one close of the underlying descriptor in this process
//! - An inherited descriptor is inspected before ownership is taken; an
//!   invalid slot is reported, never closed

use std::borrow::Cow;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, RawFd};
use std::sync::Arc;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use socket2::{SockRef, Type};
use thiserror::Error;
use tokio::net::TcpListener;

use crate::net::connection::{ConnectionTracker, TrackedStream};

/// Descriptor slot a successor finds its inherited listener in: the first
/// one after stdin, stdout and stderr.
pub const INHERITED_FD: RawFd = 3;

/// Error type for listener acquisition.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to parse or bind the address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The inherited slot holds no usable listening socket.
    #[error("inherited descriptor {fd} is not a listening TCP socket: {reason}")]
    InheritedDescriptorInvalid { fd: RawFd, reason: String },
}

/// Where a process got its listener from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerOrigin {
    Fresh,
    Inherited,
}

impl ListenerOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerOrigin::Fresh => "fresh",
            ListenerOrigin::Inherited => "inherited",
        }
    }
}

impl std::fmt::Display for ListenerOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of inspecting a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// An IPv4 or IPv6 stream socket that is (or, off Linux, may be) listening.
    TcpListener(SocketAddr),
    /// Any other socket: Unix-domain, datagram, or not listening.
    Other,
}

/// Classify the socket behind `fd`. Fails if `fd` is not a socket.
pub fn inspect_socket(fd: BorrowedFd<'_>) -> io::Result<SocketKind> {
    let socket = SockRef::from(&fd);

    if socket.r#type()? != Type::STREAM {
        return Ok(SocketKind::Other);
    }

    let Some(addr) = socket.local_addr()?.as_socket() else {
        return Ok(SocketKind::Other);
    };

    #[cfg(target_os = "linux")]
    {
        if !socket.is_listener()? {
            return Ok(SocketKind::Other);
        }
    }

    Ok(SocketKind::TcpListener(addr))
}

/// Expand a bare `:port` to the unspecified address.
fn bind_target(address: &str) -> Cow<'_, str> {
    if address.starts_with(':') {
        Cow::Owned(format!("0.0.0.0{address}"))
    } else {
        Cow::Borrowed(address)
    }
}

/// The process's single listening socket.
#[derive(Debug)]
pub struct Listener {
    inner: Arc<TcpListener>,
    origin: ListenerOrigin,
    tracker: ConnectionTracker,
}

impl Listener {
    fn new(inner: TcpListener, origin: ListenerOrigin) -> Self {
        Self {
            inner: Arc::new(inner),
            origin,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Bind and listen on `address`.
    ///
    /// Accepts `ip:port`, `host:port` (resolved, first usable address wins)
    /// and `:port` for every IPv4 interface.
    pub async fn bind(address: &str) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(bind_target(address).as_ref())
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.to_string(),
                source,
            })?;

        Ok(Self::new(listener, ListenerOrigin::Fresh))
    }

    /// Adopt the listening socket at `fd`, taking ownership of it.
    ///
    /// Must be called from within a tokio runtime, and at most once per
    /// descriptor.
    pub fn from_inherited(fd: RawFd) -> Result<Self, ListenerError> {
        let invalid = |reason: String| ListenerError::InheritedDescriptorInvalid { fd, reason };

        fcntl(fd, FcntlArg::F_GETFD).map_err(|e| invalid(format!("descriptor not open: {e}")))?;

        // SAFETY: F_GETFD succeeded, so `fd` is open for the duration of the borrow.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        match inspect_socket(borrowed) {
            Ok(SocketKind::TcpListener(_)) => {}
            Ok(SocketKind::Other) => return Err(invalid("not a listening TCP socket".into())),
            Err(e) => return Err(invalid(e.to_string())),
        }

        // Whatever this process spawns later must not inherit the slot implicitly.
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| invalid(format!("cannot set close-on-exec: {e}")))?;

        // SAFETY: the descriptor was installed by our predecessor for this
        // process to own, and it was verified above to be a TCP listener.
        let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
        std_listener
            .set_nonblocking(true)
            .map_err(|e| invalid(e.to_string()))?;
        let listener = TcpListener::from_std(std_listener).map_err(|e| invalid(e.to_string()))?;

        Ok(Self::new(listener, ListenerOrigin::Inherited))
    }

    pub fn origin(&self) -> ListenerOrigin {
        self.origin
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Connections accepted through any acceptor of this listener.
    pub fn connections(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// A handle for the serve loop. Shares the socket; does not duplicate it.
    pub fn acceptor(&self) -> Acceptor {
        Acceptor {
            inner: Arc::clone(&self.inner),
            tracker: self.tracker.clone(),
        }
    }
}

impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

/// Accept side of a [`Listener`], handed to the serve loop.
#[derive(Debug, Clone)]
pub struct Acceptor {
    inner: Arc<TcpListener>,
    tracker: ConnectionTracker,
}

impl Acceptor {
    /// Accept one connection, tracked until the returned stream is dropped.
    pub async fn accept_tracked(&self) -> io::Result<(TrackedStream, SocketAddr)> {
        let (stream, peer_addr) = self.inner.accept().await?;
        let stream = TrackedStream::new(stream, self.tracker.track());

        tracing::debug!(
            peer_addr = %peer_addr,
            connection_id = %stream.id(),
            active_connections = self.tracker.active_count(),
            "Connection accepted"
        );

        Ok((stream, peer_addr))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Obtains the listener for this process: fresh bind or adoption.
#[derive(Debug)]
pub struct ListenerProvider {
    inherited_fd: RawFd,
}

impl ListenerProvider {
    pub fn new() -> Self {
        Self {
            inherited_fd: INHERITED_FD,
        }
    }

    /// Use a different inherited slot.
    #[cfg(test)]
    pub(crate) fn with_inherited_fd(inherited_fd: RawFd) -> Self {
        Self { inherited_fd }
    }

    /// Acquire the listener. When `inherited` is set the address is not
    /// bound; the socket at the inherited slot is adopted instead.
    pub async fn acquire(self, address: &str, inherited: bool) -> Result<Listener, ListenerError> {
        let listener = if inherited {
            Listener::from_inherited(self.inherited_fd)?
        } else {
            Listener::bind(address).await?
        };

        if let Ok(local_addr) = listener.local_addr() {
            tracing::info!(
                address = %local_addr,
                origin = %listener.origin(),
                "Listener acquired"
            );
        }

        Ok(listener)
    }
}

impl Default for ListenerProvider {
    fn default() -> Self {
        Self::new()
    }
}
