//! Graceful restart: hand the live listener to a freshly spawned successor.
//!
//! # Responsibilities
//! - Check the listener can be exported (TCP only)
//! - Duplicate its descriptor and install the copy at fd 3 in the child
//! - Mark the child's environment so it adopts instead of binding
//! - Spawn the same executable with the same arguments and stdio
//!
//! # Design Decisions
//! - Fire-and-forget: returns as soon as the spawn call does. The caller
//!   gives the successor time to start before it stops accepting.
//! - The parent's duplicate is closed when `reload` returns; the live
//!   listener keeps serving until the predecessor drains.
//! - No retries. A failed spawn is reported to the caller.

use std::env;
use std::ffi::OsString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::dup2;
use thiserror::Error;

use crate::net::{inspect_socket, Listener, SocketKind, INHERITED_FD};

/// Environment variable that tells a process it was spawned to adopt an
/// inherited listener.
pub const RESTART_MARKER_ENV: &str = "_GRACEFUL_RESTART";

/// Value of [`RESTART_MARKER_ENV`] in a successor's environment.
pub const RESTART_MARKER_VALUE: &str = "true";

/// Read the restart marker from this process's environment.
pub fn restart_marker_set() -> bool {
    env::var(RESTART_MARKER_ENV).is_ok_and(|value| value == RESTART_MARKER_VALUE)
}

/// Error type for restart attempts.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// Only TCP listeners are handed over.
    #[error("listener is not a TCP listener and cannot be handed over")]
    UnsupportedListenerKind,

    /// The listener's descriptor could not be exported.
    #[error("failed to duplicate listener descriptor: {0}")]
    DuplicateDescriptor(#[source] io::Error),

    /// The successor could not be started.
    #[error("failed to spawn successor process: {0}")]
    Spawn(#[source] io::Error),
}

/// Starts a successor process that takes over a listener.
pub trait Reload {
    fn reload(&self, listener: &Listener) -> Result<(), ReloadError>;
}

/// [`Reload`] implementation that re-executes a program with the listener at
/// [`INHERITED_FD`].
#[derive(Debug, Clone, Default)]
pub struct ProcessReloader {
    command: Option<(PathBuf, Vec<OsString>)>,
}

impl ProcessReloader {
    /// Re-execute the current executable with the current arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute `program` with `args` instead of the current executable.
    pub fn with_command<I, A>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            command: Some((program.into(), args.into_iter().map(Into::into).collect())),
        }
    }

    fn command_line(&self) -> io::Result<(PathBuf, Vec<OsString>)> {
        match &self.command {
            Some(command) => Ok(command.clone()),
            None => Ok((env::current_exe()?, env::args_os().skip(1).collect())),
        }
    }

    /// Spawn the successor with the socket behind `fd`. Returns its pid.
    pub fn spawn_successor(&self, fd: BorrowedFd<'_>) -> Result<u32, ReloadError> {
        match inspect_socket(fd) {
            Ok(SocketKind::TcpListener(_)) => {}
            Ok(SocketKind::Other) => return Err(ReloadError::UnsupportedListenerKind),
            Err(e) => return Err(ReloadError::DuplicateDescriptor(e)),
        }

        let handoff = fd
            .try_clone_to_owned()
            .map_err(ReloadError::DuplicateDescriptor)?;
        let handoff_fd = handoff.as_raw_fd();

        let (program, args) = self.command_line().map_err(ReloadError::Spawn)?;

        let mut command = Command::new(&program);
        command
            .args(&args)
            .env(RESTART_MARKER_ENV, RESTART_MARKER_VALUE)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        // SAFETY: the hook runs in the forked child before exec and only
        // issues dup2/fcntl, both async-signal-safe.
        unsafe {
            command.pre_exec(move || install_inherited_fd(handoff_fd, INHERITED_FD));
        }

        let child = command.spawn().map_err(ReloadError::Spawn)?;
        let successor_pid = child.id();

        tracing::info!(
            successor_pid,
            program = %program.display(),
            inherited_fd = INHERITED_FD,
            "Successor process spawned"
        );

        // Closes this process's duplicate; the child keeps its own copy.
        drop(handoff);
        Ok(successor_pid)
    }
}

impl Reload for ProcessReloader {
    fn reload(&self, listener: &Listener) -> Result<(), ReloadError> {
        self.spawn_successor(listener.as_fd()).map(|_| ())
    }
}

/// Place `source` at `target` without close-on-exec.
fn install_inherited_fd(source: RawFd, target: RawFd) -> io::Result<()> {
    if source == target {
        // dup2 onto itself is a no-op and would leave close-on-exec set.
        fcntl(target, FcntlArg::F_SETFD(FdFlag::empty()))?;
    } else {
        dup2(source, target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::{Duration, Instant};

    fn wait_for_file(path: &Path) -> String {
        let started = Instant::now();
        loop {
            if let Ok(content) = std::fs::read_to_string(path) {
                if content.ends_with('\n') {
                    return content;
                }
            }
            assert!(
                started.elapsed() < Duration::from_secs(5),
                "successor never wrote {}",
                path.display()
            );
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn successor_gets_socket_at_fd_3_and_marker() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("successor.txt");

        let script = format!(
            "printf '%s %s\\n' \"${RESTART_MARKER_ENV}\" \"$(readlink /proc/$$/fd/3)\" > {}",
            out.display()
        );
        let reloader = ProcessReloader::with_command("/bin/sh", ["-c", script.as_str()]);

        reloader.reload(&listener).unwrap();

        let report = wait_for_file(&out);
        let ours = std::fs::read_link(format!(
            "/proc/self/fd/{}",
            listener.as_fd().as_raw_fd()
        ))
        .unwrap();
        assert_eq!(
            report.trim_end(),
            format!("true {}", ours.display()),
            "successor must see the marker and the same socket"
        );
    }

    #[test]
    fn unix_listener_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let unix = std::os::unix::net::UnixListener::bind(dir.path().join("s.sock")).unwrap();

        let err = ProcessReloader::with_command("/bin/true", Vec::<String>::new())
            .spawn_successor(unix.as_fd())
            .unwrap_err();

        assert!(matches!(err, ReloadError::UnsupportedListenerKind));
    }

    #[test]
    fn non_socket_descriptor_cannot_be_exported() {
        let file = tempfile::tempfile().unwrap();

        let err = ProcessReloader::with_command("/bin/true", Vec::<String>::new())
            .spawn_successor(file.as_fd())
            .unwrap_err();

        assert!(matches!(err, ReloadError::DuplicateDescriptor(_)));
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_error() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();

        let err = ProcessReloader::with_command("/nonexistent/successor", Vec::<String>::new())
            .reload(&listener)
            .unwrap_err();

        assert!(matches!(err, ReloadError::Spawn(_)));
        // The predecessor's listener is untouched.
        assert!(listener.local_addr().is_ok());
    }

    #[test]
    fn install_onto_same_slot_clears_cloexec() {
        use std::os::fd::IntoRawFd;

        let file = tempfile::tempfile().unwrap();
        let fd = file.into_raw_fd();
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).unwrap();

        install_inherited_fd(fd, fd).unwrap();

        let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).unwrap());
        assert!(!flags.contains(FdFlag::FD_CLOEXEC));
        nix::unistd::close(fd).unwrap();
    }
}
