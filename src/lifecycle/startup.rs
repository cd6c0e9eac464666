//! Startup orchestration.
//!
//! # Responsibilities
//! - Write the PID file
//! - Read the restart marker once
//! - Acquire the listener (bind, or adopt the inherited one)
//! - Load the TLS certificate when HTTPS is configured
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The PID file is written before the listener exists, so a successor
//!   takes over the file before it takes over traffic

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::{ConfigError, ServiceConfig};
use crate::lifecycle::reload::restart_marker_set;
use crate::net::{load_tls_config, Listener, ListenerError, ListenerProvider};

/// Errors that abort process startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to write pid file {}: {source}", .path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to load TLS certificate {cert} / key {key}: {source}")]
    Tls {
        cert: String,
        key: String,
        #[source]
        source: io::Error,
    },
}

/// Write this process's id as decimal text, replacing any previous content.
pub fn write_pid_file(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)?;
    file.write_all(std::process::id().to_string().as_bytes())
}

/// Read a pid written by [`write_pid_file`].
///
/// Only positive values are accepted: `kill` treats 0 and negative pids as
/// process groups.
pub fn read_pid_file(path: &Path) -> io::Result<i32> {
    let content = std::fs::read_to_string(path)?;
    let invalid = |reason: String| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} does not hold a pid: {reason}", path.display()),
        )
    };

    let pid = content
        .trim()
        .parse::<i32>()
        .map_err(|e| invalid(e.to_string()))?;
    if pid <= 0 {
        return Err(invalid(format!("{pid} is not a process id")));
    }
    Ok(pid)
}

/// Load the configured certificate, if any.
///
/// Runs before the listener is acquired, so a successor with a broken
/// certificate exits without ever accepting.
pub async fn load_tls(config: &ServiceConfig) -> Result<Option<RustlsConfig>, StartupError> {
    let Some(tls) = &config.tls else {
        return Ok(None);
    };

    let loaded = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path))
        .await
        .map_err(|source| StartupError::Tls {
            cert: tls.cert_path.clone(),
            key: tls.key_path.clone(),
            source,
        })?;

    tracing::info!(cert = %tls.cert_path, "TLS certificate loaded");
    Ok(Some(loaded))
}

/// Run the startup sequence using this process's restart marker.
pub async fn prepare(config: &ServiceConfig) -> Result<Listener, StartupError> {
    prepare_with(config, ListenerProvider::new(), restart_marker_set()).await
}

/// Run the startup sequence with an explicit provider and marker value.
pub async fn prepare_with(
    config: &ServiceConfig,
    provider: ListenerProvider,
    inherited: bool,
) -> Result<Listener, StartupError> {
    let pid_path = PathBuf::from(&config.lifecycle.pid_file);
    write_pid_file(&pid_path).map_err(|source| StartupError::PidFile {
        path: pid_path.clone(),
        source,
    })?;

    let listener = provider
        .acquire(&config.listener.bind_address, inherited)
        .await?;

    match listener.local_addr() {
        Ok(address) if inherited => {
            tracing::info!(%address, pid = std::process::id(), "Starting server (graceful mode)")
        }
        Ok(address) => tracing::info!(%address, pid = std::process::id(), "Starting server"),
        Err(e) => tracing::warn!(error = %e, "Listener has no local address"),
    }

    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ListenerOrigin;
    use std::os::fd::IntoRawFd;
    use std::os::unix::fs::PermissionsExt;

    fn config_in(dir: &Path) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.listener.bind_address = "127.0.0.1:0".into();
        config.lifecycle.pid_file = dir.join("service.pid").display().to_string();
        config
    }

    #[test]
    fn pid_file_is_replaced_with_decimal_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.pid");
        std::fs::write(&path, "a much longer stale content").unwrap();

        write_pid_file(&path).unwrap();

        assert_eq!(read_pid_file(&path).unwrap(), std::process::id() as i32);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );

        let fresh = dir.path().join("fresh.pid");
        write_pid_file(&fresh).unwrap();
        let mode = std::fs::metadata(&fresh).unwrap().permissions().mode();
        assert_eq!(mode & 0o600, 0o600);
        assert_eq!(mode & 0o111, 0);
    }

    #[test]
    fn garbage_pid_file_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.pid");
        std::fs::write(&path, "not-a-pid").unwrap();

        let err = read_pid_file(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn non_positive_pid_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.pid");

        for content in ["0", "-1", "-42\n"] {
            std::fs::write(&path, content).unwrap();
            let err = read_pid_file(&path).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData, "accepted {content:?}");
        }

        std::fs::write(&path, "1\n").unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), 1);
    }

    #[tokio::test]
    async fn fresh_start_writes_pid_and_binds() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let listener = prepare_with(&config, ListenerProvider::new(), false)
            .await
            .unwrap();

        assert_eq!(listener.origin(), ListenerOrigin::Fresh);
        let pid_path = Path::new(&config.lifecycle.pid_file);
        assert_eq!(read_pid_file(pid_path).unwrap(), std::process::id() as i32);
    }

    #[tokio::test]
    async fn inherited_start_adopts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let slot = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let slot_addr = slot.local_addr().unwrap();

        let provider = ListenerProvider::with_inherited_fd(slot.into_raw_fd());
        let listener = prepare_with(&config, provider, true).await.unwrap();

        assert_eq!(listener.origin(), ListenerOrigin::Inherited);
        assert_eq!(listener.local_addr().unwrap(), slot_addr);
    }

    #[tokio::test]
    async fn unwritable_pid_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.lifecycle.pid_file = dir
            .path()
            .join("missing-dir/service.pid")
            .display()
            .to_string();

        let err = prepare_with(&config, ListenerProvider::new(), false)
            .await
            .unwrap_err();

        assert!(matches!(err, StartupError::PidFile { .. }));
    }

    #[tokio::test]
    async fn tls_is_optional() {
        let config = ServiceConfig::default();
        assert!(load_tls(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_certificate_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.tls = Some(crate::config::TlsConfig {
            cert_path: dir.path().join("cert.pem").display().to_string(),
            key_path: dir.path().join("key.pem").display().to_string(),
        });

        let result = load_tls(&config).await;
        assert!(matches!(result, Err(StartupError::Tls { .. })));
    }

    #[tokio::test]
    async fn configured_certificate_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = crate::net::tls::testing::write_self_signed(dir.path());
        let mut config = config_in(dir.path());
        config.tls = Some(crate::config::TlsConfig {
            cert_path: cert.display().to_string(),
            key_path: key.display().to_string(),
        });

        assert!(load_tls(&config).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bind_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = config_in(dir.path());
        config.listener.bind_address = occupied.local_addr().unwrap().to_string();

        let err = prepare_with(&config, ListenerProvider::new(), false)
            .await
            .unwrap_err();

        assert!(matches!(err, StartupError::Listener(ListenerError::Bind { .. })));
    }
}
