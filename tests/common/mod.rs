//! Shared utilities for process-level tests.

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use graceful_handoff::http::Identity;
use graceful_handoff::lifecycle::{read_pid_file, RESTART_MARKER_ENV};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tempfile::TempDir;

/// A port nothing is listening on right now.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap()
}

/// A `graceful-handoff` process started for a test, with its own pid file.
///
/// On drop, kills both the spawned process and whatever pid the pid file
/// names (a successor, after a restart).
pub struct Service {
    pub child: Child,
    pub addr: SocketAddr,
    pub pid_file: PathBuf,
    scheme: &'static str,
    _dir: TempDir,
}

impl Service {
    pub fn spawn(extra_args: &[&str]) -> Self {
        Self::start(tempfile::tempdir().unwrap(), "http", extra_args)
    }

    /// Serve HTTPS with a freshly generated self-signed certificate.
    pub fn spawn_tls(extra_args: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, cert.serialize_pem().unwrap()).unwrap();
        std::fs::write(&key_path, cert.serialize_private_key_pem()).unwrap();

        let cert_arg = cert_path.display().to_string();
        let key_arg = key_path.display().to_string();
        let mut args = vec!["--tls-cert", cert_arg.as_str(), "--tls-key", key_arg.as_str()];
        args.extend_from_slice(extra_args);

        Self::start(dir, "https", &args)
    }

    fn start(dir: TempDir, scheme: &'static str, extra_args: &[&str]) -> Self {
        let pid_file = dir.path().join("service.pid");
        let addr: SocketAddr = format!("127.0.0.1:{}", free_port()).parse().unwrap();

        let child = Command::new(env!("CARGO_BIN_EXE_graceful-handoff"))
            .arg("--bind")
            .arg(addr.to_string())
            .arg("--pid-file")
            .arg(&pid_file)
            .args(extra_args)
            .env_remove(RESTART_MARKER_ENV)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        Self {
            child,
            addr,
            pid_file,
            scheme,
            _dir: dir,
        }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.addr, path)
    }

    pub fn recorded_pid(&self) -> i32 {
        read_pid(&self.pid_file)
    }

    pub fn signal(&self, signal: Signal) {
        send_signal(self.pid() as i32, signal);
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        if let Ok(pid) = read_pid_file(&self.pid_file) {
            if pid != self.child.id() as i32 {
                let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn read_pid(path: &Path) -> i32 {
    read_pid_file(path).unwrap()
}

pub fn send_signal(pid: i32, signal: Signal) {
    kill(Pid::from_raw(pid), signal).unwrap();
}

/// Poll `/` until the service answers, returning its identity.
pub async fn wait_until_serving(client: &reqwest::Client, url: &str) -> Identity {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(response) = client.get(url).send().await {
            if let Ok(identity) = response.json::<Identity>().await {
                return identity;
            }
        }
        assert!(Instant::now() < deadline, "service at {url} never came up");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Wait until the pid file exists and holds a pid.
pub async fn wait_for_pid_file(path: &Path) -> i32 {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(pid) = read_pid_file(path) {
            return pid;
        }
        assert!(Instant::now() < deadline, "{} never written", path.display());
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub async fn get_identity(client: &reqwest::Client, url: &str) -> Identity {
    client.get(url).send().await.unwrap().json().await.unwrap()
}

/// Wait up to `timeout` for `child` to exit.
pub async fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}
