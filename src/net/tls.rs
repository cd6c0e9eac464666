//! TLS certificate loading.
//!
//! TLS runs on top of the process listener, so an inherited socket serves
//! HTTPS exactly like a freshly bound one. Certificates are read at startup;
//! a successor picks up renewed files from disk.

use std::io;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

/// Load a certificate chain and private key, both PEM.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> io::Result<RustlsConfig> {
    for (what, path) in [("certificate", cert_path), ("private key", key_path)] {
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{what} file not found: {}", path.display()),
            ));
        }
    }

    RustlsConfig::from_pem_file(cert_path, key_path).await
}
