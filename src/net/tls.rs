//! TLS configuration and certificate loading.

use std::path::Path;
use std::time::Duration;

use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};

use crate::config::ListenerConfig;

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Build the handshake acceptor for a listener, if TLS is configured.
pub async fn acceptor_for(config: &ListenerConfig) -> Result<Option<RustlsAcceptor>, std::io::Error> {
    let Some(tls) = &config.tls else {
        return Ok(None);
    };

    let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
    tracing::info!(cert_path = %tls.cert_path, "TLS enabled");

    Ok(Some(
        RustlsAcceptor::new(rustls).handshake_timeout(Duration::from_millis(config.handshake_timeout_ms)),
    ))
}
