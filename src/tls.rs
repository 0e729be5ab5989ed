//! TLS credential loading. Certificates and keys are read once at startup;
//! any problem with them is a fatal startup error.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::{Config, StartupError};

/// Builds a TLS acceptor when both credential paths are configured.
/// Returns `Ok(None)` for a plain-HTTP deployment; configuring only one of
/// the two paths is an error.
pub fn build_acceptor(config: &Config) -> Result<Option<TlsAcceptor>, StartupError> {
    let (cert_path, key_path) = match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => (cert, key),
        (None, None) => return Ok(None),
        _ => {
            return Err(StartupError::Tls(
                "TLS_CERT_PATH and TLS_KEY_PATH must be set together".into(),
            ))
        }
    };

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let mut server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| StartupError::Tls(format!("invalid certificate/key pair: {e}")))?;
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, StartupError> {
    let file = File::open(path).map_err(|e| {
        StartupError::Tls(format!(
            "failed to open certificate file '{}': {e}",
            path.display()
        ))
    })?;
    let mut reader = BufReader::new(file);

    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            StartupError::Tls(format!(
                "failed to parse certificates from '{}': {e}",
                path.display()
            ))
        })?;

    if certs.is_empty() {
        return Err(StartupError::Tls(format!(
            "no certificates found in '{}'",
            path.display()
        )));
    }

    tracing::debug!(count = certs.len(), path = %path.display(), "loaded certificates");
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, StartupError> {
    let file = File::open(path).map_err(|e| {
        StartupError::Tls(format!(
            "failed to open private key file '{}': {e}",
            path.display()
        ))
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            StartupError::Tls(format!(
                "failed to parse private key from '{}': {e}",
                path.display()
            ))
        })?
        .ok_or_else(|| {
            StartupError::Tls(format!("no private key found in '{}'", path.display()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::CaptureMode;
    use std::path::PathBuf;

    fn test_config(cert: Option<&str>, key: Option<&str>) -> Config {
        Config {
            port: 0,
            formatter_path: PathBuf::from("indent"),
            timeout_ms: 1_000,
            capture_mode: CaptureMode::Stdout,
            sandbox_enabled: false,
            tls_cert_path: cert.map(PathBuf::from),
            tls_key_path: key.map(PathBuf::from),
            shutdown_grace_ms: 1_000,
        }
    }

    #[test]
    fn no_tls_configured_yields_plain_listener() {
        let acceptor = build_acceptor(&test_config(None, None)).unwrap();
        assert!(acceptor.is_none());
    }

    #[test]
    fn half_configured_tls_is_a_startup_error() {
        assert!(build_acceptor(&test_config(Some("/etc/fmtd/cert.pem"), None)).is_err());
        assert!(build_acceptor(&test_config(None, Some("/etc/fmtd/key.pem"))).is_err());
    }

    #[test]
    fn missing_credential_files_are_a_startup_error() {
        let config = test_config(Some("/nonexistent/cert.pem"), Some("/nonexistent/key.pem"));
        let err = build_acceptor(&config).err().unwrap();
        assert!(err.to_string().contains("certificate"));
    }
}
