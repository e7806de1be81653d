//! rustls server configuration from PEM material.

use std::sync::Arc;

use rustls::crypto::aws_lc_rs;
use rustls::ServerConfig;

/// Error building a TLS server configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read PEM: {0}")]
    Pem(#[from] std::io::Error),
    #[error("no certificate found in PEM")]
    NoCertificate,
    #[error("no private key found in PEM")]
    NoPrivateKey,
    #[error("invalid TLS material: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Build a server config presenting `cert_pem` (leaf first) with `key_pem`.
pub fn server_config_from_pem(cert_pem: &str, key_pem: &str) -> Result<Arc<ServerConfig>, TlsError> {
    let mut cert_reader = cert_pem.as_bytes();
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate);
    }

    let mut key_reader = key_pem.as_bytes();
    let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or(TlsError::NoPrivateKey)?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}
