//! TLS acceptor choosing a certificate per connection from SNI.
//!
//! The ClientHello is read first; the server name it carries is handed to
//! the [`CertificateManager`], which may issue a certificate before the
//! handshake continues. Failures affect only the connection being accepted.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum_server::accept::Accept;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

use crate::acme::CertificateManager;

#[derive(Clone)]
pub struct AcmeAcceptor {
    certificates: Arc<CertificateManager>,
    handshake_timeout: Duration,
}

impl AcmeAcceptor {
    pub fn new(certificates: Arc<CertificateManager>, handshake_timeout: Duration) -> Self {
        Self {
            certificates,
            handshake_timeout,
        }
    }

    async fn handshake(&self, stream: TcpStream) -> io::Result<TlsStream<TcpStream>> {
        let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream).await?;
        let server_name = start.client_hello().server_name().map(str::to_string);

        let material = self
            .certificates
            .certificate_for(server_name.as_deref())
            .await
            .map_err(|e| {
                tracing::debug!(server_name = ?server_name, error = %e, "No certificate for handshake");
                io::Error::new(io::ErrorKind::InvalidData, e)
            })?;

        start.into_stream(material.server_config()).await
    }
}

impl<S> Accept<TcpStream, S> for AcmeAcceptor
where
    S: Send + 'static,
{
    type Stream = TlsStream<TcpStream>;
    type Service = S;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        let acceptor = self.clone();
        async move {
            let peer = stream.peer_addr().ok();
            match tokio::time::timeout(acceptor.handshake_timeout, acceptor.handshake(stream)).await {
                Ok(Ok(tls)) => Ok((tls, service)),
                Ok(Err(e)) => {
                    tracing::warn!(peer = ?peer, error = %e, "TLS handshake failed");
                    Err(e)
                }
                Err(_) => {
                    tracing::warn!(peer = ?peer, "TLS handshake timed out");
                    Err(io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))
                }
            }
        }
        .boxed()
    }
}
