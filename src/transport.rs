//! Transport - TLS connector and the byte-stream traits the session runs on.
//!
//! The session never touches sockets directly; it speaks to boxed
//! [`TransportRead`] / [`TransportWrite`] halves handed out by a
//! [`Connector`]. Production uses [`TlsConnector`]; tests swap in
//! [`MemoryConnector`] to drive both ends of a session in-process.

use async_trait::async_trait;
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::core::{Error, Result};

const READ_BUF_SIZE: usize = 4096;

/// Receiving half of a connection.
#[async_trait]
pub trait TransportRead: Send {
    /// Wait up to `timeout` for bytes. `Ok(None)` means the timeout passed
    /// with nothing to read; [`Error::Disconnected`] means the peer closed.
    async fn recv_bytes(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

/// Sending half of a connection.
#[async_trait]
pub trait TransportWrite: Send {
    async fn send_bytes(&mut self, bytes: &[u8]) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Dials a host and hands back the two halves of the connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<(Box<dyn TransportRead>, Box<dyn TransportWrite>)>;
}

/// [`TransportRead`] over any async byte reader.
pub struct StreamRead<R> {
    reader: R,
}

impl<R> StreamRead<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> TransportRead for StreamRead<R> {
    async fn recv_bytes(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        match tokio::time::timeout(timeout, self.reader.read(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => Err(Error::Disconnected),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Ok(Err(e)) => Err(Error::Io(e)),
        }
    }
}

/// [`TransportWrite`] over any async byte writer.
pub struct StreamWrite<W> {
    writer: W,
}

impl<W> StreamWrite<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TransportWrite for StreamWrite<W> {
    async fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// TCP + TLS connector for live counterparties.
#[derive(Debug, Default)]
pub struct TlsConnector {
    danger_accept_invalid_certs: bool,
}

impl TlsConnector {
    pub fn new(danger_accept_invalid_certs: bool) -> Self {
        Self { danger_accept_invalid_certs }
    }

    fn client_config(&self) -> rustls::ClientConfig {
        if self.danger_accept_invalid_certs {
            warn!("TLS certificate verification is DISABLED");
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<(Box<dyn TransportRead>, Box<dyn TransportWrite>)> {
        info!("Connecting to {}:{}", host, port);
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;

        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|_| Error::Tls(format!("invalid server name: {host}")))?;
        let connector = tokio_rustls::TlsConnector::from(Arc::new(self.client_config()));
        let tls = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(format!("handshake with {host}:{port} failed: {e}")))?;
        info!("TLS session established with {}:{}", host, port);

        let (read, write) = tokio::io::split(tls);
        Ok((
            Box::new(StreamRead::new(read)),
            Box::new(StreamWrite::new(write)),
        ))
    }
}

/// Accepts any server certificate. Signatures are still checked against
/// whatever certificate the peer presented.
#[derive(Debug)]
struct NoVerification(rustls::crypto::CryptoProvider);

impl NoVerification {
    fn new() -> Self {
        Self(rustls::crypto::ring::default_provider())
    }
}

impl rustls::client::danger::ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// In-memory connector for tests. [`MemoryConnector::pair`] returns the
/// connector plus the far end's halves, so a test can play counterparty.
pub struct MemoryConnector {
    halves: Mutex<Option<(Box<dyn TransportRead>, Box<dyn TransportWrite>)>>,
}

impl MemoryConnector {
    pub fn pair(capacity: usize) -> (Self, Box<dyn TransportRead>, Box<dyn TransportWrite>) {
        let (near, far) = tokio::io::duplex(capacity);
        let (near_read, near_write) = tokio::io::split(near);
        let (far_read, far_write) = tokio::io::split(far);
        let connector = Self {
            halves: Mutex::new(Some((
                Box::new(StreamRead::new(near_read)) as Box<dyn TransportRead>,
                Box::new(StreamWrite::new(near_write)) as Box<dyn TransportWrite>,
            ))),
        };
        (
            connector,
            Box::new(StreamRead::new(far_read)),
            Box::new(StreamWrite::new(far_write)),
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        _host: &str,
        _port: u16,
    ) -> Result<(Box<dyn TransportRead>, Box<dyn TransportWrite>)> {
        self.halves
            .lock()
            .take()
            .ok_or_else(|| Error::Session("memory transport already consumed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pair_round_trips_bytes() {
        let (connector, mut far_read, mut far_write) = MemoryConnector::pair(1024);
        let (mut near_read, mut near_write) = connector.connect("test", 0).await.unwrap();

        near_write.send_bytes(b"ping").await.unwrap();
        let received = far_read
            .recv_bytes(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"ping");

        far_write.send_bytes(b"pong").await.unwrap();
        let received = near_read
            .recv_bytes(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"pong");
    }

    #[tokio::test]
    async fn recv_timeout_returns_none() {
        let (connector, _far_read, _far_write) = MemoryConnector::pair(1024);
        let (mut near_read, _near_write) = connector.connect("test", 0).await.unwrap();

        let received = near_read.recv_bytes(Duration::from_millis(20)).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn peer_close_surfaces_as_disconnected() {
        let (connector, far_read, mut far_write) = MemoryConnector::pair(1024);
        let (mut near_read, _near_write) = connector.connect("test", 0).await.unwrap();

        far_write.close().await.unwrap();
        drop(far_read);
        let result = near_read.recv_bytes(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Disconnected)));
    }

    #[tokio::test]
    async fn memory_connector_only_connects_once() {
        let (connector, _far_read, _far_write) = MemoryConnector::pair(1024);
        connector.connect("test", 0).await.unwrap();
        assert!(connector.connect("test", 0).await.is_err());
    }
}
