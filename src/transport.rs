//! Socket transport for the collector connection.
//!
//! A [`Transport`] wraps one TCP connection, optionally upgraded to TLS,
//! and exposes the small read/write surface the connection task needs.
//! Transports are single use: every connection attempt builds a fresh one
//! and a failed transport is dropped, never reused.

use std::io;
use std::time::Duration;

use native_tls::Certificate;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::TlsStream;
use tracing::debug;

use crate::config::{ConnectionOptions, TlsOptions};

/// Errors that can occur while establishing or using a connection.
#[derive(Debug)]
pub enum TransportError {
    /// TCP connect to the collector failed
    Connect(io::Error),

    /// Connect or TLS handshake did not finish within the allowed time
    Timeout(Duration),

    /// TLS configuration or handshake failed
    Tls(native_tls::Error),

    /// Read or write on an established connection failed
    Io(io::Error),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Connect(e) => write!(f, "Failed to connect to collector: {}", e),
            TransportError::Timeout(limit) => {
                write!(f, "Connection attempt timed out after {:?}", limit)
            }
            TransportError::Tls(e) => write!(f, "TLS error: {}", e),
            TransportError::Io(e) => write!(f, "Connection I/O error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Connect(e) => Some(e),
            TransportError::Tls(e) => Some(e),
            TransportError::Io(e) => Some(e),
            TransportError::Timeout(_) => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Io(err)
    }
}

/// One live connection to the collector.
#[derive(Debug)]
pub struct Transport {
    stream: Stream,
}

#[derive(Debug)]
enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    /// Open the TCP leg of a connection.
    ///
    /// The returned transport is not yet secured; call [`Transport::handshake`]
    /// before sending frames.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connect` if the dial fails and
    /// `TransportError::Timeout` if it outlasts the configured limit.
    pub(crate) async fn connect(options: &ConnectionOptions) -> Result<Self, TransportError> {
        let dial = TcpStream::connect((options.host.as_str(), options.port));
        let stream = match timeout(options.connect_timeout, dial).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(TransportError::Connect(err)),
            Err(_) => return Err(TransportError::Timeout(options.connect_timeout)),
        };
        debug!(host = %options.host, port = options.port, "TCP connection established");
        Ok(Self {
            stream: Stream::Plain(stream),
        })
    }

    /// Upgrade the connection with TLS when the options ask for it.
    ///
    /// Without TLS options this is a no-op and the plain stream is kept.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Tls` if the handshake is rejected and
    /// `TransportError::Timeout` if it outlasts the configured limit.
    pub(crate) async fn handshake(self, options: &ConnectionOptions) -> Result<Self, TransportError> {
        let Some(tls) = &options.tls else {
            return Ok(self);
        };
        let tcp = match self.stream {
            Stream::Plain(tcp) => tcp,
            stream => return Ok(Self { stream }),
        };

        let connector = tokio_native_tls::TlsConnector::from(build_tls_connector(tls)?);
        let domain = tls.domain.as_deref().unwrap_or(&options.host);
        let stream = match timeout(options.connect_timeout, connector.connect(domain, tcp)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(TransportError::Tls(err)),
            Err(_) => return Err(TransportError::Timeout(options.connect_timeout)),
        };
        debug!(domain, "TLS handshake completed");
        Ok(Self {
            stream: Stream::Tls(Box::new(stream)),
        })
    }

    /// Write a full frame and flush it out.
    pub(crate) async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        match &mut self.stream {
            Stream::Plain(stream) => {
                stream.write_all(bytes).await?;
                stream.flush().await?;
            }
            Stream::Tls(stream) => {
                stream.write_all(bytes).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    /// Read whatever bytes the collector has sent.
    ///
    /// Returns `Ok(0)` once the collector has closed its side.
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let read = match &mut self.stream {
            Stream::Plain(stream) => stream.read(buf).await?,
            Stream::Tls(stream) => stream.read(buf).await?,
        };
        Ok(read)
    }

    /// Close the connection, flushing a TLS close-notify where applicable.
    /// Failures are logged and swallowed; the socket is released either way.
    pub(crate) async fn shutdown(&mut self) {
        let result = match &mut self.stream {
            Stream::Plain(stream) => stream.shutdown().await,
            Stream::Tls(stream) => stream.shutdown().await,
        };
        if let Err(err) = result {
            debug!(error = %err, "Error while closing connection");
        }
    }
}

/// Build a TLS connector from the configured trust material.
///
/// Also used at client construction to surface bad PEM data as a
/// configuration error instead of a retry loop that can never succeed.
pub(crate) fn build_tls_connector(
    options: &TlsOptions,
) -> Result<native_tls::TlsConnector, TransportError> {
    let mut builder = native_tls::TlsConnector::builder();
    for pem in &options.ca_certificates {
        let certificate = Certificate::from_pem(pem).map_err(TransportError::Tls)?;
        builder.add_root_certificate(certificate);
    }
    if options.accept_invalid_certs {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    builder.build().map_err(TransportError::Tls)
}
