//! Transport layer for the outbound session.
//!
//! [`Transport`] abstracts a connected byte stream speaking the SMTP wire
//! protocol; [`Connector`] abstracts dialing one. [`TcpTransport`] is the
//! production implementation over tokio TCP with rustls, supporting both
//! implicit TLS and mid-session STARTTLS upgrade.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{DispatchConfig, TransportMode};
use crate::errors::{DispatchError, DispatchErrorKind, DispatchResult};
use crate::protocol::{codes, Command, Reply};

/// A connected transport speaking the SMTP wire protocol.
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    /// Sends a command and reads the reply.
    async fn send_command(&mut self, command: &Command) -> DispatchResult<Reply>;

    /// Sends raw bytes (the DATA payload) without reading a reply.
    async fn send_data(&mut self, data: &[u8]) -> DispatchResult<()>;

    /// Reads one reply from the server.
    async fn read_reply(&mut self) -> DispatchResult<Reply>;

    /// Upgrades the connection to TLS (after STARTTLS was accepted).
    async fn upgrade_tls(&mut self, host: &str) -> DispatchResult<()>;

    /// Returns true if the stream is TLS-protected.
    fn is_tls(&self) -> bool;

    /// Closes the underlying stream.
    async fn close(&mut self) -> DispatchResult<()>;
}

/// Dials transports for a session.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Opens a transport to the configured endpoint, leaving it positioned
    /// just after the server greeting (and after the TLS handshake when the
    /// transport mode is implicit TLS).
    async fn connect(&self, config: &DispatchConfig) -> DispatchResult<Box<dyn Transport>>;
}

/// Production connector dialing TCP with optional implicit TLS.
#[derive(Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, config: &DispatchConfig) -> DispatchResult<Box<dyn Transport>> {
        let transport = TcpTransport::connect(config).await?;
        Ok(Box::new(transport))
    }
}

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
    /// Placeholder while the stream is being swapped for a TLS upgrade.
    Detached,
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    stream: TransportStream,
    command_timeout: Duration,
    tls_enabled: bool,
    host: String,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("tls_enabled", &self.tls_enabled)
            .finish()
    }
}

impl TcpTransport {
    /// Dials the endpoint, performs the implicit TLS handshake when the
    /// mode requires it, and consumes the server greeting.
    pub async fn connect(config: &DispatchConfig) -> DispatchResult<Self> {
        let address = config.address();

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                DispatchError::new(DispatchErrorKind::ConnectTimeout, "Connect timed out")
            })?
            .map_err(|e| Self::map_dial_error(e, &address))?;

        stream.set_nodelay(true).ok();

        let mut transport = Self {
            stream: TransportStream::Plain(BufReader::new(stream)),
            command_timeout: config.command_timeout,
            tls_enabled: false,
            host: config.host.clone(),
        };

        // Implicit TLS handshakes before the server says anything.
        if config.transport_mode == TransportMode::ImplicitTls {
            transport.upgrade_tls(&config.host).await?;
        }

        let greeting = transport.read_reply().await?;
        if greeting.code != codes::SERVICE_READY {
            return Err(greeting.to_error());
        }

        Ok(transport)
    }

    fn map_dial_error(error: io::Error, address: &str) -> DispatchError {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => DispatchError::new(
                DispatchErrorKind::ConnectionRefused,
                format!("Connection refused to {}", address),
            )
            .with_cause(error),
            io::ErrorKind::TimedOut => {
                DispatchError::new(DispatchErrorKind::ConnectTimeout, "Connect timed out")
                    .with_cause(error)
            }
            _ => DispatchError::new(
                DispatchErrorKind::ConnectionRefused,
                format!("Cannot connect to {}: {}", address, error),
            ),
        }
    }

    /// IO failures mid-session mean the peer or network dropped us.
    fn map_stream_error(error: io::Error) -> DispatchError {
        DispatchError::new(
            DispatchErrorKind::ConnectionReset,
            format!("Stream error: {}", error),
        )
    }

    async fn read_reply_inner<R: AsyncBufReadExt + Unpin>(
        reader: &mut R,
        timeout_duration: Duration,
    ) -> DispatchResult<Reply> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();

            let read = timeout(timeout_duration, reader.read_line(&mut line))
                .await
                .map_err(|_| {
                    DispatchError::new(DispatchErrorKind::ReadTimeout, "Read timed out")
                })?
                .map_err(Self::map_stream_error)?;

            if read == 0 {
                return Err(DispatchError::new(
                    DispatchErrorKind::Disconnected,
                    "Server closed connection",
                ));
            }

            let line = line.trim_end().to_string();
            let is_continuation = line.len() >= 4 && line.as_bytes()[3] == b'-';
            lines.push(line);

            if !is_continuation {
                break;
            }
        }

        Reply::parse(&lines)
    }

    async fn write_all<W: AsyncWrite + Unpin>(
        writer: &mut W,
        data: &[u8],
        timeout_duration: Duration,
    ) -> DispatchResult<()> {
        timeout(timeout_duration, writer.write_all(data))
            .await
            .map_err(|_| DispatchError::new(DispatchErrorKind::WriteTimeout, "Write timed out"))?
            .map_err(Self::map_stream_error)?;

        timeout(timeout_duration, writer.flush())
            .await
            .map_err(|_| DispatchError::new(DispatchErrorKind::WriteTimeout, "Flush timed out"))?
            .map_err(Self::map_stream_error)?;

        Ok(())
    }

    async fn write_stream(&mut self, data: &[u8]) -> DispatchResult<()> {
        match &mut self.stream {
            TransportStream::Plain(stream) => {
                Self::write_all(stream.get_mut(), data, self.command_timeout).await
            }
            TransportStream::Tls(stream) => {
                Self::write_all(stream.get_mut(), data, self.command_timeout).await
            }
            TransportStream::Detached => Err(DispatchError::disconnected("Transport detached")),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send_command(&mut self, command: &Command) -> DispatchResult<Reply> {
        let wire = format!("{}\r\n", command.to_wire());
        tracing::trace!(command = %command, "sending command");

        self.write_stream(wire.as_bytes()).await?;
        self.read_reply().await
    }

    async fn send_data(&mut self, data: &[u8]) -> DispatchResult<()> {
        self.write_stream(data).await
    }

    async fn read_reply(&mut self) -> DispatchResult<Reply> {
        let reply = match &mut self.stream {
            TransportStream::Plain(stream) => {
                Self::read_reply_inner(stream, self.command_timeout).await?
            }
            TransportStream::Tls(stream) => {
                Self::read_reply_inner(stream.as_mut(), self.command_timeout).await?
            }
            TransportStream::Detached => {
                return Err(DispatchError::disconnected("Transport detached"))
            }
        };

        tracing::trace!(code = reply.code, message = %reply.first_line(), "received reply");
        Ok(reply)
    }

    async fn upgrade_tls(&mut self, host: &str) -> DispatchResult<()> {
        if self.tls_enabled {
            return Ok(());
        }

        use rustls::pki_types::ServerName;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| DispatchError::tls(format!("Invalid server name: {}", host)))?;

        let tcp_stream = match std::mem::replace(&mut self.stream, TransportStream::Detached) {
            TransportStream::Plain(reader) => reader.into_inner(),
            other => {
                self.stream = other;
                return Err(DispatchError::tls("Already using TLS"));
            }
        };

        let tls_stream = timeout(
            Duration::from_secs(30),
            connector.connect(server_name, tcp_stream),
        )
        .await
        .map_err(|_| DispatchError::new(DispatchErrorKind::TlsHandshake, "TLS handshake timed out"))?
        .map_err(|e| DispatchError::tls(format!("TLS handshake failed: {}", e)))?;

        self.stream = TransportStream::Tls(Box::new(BufReader::new(tls_stream)));
        self.tls_enabled = true;

        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    async fn close(&mut self) -> DispatchResult<()> {
        let result = match &mut self.stream {
            TransportStream::Plain(stream) => stream.get_mut().shutdown().await,
            TransportStream::Tls(stream) => stream.get_mut().shutdown().await,
            TransportStream::Detached => Ok(()),
        };
        self.stream = TransportStream::Detached;
        result.map_err(Self::map_stream_error)
    }
}
