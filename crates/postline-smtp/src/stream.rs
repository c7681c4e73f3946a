//! Low-level socket handling (plain TCP or TLS).

use std::io;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::error::{Error, Result};

/// Longest reply line accepted from a server (RFC 5321 allows 512).
const MAX_LINE: u64 = 4096;

/// SMTP socket, plain or encrypted.
#[derive(Debug)]
pub enum SmtpStream {
    /// Plain TCP connection.
    Tcp(BufReader<TcpStream>),
    /// TLS-encrypted connection.
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
}

impl SmtpStream {
    /// Opens a plain TCP connection.
    pub async fn tcp(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Self::Tcp(BufReader::new(stream)))
    }

    /// Opens a TCP connection and immediately negotiates TLS.
    pub async fn tls(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let tls = handshake(host, stream).await?;
        Ok(Self::Tls(Box::new(BufReader::new(tls))))
    }

    /// Returns true once the stream is encrypted.
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Upgrades a plain stream after a successful STARTTLS.
    pub async fn upgrade(self, host: &str) -> Result<Self> {
        let tcp = match self {
            Self::Tcp(reader) => reader.into_inner(),
            Self::Tls(_) => return Err(Error::Protocol("already using TLS".into())),
        };
        let tls = handshake(host, tcp).await?;
        Ok(Self::Tls(Box::new(BufReader::new(tls))))
    }

    /// Reads one line and strips the trailing CRLF.
    ///
    /// End of stream is reported as `UnexpectedEof`.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = match self {
            Self::Tcp(reader) => (&mut *reader).take(MAX_LINE).read_line(&mut line).await?,
            Self::Tls(reader) => (&mut **reader).take(MAX_LINE).read_line(&mut line).await?,
        };
        if read == 0 {
            let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "server closed the connection");
            return Err(eof.into());
        }
        if !line.ends_with('\n') {
            return Err(Error::Protocol("reply line too long".into()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Writes and flushes `data`.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Tcp(reader) => {
                reader.get_mut().write_all(data).await?;
                reader.get_mut().flush().await?;
            }
            Self::Tls(reader) => {
                reader.get_mut().write_all(data).await?;
                reader.get_mut().flush().await?;
            }
        }
        Ok(())
    }

    /// Closes the write half, ignoring errors from an already dead peer.
    pub async fn shutdown(&mut self) {
        let _ = match self {
            Self::Tcp(reader) => reader.get_mut().shutdown().await,
            Self::Tls(reader) => reader.get_mut().shutdown().await,
        };
    }
}

async fn handshake(host: &str, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::Protocol(format!("invalid hostname: {host}")))?;
    Ok(connector().connect(server_name, stream).await?)
}

/// Creates a TLS connector with the bundled web PKI roots.
fn connector() -> TlsConnector {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}
