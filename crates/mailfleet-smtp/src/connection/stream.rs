//! Low-level SMTP stream handling.

use super::socks::{self, ProxyUrl};
use crate::error::{Error, Result};
use rustls::pki_types::ServerName;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};
use tracing::debug;

/// Deadline applied to connect, each read and each write by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How the TCP leg of a connection is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Transport {
    /// Let the OS pick the source address.
    #[default]
    Direct,
    /// Bind to a local address before connecting.
    Bind(IpAddr),
    /// Tunnel through a SOCKS5 proxy.
    Socks(ProxyUrl),
}

#[derive(Debug)]
enum Inner {
    Tcp(BufReader<TcpStream>),
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
}

/// SMTP stream (TCP or TLS) with per-operation deadlines.
#[derive(Debug)]
pub struct SmtpStream {
    inner: Inner,
    local_ip: IpAddr,
    peer: SocketAddr,
    proxy_ip: Option<IpAddr>,
    timeout: Duration,
}

impl SmtpStream {
    /// Wraps an established TCP connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket addresses cannot be read.
    pub fn from_tcp(stream: TcpStream, timeout: Duration) -> Result<Self> {
        let local_ip = stream.local_addr()?.ip();
        let peer = stream.peer_addr()?;
        Ok(Self {
            inner: Inner::Tcp(BufReader::new(stream)),
            local_ip,
            peer,
            proxy_ip: None,
            timeout,
        })
    }

    /// Source IP the peer sees, as far as this side can tell.
    ///
    /// For a SOCKS tunnel this is the proxy's bound address, or the proxy
    /// address itself when the proxy does not report one.
    #[must_use]
    pub const fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    /// Remote end of the TCP connection (the proxy, for SOCKS tunnels).
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Address of the SOCKS proxy this stream tunnels through, if any.
    #[must_use]
    pub const fn proxy_ip(&self) -> Option<IpAddr> {
        self.proxy_ip
    }

    /// Reads a line from the stream, without its line ending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] past the deadline and
    /// [`Error::ConnectionClosed`] at end of stream.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = match &mut self.inner {
            Inner::Tcp(reader) => deadline(self.timeout, "read", reader.read_line(&mut line)).await?,
            Inner::Tls(reader) => deadline(self.timeout, "read", reader.read_line(&mut line)).await?,
        };
        if read == 0 {
            return Err(Error::ConnectionClosed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Writes and flushes data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] past the deadline or the underlying I/O error.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.inner {
            Inner::Tcp(reader) => {
                let stream = reader.get_mut();
                deadline(self.timeout, "write", async {
                    stream.write_all(data).await?;
                    stream.flush().await
                })
                .await
            }
            Inner::Tls(reader) => {
                let stream = reader.get_mut();
                deadline(self.timeout, "write", async {
                    stream.write_all(data).await?;
                    stream.flush().await
                })
                .await
            }
        }
    }

    /// Upgrades a TCP stream to TLS, verifying the certificate for `server_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, the stream is already TLS or
    /// the handshake fails.
    pub async fn upgrade_to_tls(self, server_name: &str) -> Result<Self> {
        let tcp_stream = match self.inner {
            Inner::Tcp(reader) => reader.into_inner(),
            Inner::Tls(_) => return Err(Error::UnexpectedResponse("already using TLS".into())),
        };

        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| Error::InvalidDnsName(server_name.to_string()))?;
        let tls_stream =
            deadline(self.timeout, "TLS handshake", create_tls_connector().connect(name, tcp_stream))
                .await?;

        Ok(Self {
            inner: Inner::Tls(Box::new(BufReader::new(tls_stream))),
            ..self
        })
    }
}

/// Connects to `host:port` over the given transport.
///
/// The whole connect, including any SOCKS negotiation, runs under `timeout`,
/// which also becomes the stream's read/write deadline.
///
/// # Errors
///
/// Returns [`Error::Timeout`] past the deadline, or the connect/proxy error.
pub async fn connect(
    host: &str,
    port: u16,
    transport: &Transport,
    timeout: Duration,
) -> Result<SmtpStream> {
    debug!(host, port, ?transport, "connecting");
    match transport {
        Transport::Direct => {
            let stream = deadline(timeout, "connect", TcpStream::connect((host, port))).await?;
            SmtpStream::from_tcp(stream, timeout)
        }
        Transport::Bind(local) => {
            let stream = tokio::time::timeout(timeout, connect_bound(host, port, *local))
                .await
                .map_err(|_| Error::Timeout("connect"))??;
            SmtpStream::from_tcp(stream, timeout)
        }
        Transport::Socks(proxy) => {
            let (stream, bound) = tokio::time::timeout(timeout, socks::connect(proxy, host, port))
                .await
                .map_err(|_| Error::Timeout("connect"))??;
            let mut smtp = SmtpStream::from_tcp(stream, timeout)?;
            smtp.proxy_ip = Some(smtp.peer.ip());
            smtp.local_ip = bound.map_or_else(|| smtp.peer.ip(), |addr| addr.ip());
            Ok(smtp)
        }
    }
}

async fn connect_bound(host: &str, port: u16, local: IpAddr) -> Result<TcpStream> {
    let target = tokio::net::lookup_host((host, port))
        .await?
        .find(|addr| addr.is_ipv4() == local.is_ipv4())
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("{host} has no address in the family of {local}"),
            ))
        })?;

    let socket = if local.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.bind(SocketAddr::new(local, 0))?;
    Ok(socket.connect(target).await?)
}

async fn deadline<T, E>(
    timeout: Duration,
    what: &'static str,
    fut: impl Future<Output = std::result::Result<T, E>>,
) -> Result<T>
where
    Error: From<E>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout(what)),
    }
}

/// Creates a TLS connector trusting the webpki root set.
fn create_tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}
