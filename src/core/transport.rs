//! Pluggable byte-stream transports.
//!
//! A [`Connect`] implementation produces a fresh [`Transport`] every time the
//! link (re)connects. TCP and Unix sockets are built in; TLS is available
//! with the `tls` feature, and any closure returning a future of
//! `io::Result<Transport>` works as a custom connector.

use std::fmt;
use std::future::Future;
use std::io;
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::core::config::{Address, LinkConfig};
use crate::core::{Error, Result};

/// A bidirectional byte stream usable as a transport.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A boxed transport stream.
pub type Transport = Box<dyn AsyncStream>;

/// Opens new transports.
pub trait Connect: Send + Sync {
    /// Opens a fresh byte stream to the server.
    fn connect(&self) -> BoxFuture<'static, io::Result<Transport>>;
}

impl<F, Fut> Connect for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = io::Result<Transport>> + Send + 'static,
{
    fn connect(&self) -> BoxFuture<'static, io::Result<Transport>> {
        Box::pin(self())
    }
}

/// Plain TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    /// Creates a connector for `host:port`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Connect for TcpConnector {
    fn connect(&self) -> BoxFuture<'static, io::Result<Transport>> {
        let address = self.address.clone();
        Box::pin(async move {
            debug!(%address, "opening tcp transport");
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as Transport)
        })
    }
}

/// Unix domain socket connector.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

#[cfg(unix)]
impl UnixConnector {
    /// Creates a connector for the socket at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
impl Connect for UnixConnector {
    fn connect(&self) -> BoxFuture<'static, io::Result<Transport>> {
        let path = self.path.clone();
        Box::pin(async move {
            debug!(path = %path.display(), "opening unix transport");
            let stream = tokio::net::UnixStream::connect(&path).await?;
            Ok(Box::new(stream) as Transport)
        })
    }
}

/// A shared connector handle.
#[derive(Clone)]
pub struct Connector(pub(crate) Arc<dyn Connect>);

impl Connector {
    /// Wraps a custom connector.
    pub fn new(connect: impl Connect + 'static) -> Self {
        Self(Arc::new(connect))
    }

    pub(crate) fn connect(&self) -> BoxFuture<'static, io::Result<Transport>> {
        self.0.connect()
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Connector(..)")
    }
}

/// Picks the connector described by `config`.
pub(crate) fn connector_for(config: &LinkConfig) -> Result<Connector> {
    if let Some(connector) = &config.connector {
        return Ok(connector.clone());
    }

    match &config.address {
        Address::Tcp { host, port } if config.tls => tls_connector(host, *port),
        Address::Tcp { host, port } => Ok(Connector::new(TcpConnector::new(format!(
            "{host}:{port}"
        )))),
        #[cfg(unix)]
        Address::Unix(path) => Ok(Connector::new(UnixConnector::new(path.clone()))),
        #[cfg(not(unix))]
        Address::Unix(_) => Err(Error::Config {
            message: "unix sockets are not supported on this platform".to_string(),
        }),
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "tls")] {
        fn tls_connector(host: &str, port: u16) -> Result<Connector> {
            let tls = crate::core::tls::TlsConnector::new(host, port)?;
            Ok(Connector::new(tls))
        }
    } else {
        fn tls_connector(_host: &str, _port: u16) -> Result<Connector> {
            Err(Error::Config {
                message: "rediss:// requires the `tls` feature".to_string(),
            })
        }
    }
}
