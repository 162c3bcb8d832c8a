use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use crate::core::transport::{Connect, Transport};
use crate::core::{Error, Result};

/// TLS connector using rustls.
#[derive(Clone)]
pub struct TlsConnector {
    connector: tokio_rustls::TlsConnector,
    server_name: ServerName<'static>,
    address: String,
}

impl TlsConnector {
    /// Creates a TLS connector with default secure configuration.
    ///
    /// Uses `webpki-roots` for Mozilla's root certificates and `ring` as the crypto provider.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let server_name = ServerName::try_from(host.to_string()).map_err(|e| Error::Config {
            message: format!("invalid TLS server name {host:?}: {e}"),
        })?;

        Ok(Self {
            connector: tokio_rustls::TlsConnector::from(Arc::new(config)),
            server_name,
            address: format!("{host}:{port}"),
        })
    }
}

impl Connect for TlsConnector {
    fn connect(&self) -> BoxFuture<'static, io::Result<Transport>> {
        let connector = self.connector.clone();
        let server_name = self.server_name.clone();
        let address = self.address.clone();
        Box::pin(async move {
            debug!(%address, "opening tls transport");
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            let stream = connector.connect(server_name, stream).await?;
            Ok(Box::new(stream) as Transport)
        })
    }
}
