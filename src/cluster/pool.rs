//! Links to Redis Cluster nodes.
//!
//! One [`Link`] per node address, created on first use from a template
//! configuration and shared by every request routed to that node.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::core::config::{Address, LinkConfig};
use crate::core::link::Link;
use crate::Result;

/// Lazily created links to cluster nodes, keyed by canonical `host:port`.
///
/// Spellings of one address share a link (`[::1]:7000` and the bare
/// `::1:7000` a server reports, or host names differing in case). Host
/// names are not resolved: a seed given as `localhost:7000` and a redirect
/// to `127.0.0.1:7000` get separate links to the same node.
#[derive(Debug)]
pub(crate) struct NodePool {
    template: LinkConfig,
    links: RwLock<HashMap<String, Link>>,
}

impl NodePool {
    /// Creates an empty pool. Node links copy every setting of `template`
    /// except the address.
    pub(crate) fn new(template: LinkConfig) -> Self {
        Self {
            template,
            links: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the link for `address`, creating it if needed.
    pub(crate) async fn link(&self, address: &str) -> Result<Link> {
        let address = canonical(address)?;
        if let Some(link) = self.links.read().await.get(&address.to_string()) {
            return Ok(link.clone());
        }

        let key = address.to_string();
        let mut links = self.links.write().await;
        if let Some(link) = links.get(&key) {
            return Ok(link.clone());
        }

        let mut config = self.template.clone();
        config.address = address;
        config.connector = None;
        debug!(address = %key, "creating node link");
        let link = Link::new(config)?;
        links.insert(key, link.clone());
        Ok(link)
    }

    /// Number of nodes with a link.
    pub(crate) async fn len(&self) -> usize {
        self.links.read().await.len()
    }
}

fn canonical(address: &str) -> Result<Address> {
    match Address::parse_host_port(address)? {
        Address::Tcp { host, port } => Ok(Address::Tcp {
            host: host.to_ascii_lowercase(),
            port,
        }),
        other => Ok(other),
    }
}
