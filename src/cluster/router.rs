//! Redis Cluster client implementation.
//!
//! Commands are routed by the hash slot of their key. The slot table starts
//! empty and is filled from `MOVED` redirects; unmapped slots and keyless
//! commands go to the seed nodes in round-robin order.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::core::command::{self, Cmd};
use crate::core::config::LinkConfig;
use crate::core::{Error, Executor, Result};
use crate::proto::frame::Frame;

use super::commands::asking;
use super::errors::Redirect;
use super::pool::NodePool;
use super::slot::{key_slot, SlotTable};

/// Redis Cluster client.
///
/// Provides slot-based routing to cluster nodes and handles MOVED and ASK
/// redirects transparently. Clones share the slot table and node links.
#[derive(Clone)]
pub struct ClusterClient {
    inner: Arc<Inner>,
}

struct Inner {
    seeds: Vec<String>,
    next_seed: AtomicUsize,
    slots: RwLock<SlotTable>,
    pool: NodePool,
}

impl ClusterClient {
    /// Connects to a Redis Cluster using seed nodes.
    ///
    /// The address can be a single node or a comma-separated list of nodes,
    /// each either `host:port` or a `redis://` URI. Settings other than the
    /// address (password, timeouts...) are taken from the first seed.
    ///
    /// # Arguments
    ///
    /// * `addresses` - Seed node addresses (e.g., "redis://127.0.0.1:7000,127.0.0.1:7001")
    ///
    /// # Errors
    ///
    /// Returns an error if no valid address is given.
    pub fn connect(addresses: &str) -> Result<Self> {
        let mut template = None;
        let mut seeds = Vec::new();
        for addr in addresses.split(',') {
            let addr = addr.trim();
            if addr.is_empty() {
                continue;
            }
            let config = if addr.contains("://") {
                LinkConfig::from_uri(addr)?
            } else {
                LinkConfig::from_uri(&format!("redis://{addr}"))?
            };
            seeds.push(config.address.to_string());
            template.get_or_insert(config);
        }

        let template = template.ok_or_else(|| Error::InvalidArgument {
            message: "no valid addresses provided".to_string(),
        })?;
        Self::new(seeds, template)
    }

    /// Creates a router over `seeds` (`host:port`). Node links copy every
    /// setting of `template` except the address.
    ///
    /// Seeds are not resolved. Give them as the addresses the nodes announce
    /// in redirects, or a node may end up with a second link.
    pub fn new(seeds: Vec<String>, template: LinkConfig) -> Result<Self> {
        if seeds.is_empty() {
            return Err(Error::InvalidArgument {
                message: "no valid addresses provided".to_string(),
            });
        }
        Ok(Self {
            inner: Arc::new(Inner {
                seeds,
                next_seed: AtomicUsize::new(0),
                slots: RwLock::new(SlotTable::new()),
                pool: NodePool::new(template),
            }),
        })
    }

    /// Runs a command on the node serving its key.
    ///
    /// A `MOVED` reply updates the slot table and the command is retried
    /// once on the new owner. An `ASK` reply retries once on the target
    /// node, preceded by `ASKING`, without touching the table. Any other
    /// error reply, including a second redirect, is returned as data.
    ///
    /// # Errors
    ///
    /// Returns the last transport error if no node could be reached.
    #[instrument(level = "debug", skip(self, cmd), fields(command = %String::from_utf8_lossy(cmd.name())))]
    pub async fn execute(&self, cmd: Cmd) -> Result<Frame> {
        let slot = cmd.routing_key().map(key_slot);
        let reply = self.dispatch(slot, &cmd).await?;

        let redirect = match reply.as_error().and_then(Redirect::parse) {
            Some(redirect) => redirect,
            None => return Ok(reply),
        };

        match redirect {
            Redirect::Moved { slot, address } => {
                info!(slot, %address, "slot moved");
                self.inner.slots.write().await.assign(slot, &address);
                let link = self.inner.pool.link(&address).await?;
                link.execute(cmd).await
            }
            Redirect::Ask { slot, address } => {
                debug!(slot, %address, "asking redirect");
                let link = self.inner.pool.link(&address).await?;
                let mut replies = link.pipeline(vec![asking(), cmd]).await?;
                replies.pop().ok_or_else(|| Error::Protocol {
                    message: "missing reply to redirected command".to_string(),
                })
            }
        }
    }

    /// Sends to the slot owner if known, otherwise to a default node.
    async fn dispatch(&self, slot: Option<u16>, cmd: &Cmd) -> Result<Frame> {
        if let Some(slot) = slot {
            let owner = self.inner.slots.read().await.get(slot);
            if let Some(address) = owner {
                let link = self.inner.pool.link(&address).await?;
                match link.execute(cmd.clone()).await {
                    Err(e) if e.is_transport() => {
                        warn!(slot, %address, error = %e, "slot owner unreachable, forgetting mapping");
                        self.inner.slots.write().await.forget(slot, &address);
                    }
                    other => return other,
                }
            }
        }
        self.execute_on_default(cmd).await
    }

    /// Tries each seed node at most once, starting at the round-robin cursor.
    async fn execute_on_default(&self, cmd: &Cmd) -> Result<Frame> {
        let seeds = &self.inner.seeds;
        let mut last_error = None;
        for _ in 0..seeds.len() {
            let index = self.inner.next_seed.fetch_add(1, Ordering::Relaxed) % seeds.len();
            let address = &seeds[index];
            let link = self.inner.pool.link(address).await?;
            match link.execute(cmd.clone()).await {
                Err(e) if e.is_transport() => {
                    warn!(%address, error = %e, "default node unreachable, trying next");
                    last_error = Some(e);
                }
                other => return other,
            }
        }
        Err(last_error.unwrap_or_else(Error::closed))
    }

    /// The node currently mapped to `slot`, if any.
    pub async fn slot_owner(&self, slot: u16) -> Option<String> {
        self.inner.slots.read().await.get(slot).map(|a| a.to_string())
    }

    /// Gets the value of a key.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let frame = self.execute(command::get(key.to_string())).await?;
        command::frame_to_bytes(frame)
    }

    /// Sets the string value of a key.
    pub async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let frame = self.execute(command::set(key.to_string(), value)).await?;
        command::parse_frame_response(frame)?;
        Ok(())
    }

    /// Sets the value of a key with an expiration time.
    pub async fn set_with_expiry(&self, key: &str, value: Bytes, expiry: Duration) -> Result<()> {
        let frame = self
            .execute(command::set_with_expiry(key.to_string(), value, expiry))
            .await?;
        command::parse_frame_response(frame)?;
        Ok(())
    }

    /// Removes a key.
    pub async fn del(&self, key: &str) -> Result<bool> {
        let frame = self.execute(command::del(key.to_string())).await?;
        Ok(command::frame_to_int(frame)? > 0)
    }
}

impl fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClient")
            .field("seeds", &self.inner.seeds)
            .finish()
    }
}

impl Executor for ClusterClient {
    fn execute(&self, cmd: Cmd) -> BoxFuture<'_, Result<Frame>> {
        Box::pin(ClusterClient::execute(self, cmd))
    }

    fn renewal_group(&self, key: &[u8]) -> u16 {
        key_slot(key)
    }
}
