//! # Redlink Core
//!
//! Connection handling for the redlink Redis client: transports, the
//! handshake, the resilient command [`Link`](link::Link), pub/sub and Lua
//! script invocation.
//!
//! ## Modules
//!
//! - [`connection`] - Single connection management and handshake
//! - [`link`] - Reconnecting, replaying command pipeline
//! - [`pubsub`] - Shared subscription connection
//! - [`command`] - Command builders
//! - [`builder`] - Client builder
//!

#![warn(missing_docs)]

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::instrument;

pub use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

/// Client builder configuration.
pub mod builder;
/// Command construction helpers.
pub mod command;
/// Link configuration.
pub mod config;
/// Low-level connection management.
pub mod connection;
/// Reconnecting command pipeline.
pub mod link;
/// Publish/subscribe.
pub mod pubsub;
/// Lua scripts.
pub mod script;
/// Byte-stream transports.
pub mod transport;

cfg_if::cfg_if! {
    if #[cfg(feature = "tls")] {
        mod tls;
        pub use tls::TlsConnector;
    }
}

use command::Cmd;
use link::Link;

/// Something that can run a command and return the raw reply.
///
/// Implemented by [`Link`], [`Client`] and the cluster router, so the
/// distributed mutex and scripts run over any of them.
pub trait Executor: Send + Sync {
    /// Runs `cmd` and returns its reply. Error replies are data.
    fn execute(&self, cmd: Cmd) -> BoxFuture<'_, Result<Frame>>;

    /// Groups keys whose commands may be combined into one multi-key call.
    ///
    /// Standalone servers accept any combination; clusters group by slot.
    fn renewal_group(&self, _key: &[u8]) -> u16 {
        0
    }
}

impl<E: Executor + ?Sized> Executor for std::sync::Arc<E> {
    fn execute(&self, cmd: Cmd) -> BoxFuture<'_, Result<Frame>> {
        (**self).execute(cmd)
    }

    fn renewal_group(&self, key: &[u8]) -> u16 {
        (**self).renewal_group(key)
    }
}

/// High-level Redis client for standalone connections.
///
/// Provides a simple API for common Redis operations. Every method takes
/// `&self`, and clones share the same [`Link`].
///
/// # Example
///
/// ```no_run
/// use redlink::Client;
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::connect("redis://localhost:6379").await?;
///     client.set("key", Bytes::from("value")).await?;
///     let value: Bytes = client.get("key").await?.unwrap();
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    link: Link,
}

impl Client {
    /// Connects to a Redis server using the provided URI.
    ///
    /// See [`LinkConfig::from_uri`](config::LinkConfig::from_uri) for the
    /// accepted forms. The connection is verified with a PING.
    ///
    /// # Arguments
    ///
    /// * `uri` - The connection string (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Returns
    ///
    /// A `Result` containing the connected `Client` or an error.
    pub async fn connect<T: AsRef<str>>(uri: T) -> Result<Self> {
        let config = config::LinkConfig::from_uri(uri.as_ref())?;
        Self::with_config(config).await
    }

    /// Connects with an explicit configuration and verifies the connection.
    #[instrument(skip(config), fields(address = %config.address))]
    pub async fn with_config(config: config::LinkConfig) -> Result<Self> {
        let client = Self::from_link(Link::new(config)?);
        client.ping().await?;
        Ok(client)
    }

    /// Wraps an existing link.
    pub fn from_link(link: Link) -> Self {
        Self { link }
    }

    /// The underlying link.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Runs an arbitrary command and returns the raw reply.
    ///
    /// Error replies are returned as [`Frame::Error`].
    pub async fn execute(&self, cmd: Cmd) -> Result<Frame> {
        self.link.execute(cmd).await
    }

    async fn request(&self, cmd: Cmd) -> Result<Frame> {
        command::parse_frame_response(self.link.execute(cmd).await?)
    }

    /// Sends a PING command to the server.
    ///
    /// # Returns
    ///
    /// Returns `PONG` as bytes if successful.
    pub async fn ping(&self) -> Result<Bytes> {
        let frame = self.request(command::ping()).await?;
        Ok(command::frame_to_bytes(frame)?.unwrap_or_default())
    }

    /// Echoes the provided message back from the server.
    ///
    /// # Arguments
    ///
    /// * `msg` - The message to echo.
    pub async fn echo(&self, msg: &str) -> Result<Bytes> {
        let frame = self.request(command::echo(msg.to_string())).await?;
        Ok(command::frame_to_bytes(frame)?.unwrap_or_default())
    }

    /// Gets the value associated with the specified key.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to retrieve.
    ///
    /// # Returns
    ///
    /// Returns `Some(Bytes)` if the key exists, or `None` if it does not.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let frame = self.request(command::get(key.to_string())).await?;
        command::frame_to_bytes(frame)
    }

    /// Sets the string value of a key.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to set.
    /// * `value` - The value to set.
    pub async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.request(command::set(key.to_string(), value)).await?;
        Ok(())
    }

    /// Sets the value of a key with an expiration time.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to set.
    /// * `value` - The value to set.
    /// * `expiry` - The expiration duration, with millisecond precision.
    pub async fn set_with_expiry(&self, key: &str, value: Bytes, expiry: Duration) -> Result<()> {
        self.request(command::set_with_expiry(key.to_string(), value, expiry))
            .await?;
        Ok(())
    }

    /// Increments the number stored at key by one.
    ///
    /// # Returns
    ///
    /// The value of the key after the increment.
    pub async fn incr(&self, key: &str) -> Result<i64> {
        let frame = self.request(command::incr(key.to_string())).await?;
        command::frame_to_int(frame)
    }

    /// Removes the specified key.
    ///
    /// # Returns
    ///
    /// `true` if the key was removed, `false` if the key did not exist.
    pub async fn del(&self, key: &str) -> Result<bool> {
        let frame = self.request(command::del(key.to_string())).await?;
        Ok(command::frame_to_int(frame)? > 0)
    }

    /// Returns true if the key exists.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let frame = self.request(command::exists(key.to_string())).await?;
        command::frame_to_bool(frame)
    }

    /// Sets a timeout on a key.
    ///
    /// # Returns
    ///
    /// `true` if the timeout was set, `false` if the key does not exist.
    pub async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let frame = self.request(command::expire(key.to_string(), seconds)).await?;
        command::frame_to_bool(frame)
    }

    /// Selects the Redis logical database to use.
    ///
    /// The selection survives reconnects.
    ///
    /// # Arguments
    ///
    /// * `db` - The database index (e.g., 0).
    pub async fn select(&self, db: u32) -> Result<()> {
        self.request(command::select(db)).await?;
        Ok(())
    }

    /// Publishes a message and returns the number of receivers.
    pub async fn publish(&self, channel: &str, message: Bytes) -> Result<i64> {
        let frame = self.request(command::publish(channel.to_string(), message)).await?;
        command::frame_to_int(frame)
    }
}

impl Executor for Client {
    fn execute(&self, cmd: Cmd) -> BoxFuture<'_, Result<Frame>> {
        Box::pin(self.link.execute(cmd))
    }
}
