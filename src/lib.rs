//! # Redlink
//!
//! Resilient Redis client for Rust built on a RESP codec.
//!
//! - [`Link`]: one durable connection shared by many tasks. Requests are
//!   pipelined in FIFO order, and unanswered requests are replayed after
//!   the connection is re-established.
//! - [`Subscriber`]: one subscriber connection fanned out to many
//!   [`Subscription`] streams, resubscribed after reconnects.
//! - [`ClusterClient`]: slot routing that follows `MOVED` and `ASK`.
//! - [`Mutex`]: a fair distributed lock with lease renewal.
//!
//! ## Features
//!
//! - `cluster` (default) - Redis Cluster routing
//! - `tls` - TLS transport via rustls
//!
//! ## Example
//!
//! ```no_run
//! use redlink::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect("redis://localhost:6379").await?;
//!     let _ = client.ping().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub(crate) mod core;
pub mod proto;

#[cfg(feature = "cluster")]
pub(crate) mod cluster;

pub mod mutex;

#[cfg(test)]
mod stress;

#[cfg(test)]
mod testing;

pub use crate::core::builder::ClientBuilder;
pub use crate::core::command::{self, Cmd};
pub use crate::core::config::{Address, LinkConfig, ReconnectPolicy};
pub use crate::core::connection::Connection;
pub use crate::core::link::{Link, LinkState};
pub use crate::core::pubsub::{Message, Subscriber, Subscription};
pub use crate::core::script::Script;
pub use crate::core::transport::{Connect, Connector, Transport};
pub use crate::core::{Client, Error, Executor, Result};
pub use crate::mutex::{Lock, Mutex, MutexOptions, RenewalFailure};
pub use crate::proto::frame::{ErrorReply, Frame};

#[cfg(feature = "tls")]
pub use crate::core::TlsConnector;

#[cfg(feature = "cluster")]
pub use crate::cluster::{key_slot, ClusterClient, SLOT_COUNT};
