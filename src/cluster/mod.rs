//! # Redlink Cluster
//!
//! Redis Cluster support with slot-based routing and redirect handling
//! (MOVED/ASK).
//!
//! ## Features
//!
//! - **Slot-based routing**: Routes commands to the node serving their key
//! - **Redirect handling**: Learns slot owners from MOVED, follows ASK once
//! - **Node links**: One reconnecting link per node, created on demand
//! - **Hash tags**: Supports Redis hash tags `{...}` for multi-key operations
//!
//! ## Example
//!
//! ```no_run
//! # async fn example() -> redlink::Result<()> {
//! use redlink::ClusterClient;
//! use bytes::Bytes;
//!
//! // Connect to Redis Cluster (comma-separated seed nodes)
//! let client = ClusterClient::connect("127.0.0.1:7000,127.0.0.1:7001")?;
//!
//! // Commands are routed to the correct node
//! client.set("key", Bytes::from("value")).await?;
//! let value = client.get("key").await?;
//! # Ok(())
//! # }
//! ```

pub mod commands;
mod errors;
mod pool;
mod router;
mod slot;

pub use errors::parse_redis_error;
pub use router::ClusterClient;
pub use slot::{key_slot, SLOT_COUNT};
