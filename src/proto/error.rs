use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for redlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when interacting with a Redis server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An IO error occurred on the transport.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// A protocol error occurred.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The server returned an error.
    #[error("server error: {message}")]
    Server {
        /// Error message from server.
        message: String,
    },

    /// Authentication failed.
    #[error("authentication failed: {message}")]
    Auth {
        /// Error message from server.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// The connection configuration is invalid.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// Decoding failed.
    #[error("decode error: {source}")]
    Decode {
        /// Underlying decode error.
        #[from]
        source: DecodeError,
    },

    /// The link gave up reconnecting; every request pending at that moment
    /// receives this error with the same underlying cause.
    #[error("link stopped: {source}")]
    Stopped {
        /// The failure that stopped the link.
        #[source]
        source: Arc<Error>,
    },

    /// A lock could not be acquired before the deadline.
    #[error("timed out after {timeout:?} acquiring lock {key}")]
    LockTimeout {
        /// The lock key.
        key: String,
        /// The configured acquisition timeout.
        timeout: Duration,
    },

    /// A held lock was found to be owned by someone else during renewal.
    #[error("lock {key} was lost")]
    LockLost {
        /// The lock key.
        key: String,
    },

    /// Redis Cluster: key moved to another node (permanent redirect).
    ///
    /// This error indicates that the slot for the requested key has been
    /// migrated to a different node. The client should update its slot map
    /// and retry the command on the new node.
    #[cfg(feature = "cluster")]
    #[error("MOVED to slot {slot} at {address}")]
    Moved {
        /// The slot number (0-16383).
        slot: u16,
        /// The address of the node owning this slot (e.g., "127.0.0.1:7001").
        address: String,
    },

    /// Redis Cluster: temporary redirect during migration (ASK redirect).
    ///
    /// This error occurs during slot migration. The client should send an
    /// ASKING command to the target node, then retry the command. The slot
    /// map should NOT be updated for ASK redirects.
    #[cfg(feature = "cluster")]
    #[error("ASK to slot {slot} at {address}")]
    Ask {
        /// The slot number (0-16383).
        slot: u16,
        /// The address of the node temporarily handling this slot.
        address: String,
    },

    /// Redis Cluster is down or unavailable.
    #[cfg(feature = "cluster")]
    #[error("CLUSTERDOWN cluster is down")]
    ClusterDown,

    /// Multi-key operation with keys in different slots (cluster mode).
    ///
    /// In Redis Cluster, multi-key commands (MGET, MSET, DEL, etc.) require
    /// all keys to map to the same slot. Use hash tags `{...}` to ensure
    /// keys are in the same slot.
    #[cfg(feature = "cluster")]
    #[error("CROSSSLOT keys in multi-key operation map to different slots")]
    CrossSlot,
}

impl Error {
    /// Returns true if the error came from the transport rather than from the
    /// server or the configuration.
    ///
    /// A stopped link counts as a transport failure when its cause does.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Io { .. } | Error::Protocol { .. } | Error::Decode { .. } => true,
            Error::Stopped { source } => source.is_transport(),
            _ => false,
        }
    }

    pub(crate) fn closed() -> Self {
        Error::Io {
            source: io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"),
        }
    }
}

/// Error returned when frame decoding fails.
///
/// Decode errors are fatal for the stream they occurred on.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Creates a new decode error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
