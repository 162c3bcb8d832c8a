//! Parsing utilities for Redis Cluster error responses.
//!
//! Redis Cluster uses special error responses for redirects:
//! - `MOVED <slot> <host>:<port>` - Permanent redirect
//! - `ASK <slot> <host>:<port>` - Temporary redirect during migration
//! - `CLUSTERDOWN` - Cluster is unavailable

use crate::proto::frame::ErrorReply;
use crate::Error;

/// A redirect carried by an error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Redirect {
    Moved { slot: u16, address: String },
    Ask { slot: u16, address: String },
}

impl Redirect {
    /// Reads a `MOVED` or `ASK` reply. Other replies yield `None`.
    pub(crate) fn parse(reply: &ErrorReply) -> Option<Self> {
        let redirect = match reply.kind() {
            "MOVED" => {
                let (slot, address) = parse_redirect(reply.detail())?;
                Redirect::Moved { slot, address }
            }
            "ASK" => {
                let (slot, address) = parse_redirect(reply.detail())?;
                Redirect::Ask { slot, address }
            }
            _ => return None,
        };
        Some(redirect)
    }
}

/// Parses a Redis error message and converts cluster redirects to typed errors.
///
/// # Arguments
///
/// * `error_msg` - The error message from Redis (e.g., "MOVED 3999 127.0.0.1:7000")
///
/// # Returns
///
/// - `Error::Moved` for MOVED redirects
/// - `Error::Ask` for ASK redirects
/// - `Error::ClusterDown` for CLUSTERDOWN errors
/// - `Error::CrossSlot` for CROSSSLOT errors
/// - `Error::Server` for other errors
pub fn parse_redis_error(error_msg: &str) -> Error {
    let msg = error_msg.trim();

    if let Some(stripped) = msg.strip_prefix("MOVED ") {
        if let Some((slot, address)) = parse_redirect(stripped) {
            return Error::Moved { slot, address };
        }
    }

    if let Some(stripped) = msg.strip_prefix("ASK ") {
        if let Some((slot, address)) = parse_redirect(stripped) {
            return Error::Ask { slot, address };
        }
    }

    if msg.starts_with("CLUSTERDOWN") {
        return Error::ClusterDown;
    }

    if msg.starts_with("CROSSSLOT") {
        return Error::CrossSlot;
    }

    Error::Server {
        message: msg.to_string(),
    }
}

/// Parses redirect arguments: "<slot> <host>:<port>"
fn parse_redirect(args: &str) -> Option<(u16, String)> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() != 2 {
        return None;
    }

    let slot: u16 = parts[0].parse().ok()?;
    if slot >= super::slot::SLOT_COUNT {
        return None;
    }
    let address = parts[1].to_string();

    Some((slot, address))
}
