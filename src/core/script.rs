use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::core::command;
use crate::core::{Executor, Result};
use crate::proto::frame::Frame;

/// A Lua script invoked by its SHA1 digest.
///
/// The digest is computed locally. Invocation tries `EVALSHA` first and
/// falls back to `EVAL` when the server answers `NOSCRIPT`, which also
/// loads the script into the server's cache.
#[derive(Debug, Clone)]
pub struct Script {
    source: Bytes,
    sha: String,
}

impl Script {
    /// Creates a script from its Lua source.
    pub fn new(source: impl Into<Bytes>) -> Self {
        let source = source.into();
        let sha = format!("{:x}", Sha1::digest(&source));
        Self { source, sha }
    }

    /// The lowercase hex SHA1 of the source.
    pub fn sha(&self) -> &str {
        &self.sha
    }

    /// The Lua source.
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Runs the script with the given keys and arguments.
    ///
    /// Error replies other than `NOSCRIPT` are returned as data.
    pub async fn invoke<E>(&self, executor: &E, keys: &[Bytes], args: &[Bytes]) -> Result<Frame>
    where
        E: Executor + ?Sized,
    {
        let reply = executor
            .execute(command::evalsha(self.sha.clone(), keys, args))
            .await?;

        match reply.as_error() {
            Some(e) if e.is_kind("NOSCRIPT") => {
                debug!(sha = %self.sha, "script not cached, falling back to EVAL");
                executor
                    .execute(command::eval(self.source.clone(), keys, args))
                    .await
            }
            _ => Ok(reply),
        }
    }
}
