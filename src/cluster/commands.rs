//! Redis Cluster command builders.

use crate::core::command::Cmd;

/// Creates an ASKING command.
///
/// Used before retrying a command that received an ASK redirect.
/// This tells the target node to accept the command even though the slot
/// is being migrated.
///
/// ASKING is a one-time flag - it only affects the immediately following command.
pub fn asking() -> Cmd {
    Cmd::new("ASKING")
}
