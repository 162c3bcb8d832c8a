//! Redis Cluster slot calculation.
//!
//! Redis Cluster uses CRC16 to map keys to slots (0-16383).
//! This module provides utilities for calculating slot numbers from keys,
//! and the table recording which node serves each slot.

use std::sync::Arc;

use crc::{Crc, CRC_16_XMODEM};

/// Number of hash slots in Redis Cluster.
pub const SLOT_COUNT: u16 = 16384;

/// CRC-16/XMODEM algorithm used by Redis.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the Redis Cluster slot for a given key.
///
/// Redis uses CRC16 modulo 16384 for slot calculation.
/// If the key contains `{...}`, only the content inside the braces
/// is used for hashing (hash tags).
///
/// # Arguments
///
/// * `key` - The Redis key to calculate the slot for
///
/// # Returns
///
/// The slot number (0-16383)
///
/// # Examples
///
/// ```
/// use redlink::key_slot;
///
/// assert_eq!(key_slot("foo"), 12182);
/// assert_eq!(key_slot("{user1000}.following"), key_slot("{user1000}.followers"));
/// assert_ne!(key_slot("user1000"), key_slot("user2000"));
/// ```
pub fn key_slot(key: impl AsRef<[u8]>) -> u16 {
    let hash_key = extract_hash_tag(key.as_ref());
    CRC16.checksum(hash_key) % SLOT_COUNT
}

/// Extracts the hash tag from a key.
///
/// Redis hash tags are defined by `{...}`:
/// - `{user1000}.following` → hash tag is `user1000`
/// - `foo{bar}baz` → hash tag is `bar`
/// - `foo{}{bar}` → empty first tag, use whole key
/// - `foo` → no hash tag, use whole key
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[start + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[start + 1..start + 1 + len];
            }
        }
    }
    key
}

/// Which node serves each slot, as learned from redirects.
///
/// An empty entry means the slot is routed to a default node.
#[derive(Debug)]
pub(crate) struct SlotTable {
    owners: Vec<Option<Arc<str>>>,
}

impl SlotTable {
    pub(crate) fn new() -> Self {
        Self {
            owners: vec![None; SLOT_COUNT as usize],
        }
    }

    pub(crate) fn get(&self, slot: u16) -> Option<Arc<str>> {
        self.owners.get(slot as usize).cloned().flatten()
    }

    pub(crate) fn assign(&mut self, slot: u16, address: &str) {
        if let Some(owner) = self.owners.get_mut(slot as usize) {
            *owner = Some(Arc::from(address));
        }
    }

    /// Clears `slot` if it still points at `address`.
    pub(crate) fn forget(&mut self, slot: u16, address: &str) {
        if let Some(owner) = self.owners.get_mut(slot as usize) {
            if owner.as_deref() == Some(address) {
                *owner = None;
            }
        }
    }
}
