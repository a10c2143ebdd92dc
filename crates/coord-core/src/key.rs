//! Partition keys and segment routing.

use serde::{Deserialize, Serialize};

use crate::hash::fnv1a_hash;

/// An opaque, immutable partition identity.
///
/// Wraps arbitrary bytes via `serde_bytes` so MessagePack encodes it compactly
/// instead of as a sequence of per-byte integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl PartitionKey {
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for PartitionKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for PartitionKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Identifies a fixed key-space segment, `segment-N`.
///
/// Segments exist only to bound watch fan-out: the coordinator installs one
/// watch per segment rather than one per partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub u32);

impl SegmentId {
    #[must_use]
    pub fn node_name(self) -> String {
        format!("segment-{}", self.0)
    }
}

/// Maps a partition key to its owning segment: `hash(key) mod segments_size`.
#[must_use]
pub fn segment_of(key: &PartitionKey, segments_size: u32) -> SegmentId {
    assert!(segments_size > 0, "segments_size must be positive");
    SegmentId(fnv1a_hash(key.as_bytes()) % segments_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_of_is_deterministic_and_bounded() {
        let key = PartitionKey::from("a");
        let seg = segment_of(&key, 128);
        assert_eq!(seg, segment_of(&key, 128));
        assert!(seg.0 < 128);
    }

    #[test]
    fn segment_node_name_format() {
        assert_eq!(SegmentId(7).node_name(), "segment-7");
    }

    #[test]
    fn different_keys_can_land_in_different_segments() {
        let a = segment_of(&PartitionKey::from("alpha"), 128);
        let b = segment_of(&PartitionKey::from("beta"), 128);
        // Not a strict guarantee for all pairs, but true for this pair --
        // pins the hash function's behavior against silent changes.
        assert_ne!(a, b);
    }
}
