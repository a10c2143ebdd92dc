//! FNV-1a hash utilities for partition-key-to-segment routing.
//!
//! Provides a 32-bit FNV-1a hash over raw bytes. `PartitionKey` is an opaque
//! byte string (not necessarily valid UTF-8), so the hash operates directly
//! on bytes rather than on any particular text encoding.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Computes the 32-bit FNV-1a hash of `bytes`.
#[must_use]
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(fnv1a_hash(b"hello"), fnv1a_hash(b"hello"));
    }

    #[test]
    fn hash_differs_for_different_input() {
        assert_ne!(fnv1a_hash(b"hello"), fnv1a_hash(b"world"));
    }

    #[test]
    fn empty_input_is_offset_basis() {
        assert_eq!(fnv1a_hash(b""), FNV_OFFSET_BASIS);
    }
}
