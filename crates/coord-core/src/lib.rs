//! Shared types for a cluster-membership and partition-assignment
//! coordinator built on a hierarchical coordination service (ZooKeeper-like).
//!
//! - **Client seam** ([`client`]): `CoordinationClient`/`LeaderLatch` traits
//! - **Hash** ([`hash`]): FNV-1a hash for partition-key-to-segment routing
//! - **Address** ([`address`]): cluster member identity and path escaping
//! - **Key** ([`key`]): opaque partition keys and segment routing
//! - **Types** ([`types`]): `PartitionMeta`
//! - **Paths** ([`paths`]): the persisted znode layout
//! - **Config** ([`config`]): `CoordinatorConfig`
//! - **Error** ([`error`]): `CoordError`

pub mod address;
pub mod client;
pub mod config;
pub mod error;
pub mod hash;
pub mod key;
pub mod paths;
pub mod types;

pub use address::{address_to_path, key_to_path, path_to_address, path_to_key, Address, DataCenterResolver, HostPrefixResolver, PathEscapeError};
pub use client::{ClientState, CoordinationClient, CreateMode, LeaderLatch, WatchEvent, WatchEventKind};
pub use config::CoordinatorConfig;
pub use error::CoordError;
pub use hash::fnv1a_hash;
pub use key::{segment_of, PartitionKey, SegmentId};
pub use paths::{
    member_path, partition_member_path, partition_zk_path, segment_path, size_of_par_zk_path,
    LEADER_PATH, LEADERSHIP_LATCH_PATH, MEMBERS_PATH, SEGMENTS_PATH, SIZE_NODE_NAME,
};
pub use types::PartitionMeta;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {}

    #[test]
    fn reexports_accessible() {
        let addr = Address::new("127.0.0.1", 9090);
        let key = PartitionKey::from("k");
        let seg = segment_of(&key, 128);
        let _ = member_path(&addr);
        let _ = partition_zk_path(&key, 128);
        let _ = segment_path(seg);
        let _ = CoordinatorConfig::default();
        let _ = PartitionMeta::new(3);
        let _ = fnv1a_hash(b"x");
        let _ = CoordError::ConnectionLoss;
    }
}
