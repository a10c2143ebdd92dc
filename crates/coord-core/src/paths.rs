//! Znode path builders for the persisted layout (§3).
//!
//! Every path is namespace-relative; callers that own a namespaced
//! coordination-service client pass these straight through.

use crate::address::{address_to_path, key_to_path, Address};
use crate::key::{segment_of, PartitionKey, SegmentId};

pub const LEADER_PATH: &str = "/leader";
pub const MEMBERS_PATH: &str = "/members";
pub const LEADERSHIP_LATCH_PATH: &str = "/leadership";
pub const SEGMENTS_PATH: &str = "/segments";
pub const SIZE_NODE_NAME: &str = "$size";

#[must_use]
pub fn member_path(address: &Address) -> String {
    format!("{MEMBERS_PATH}/{}", address_to_path(address))
}

#[must_use]
pub fn segment_path(segment: SegmentId) -> String {
    format!("{SEGMENTS_PATH}/{}", segment.node_name())
}

#[must_use]
pub fn partition_zk_path(key: &PartitionKey, segments_size: u32) -> String {
    let segment = segment_of(key, segments_size);
    format!("{}/{}", segment_path(segment), key_to_path(key.as_bytes()))
}

#[must_use]
pub fn size_of_par_zk_path(key: &PartitionKey, segments_size: u32) -> String {
    format!("{}/{SIZE_NODE_NAME}", partition_zk_path(key, segments_size))
}

#[must_use]
pub fn partition_member_path(key: &PartitionKey, segments_size: u32, address: &Address) -> String {
    format!(
        "{}/{}",
        partition_zk_path(key, segments_size),
        address_to_path(address)
    )
}
