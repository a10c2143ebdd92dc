//! Partition metadata shared between the partition manager and the wire
//! messages that describe assignment state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Everything the coordinator tracks about one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMeta {
    /// Desired replica count, including the primary. Read from `$size`.
    pub required_size: u32,
    /// Opaque bytes a caller may have stashed at the partition's own znode.
    /// The coordinator never interprets them.
    pub properties: Vec<u8>,
    /// Current members hosting this partition, primary first.
    pub members: Vec<Address>,
}

impl PartitionMeta {
    #[must_use]
    pub fn new(required_size: u32) -> Self {
        Self {
            required_size,
            properties: Vec::new(),
            members: Vec::new(),
        }
    }

    #[must_use]
    pub fn primary(&self) -> Option<&Address> {
        self.members.first()
    }

    #[must_use]
    pub fn replicas(&self) -> &[Address] {
        self.members.get(1..).unwrap_or(&[])
    }

    #[must_use]
    pub fn is_under_replicated(&self) -> bool {
        (self.members.len() as u32) < self.required_size
    }

    #[must_use]
    pub fn is_over_replicated(&self) -> bool {
        (self.members.len() as u32) > self.required_size
    }

    #[must_use]
    pub fn member_set(&self) -> BTreeSet<Address> {
        self.members.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_partition_has_no_primary() {
        let meta = PartitionMeta::new(3);
        assert_eq!(meta.primary(), None);
        assert!(meta.is_under_replicated());
    }

    #[test]
    fn primary_is_first_member() {
        let mut meta = PartitionMeta::new(2);
        meta.members.push(Address::new("a", 1));
        meta.members.push(Address::new("b", 1));
        assert_eq!(meta.primary(), Some(&Address::new("a", 1)));
        assert_eq!(meta.replicas(), &[Address::new("b", 1)]);
        assert!(!meta.is_under_replicated());
        assert!(!meta.is_over_replicated());
    }

    #[test]
    fn over_replicated_when_more_members_than_required() {
        let mut meta = PartitionMeta::new(1);
        meta.members.push(Address::new("a", 1));
        meta.members.push(Address::new("b", 1));
        assert!(meta.is_over_replicated());
    }
}
