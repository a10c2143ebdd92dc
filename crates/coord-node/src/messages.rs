//! Inter-component message types.
//!
//! Each component owns a single `mpsc::Receiver` mailbox; these are the
//! payloads sent into it. Replies ride a `oneshot` (one answer) or an
//! `mpsc::Sender` (fire-and-forget, possibly delivered more than once, e.g.
//! partition diffs to a long-lived subscriber).

use std::collections::BTreeMap;
use std::sync::Arc;

use coord_core::{Address, CoordinationClient, PartitionKey};
use tokio::sync::{mpsc, oneshot};

/// Opaque correlation value, echoed unmodified in replies.
pub type Tag = u64;

/// A resolved partition: key, ordered members (index 0 is primary), the
/// znode path it lives at, and the caller's tag.
#[derive(Debug, Clone)]
pub struct Partition {
    pub key: PartitionKey,
    pub members: Vec<Address>,
    pub zk_path: String,
    pub tag: Tag,
}

/// Per-partition diff: onboarded keys map to their new ordered membership,
/// dropped keys map to an empty sequence.
pub type PartitionDiff = BTreeMap<PartitionKey, Vec<Address>>;

/// What a subscriber to partition changes receives.
#[derive(Debug, Clone)]
pub enum PartitionEvent {
    Diff {
        diff: PartitionDiff,
        zk_paths: BTreeMap<PartitionKey, String>,
    },
    Removal(PartitionKey),
}

/// Messages the Cluster FSM's mailbox accepts.
pub enum ClusterMessage {
    // -- from the Membership Monitor --
    LeaderElected(Option<Address>),
    MembersChanged(Vec<Address>),

    // -- from the Partition Manager --
    PartitionDiff {
        diff: PartitionDiff,
        zk_paths: BTreeMap<PartitionKey, String>,
    },
    PartitionRemoval(PartitionKey),

    // -- reconnect plumbing --
    ClientUpdated(Arc<dyn CoordinationClient>),
    MonitorClient {
        subscriber: mpsc::Sender<Arc<dyn CoordinationClient>>,
    },

    // -- external queries (the public surface, §6) --
    QueryMembership {
        reply_to: oneshot::Sender<Vec<Address>>,
    },
    QueryLeadership {
        reply_to: oneshot::Sender<Option<Address>>,
    },
    QueryPartition {
        key: PartitionKey,
        tag: Tag,
        size: Option<u32>,
        properties: Vec<u8>,
        reply_to: oneshot::Sender<Partition>,
    },
    ListPartitions {
        member: Address,
        reply_to: oneshot::Sender<Vec<PartitionKey>>,
    },
    ResizePartition {
        key: PartitionKey,
        new_size: u32,
    },
    RemovePartition {
        key: PartitionKey,
    },
    MonitorPartition {
        subscriber: Address,
        sender: mpsc::Sender<PartitionEvent>,
    },
    StopMonitorPartition {
        subscriber: Address,
    },
}

/// Messages the Partition Manager's mailbox accepts.
pub enum PartitionMessage {
    /// A segment or partition watch fired; `change` is the freshly read
    /// member map for every partition in `segment`.
    PartitionsChanged {
        segment: u32,
        change: BTreeMap<PartitionKey, Vec<Address>>,
    },
    /// The leader's computed target assignment for some subset of keys.
    Rebalance(BTreeMap<PartitionKey, Vec<Address>>),
    /// A peer (or self) has been asked to host `key`.
    PartitionOnboard { key: PartitionKey, zk_path: String },
    /// A peer (or self) has been asked to drop `key`.
    PartitionDropoff { key: PartitionKey, zk_path: String },
    RemovePartition {
        key: PartitionKey,
    },
    QueryPartition {
        key: PartitionKey,
        tag: Tag,
        reply_to: oneshot::Sender<Partition>,
    },
    MonitorPartition {
        subscriber: Address,
        sender: mpsc::Sender<PartitionEvent>,
    },
    StopMonitorPartition {
        subscriber: Address,
    },
    ClientUpdated(Arc<dyn CoordinationClient>),
}

/// Messages the Membership Monitor's mailbox accepts.
pub enum MembershipMessage {
    /// Internal retry/poll tick for `AcquireLeadership`.
    AcquireLeadership,
    ClientUpdated(Arc<dyn CoordinationClient>),
}
