//! Runtime for a cluster-membership and partition-assignment coordinator:
//! three mailbox-driven components sharing a coordination-service client.
//!
//! - **Membership Monitor** ([`membership`]): leader latch, `/leader` and
//!   `/members` watches, ephemeral self-registration.
//! - **Partition Manager** ([`partition_manager`]): segment watches, the
//!   local partition snapshot, onboard/dropoff execution.
//! - **Cluster FSM** ([`fsm`]): `{Uninitialized, Follower, Leader}`, query
//!   routing, rebalance orchestration.
//! - **Reconnect plumbing** ([`reconnect`]): rebuilds the client and
//!   re-seeds all three components on session loss.
//! - **Rebalance** ([`rebalance`]): the data-center-aware assignment
//!   algorithm the leader's Cluster FSM calls into.
//! - **Lifecycle** ([`registry`]): `ManagedService`/`ServiceRegistry`.

pub mod fsm;
pub mod membership;
pub mod messages;
pub mod partition_manager;
pub mod rebalance;
pub mod reconnect;
pub mod registry;

#[cfg(test)]
mod testkit;

pub use fsm::{ClusterFsm, FsmState};
pub use membership::{LatchFactory, MembershipMonitor};
pub use messages::{
    ClusterMessage, MembershipMessage, Partition, PartitionDiff, PartitionEvent, PartitionMessage, Tag,
};
pub use partition_manager::PartitionManager;
pub use reconnect::{ClientBuilder, ReconnectListener};
pub use registry::{ManagedService, ServiceContext, ServiceRegistry};
