//! Cluster FSM: `{Uninitialized, Follower, Leader}`, query routing, and
//! rebalance orchestration.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use coord_core::{
    size_of_par_zk_path, Address, CoordinationClient, CreateMode, DataCenterResolver, PartitionKey,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::messages::{ClusterMessage, Partition, PartitionDiff, PartitionMessage, Tag};
use crate::rebalance::{rebalance, RebalanceEntry};
use crate::registry::{ManagedService, ServiceContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Uninitialized,
    Follower,
    Leader,
}

struct ClusterState {
    state: FsmState,
    leader: Option<Address>,
    members: BTreeSet<Address>,
    partitions_to_members: BTreeMap<PartitionKey, Vec<Address>>,
}

pub struct ClusterFsm {
    self_address: Address,
    spare_leader: bool,
    segments_size: u32,
    client: ArcSwap<dyn CoordinationClient>,
    dc_resolver: Arc<dyn DataCenterResolver>,
    partition_tx: mpsc::Sender<PartitionMessage>,
    state: RwLock<ClusterState>,
    stash: Mutex<Vec<ClusterMessage>>,
    client_observers: Mutex<Vec<mpsc::Sender<Arc<dyn CoordinationClient>>>>,
    mailbox: Mutex<Option<mpsc::Receiver<ClusterMessage>>>,
    self_tx: mpsc::Sender<ClusterMessage>,
}

impl ClusterFsm {
    #[must_use]
    pub fn new(
        self_address: Address,
        spare_leader: bool,
        segments_size: u32,
        client: Arc<dyn CoordinationClient>,
        dc_resolver: Arc<dyn DataCenterResolver>,
        partition_tx: mpsc::Sender<PartitionMessage>,
    ) -> Arc<Self> {
        let (self_tx, mailbox) = mpsc::channel(256);
        Arc::new(Self {
            self_address,
            spare_leader,
            segments_size,
            client: ArcSwap::from(client),
            dc_resolver,
            partition_tx,
            state: RwLock::new(ClusterState {
                state: FsmState::Uninitialized,
                leader: None,
                members: BTreeSet::new(),
                partitions_to_members: BTreeMap::new(),
            }),
            stash: Mutex::new(Vec::new()),
            client_observers: Mutex::new(Vec::new()),
            mailbox: Mutex::new(Some(mailbox)),
            self_tx,
        })
    }

    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<ClusterMessage> {
        self.self_tx.clone()
    }

    #[must_use]
    pub fn current_state(&self) -> FsmState {
        self.state.read().state
    }

    pub async fn run(self: Arc<Self>) {
        let mut mailbox = self
            .mailbox
            .lock()
            .take()
            .expect("ClusterFsm::run called more than once");

        self.seed_from_segments().await;

        while let Some(msg) = mailbox.recv().await {
            self.handle(msg).await;
        }
    }

    /// Blocking read of the `/segments` tree at startup: every partition key
    /// is known with an empty assignee set until the Partition Manager fills
    /// it in via `PartitionDiff`.
    async fn seed_from_segments(&self) {
        let client = self.client.load_full();
        let Ok(segments) = client.get_children(coord_core::SEGMENTS_PATH).await else {
            return;
        };
        let mut seeded = BTreeMap::new();
        for segment_name in segments {
            let segment_path = format!("{}/{segment_name}", coord_core::SEGMENTS_PATH);
            let Ok(children) = client.get_children(&segment_path).await else {
                continue;
            };
            for key_segment in children {
                if let Ok(raw) = coord_core::path_to_key(&key_segment) {
                    seeded.insert(PartitionKey::from(raw), Vec::new());
                }
            }
        }
        self.state.write().partitions_to_members = seeded;
    }

    #[instrument(skip(self, msg))]
    async fn handle(self: &Arc<Self>, msg: ClusterMessage) {
        if is_universal(&msg) {
            self.dispatch_common(msg).await;
            return;
        }

        let current = self.state.read().state;
        if current == FsmState::Uninitialized
            && !matches!(msg, ClusterMessage::LeaderElected(_) | ClusterMessage::MembersChanged(_))
        {
            self.stash.lock().push(msg);
            return;
        }

        match current {
            FsmState::Uninitialized => self.handle_uninitialized(msg).await,
            FsmState::Follower => self.handle_follower(msg).await,
            FsmState::Leader => self.handle_leader(msg).await,
        }
    }

    async fn handle_uninitialized(self: &Arc<Self>, msg: ClusterMessage) {
        match msg {
            ClusterMessage::LeaderElected(Some(addr)) if addr == self.self_address => {
                self.become_leader().await;
            }
            ClusterMessage::LeaderElected(Some(addr)) => {
                self.state.write().leader = Some(addr);
                self.transition_to(FsmState::Follower).await;
            }
            ClusterMessage::LeaderElected(None) => {
                // No leader yet: stay uninitialized until one is elected.
            }
            ClusterMessage::MembersChanged(members) => {
                self.state.write().members = members.into_iter().collect();
            }
            other => self.dispatch_common(other).await,
        }
    }

    async fn handle_follower(self: &Arc<Self>, msg: ClusterMessage) {
        match msg {
            ClusterMessage::LeaderElected(Some(addr)) if addr == self.self_address => {
                self.become_leader().await;
            }
            ClusterMessage::LeaderElected(addr) => {
                self.state.write().leader = addr;
            }
            ClusterMessage::QueryLeadership { reply_to } => {
                let _ = reply_to.send(self.state.read().leader.clone());
            }
            ClusterMessage::MembersChanged(members) => {
                self.state.write().members = members.into_iter().collect();
            }
            ClusterMessage::PartitionDiff { diff, .. } => self.merge_diff(diff),
            ClusterMessage::QueryPartition { key, tag, size: Some(_), properties: _, reply_to } => {
                self.forward_query_to_leader(key, tag, reply_to);
            }
            ClusterMessage::QueryPartition { key, tag, size: None, reply_to, .. } => {
                let has_members = self
                    .state
                    .read()
                    .partitions_to_members
                    .get(&key)
                    .is_some_and(|m| !m.is_empty());
                if has_members {
                    self.reply_local_partition(key, tag, reply_to);
                } else {
                    self.forward_query_to_leader(key, tag, reply_to);
                }
            }
            ClusterMessage::ResizePartition { .. } | ClusterMessage::RemovePartition { .. } => {
                warn!("followers forward resize/remove to the leader; no remote transport configured, dropping");
            }
            other => self.dispatch_common(other).await,
        }
    }

    async fn handle_leader(self: &Arc<Self>, msg: ClusterMessage) {
        match msg {
            ClusterMessage::LeaderElected(Some(addr)) if addr == self.self_address => {}
            ClusterMessage::LeaderElected(_) => {
                self.transition_to(FsmState::Follower).await;
            }
            ClusterMessage::QueryLeadership { reply_to } => {
                let _ = reply_to.send(self.state.read().leader.clone());
            }
            ClusterMessage::MembersChanged(members) => {
                let new_members: BTreeSet<Address> = members.into_iter().collect();
                {
                    let mut state = self.state.write();
                    let dropped: BTreeSet<Address> =
                        state.members.difference(&new_members).cloned().collect();
                    for assignees in state.partitions_to_members.values_mut() {
                        assignees.retain(|a| !dropped.contains(a));
                    }
                    state.members = new_members;
                }
                self.run_rebalance().await;
            }
            ClusterMessage::QueryPartition { key, tag, size: Some(size), properties, reply_to } => {
                self.create_if_absent_and_reply(key, tag, size, properties, reply_to).await;
            }
            ClusterMessage::QueryPartition { key, tag, size: None, reply_to, .. } => {
                self.reply_local_partition(key, tag, reply_to);
            }
            ClusterMessage::ResizePartition { key, new_size } => {
                let client = self.client.load_full();
                let path = size_of_par_zk_path(&key, self.segments_size);
                client
                    .guarantee(&path, new_size.to_be_bytes().to_vec(), CreateMode::Persistent)
                    .await
                    .ok();
                self.run_rebalance().await;
            }
            ClusterMessage::RemovePartition { key } => {
                self.partition_tx.send(PartitionMessage::RemovePartition { key }).await.ok();
            }
            other => self.dispatch_common(other).await,
        }
    }

    /// Messages handled identically outside the strictly per-state match
    /// arms above (kept separate so each per-state fn only lists its real
    /// deltas from the others).
    async fn dispatch_common(self: &Arc<Self>, msg: ClusterMessage) {
        match msg {
            ClusterMessage::MonitorClient { subscriber } => {
                self.client_observers.lock().push(subscriber);
            }
            ClusterMessage::QueryMembership { reply_to } => {
                let _ = reply_to.send(self.state.read().members.iter().cloned().collect());
            }
            ClusterMessage::ListPartitions { member, reply_to } => {
                let keys = self
                    .state
                    .read()
                    .partitions_to_members
                    .iter()
                    .filter(|(_, members)| members.contains(&member))
                    .map(|(k, _)| k.clone())
                    .collect();
                let _ = reply_to.send(keys);
            }
            ClusterMessage::MonitorPartition { subscriber, sender } => {
                self.partition_tx
                    .send(PartitionMessage::MonitorPartition { subscriber, sender })
                    .await
                    .ok();
            }
            ClusterMessage::StopMonitorPartition { subscriber } => {
                self.partition_tx
                    .send(PartitionMessage::StopMonitorPartition { subscriber })
                    .await
                    .ok();
            }
            ClusterMessage::ClientUpdated(new_client) => {
                self.client.store(new_client.clone());
                let observers = self.client_observers.lock().clone();
                for obs in observers {
                    obs.send(new_client.clone()).await.ok();
                }
            }
            ClusterMessage::PartitionRemoval(key) => {
                self.state.write().partitions_to_members.remove(&key);
            }
            _ => {}
        }
    }

    fn merge_diff(&self, diff: PartitionDiff) {
        let mut state = self.state.write();
        for (key, members) in diff {
            state.partitions_to_members.insert(key, members);
        }
    }

    fn forward_query_to_leader(&self, key: PartitionKey, tag: Tag, reply_to: tokio::sync::oneshot::Sender<Partition>) {
        // No remote transport is configured in this crate (§1 Non-goals);
        // a real deployment would address the leader's Cluster FSM here.
        let leader = self.state.read().leader.clone();
        warn!(?leader, partition_key = ?key, tag, "would forward query to leader, no remote transport configured");
        drop(reply_to);
    }

    fn reply_local_partition(&self, key: PartitionKey, tag: Tag, reply_to: tokio::sync::oneshot::Sender<Partition>) {
        let members = self
            .state
            .read()
            .partitions_to_members
            .get(&key)
            .cloned()
            .unwrap_or_default();
        let zk_path = coord_core::partition_zk_path(&key, self.segments_size);
        let _ = reply_to.send(Partition { key, members, zk_path, tag });
    }

    async fn create_if_absent_and_reply(
        &self,
        key: PartitionKey,
        tag: Tag,
        size: u32,
        properties: Vec<u8>,
        reply_to: tokio::sync::oneshot::Sender<Partition>,
    ) {
        let client = self.client.load_full();
        let zk_path = coord_core::partition_zk_path(&key, self.segments_size);
        let size_path = coord_core::size_of_par_zk_path(&key, self.segments_size);

        client.guarantee(&zk_path, properties, CreateMode::Persistent).await.ok();
        client
            .guarantee(&size_path, size.to_be_bytes().to_vec(), CreateMode::Persistent)
            .await
            .ok();

        {
            let mut state = self.state.write();
            state.partitions_to_members.entry(key.clone()).or_insert_with(Vec::new);
        }
        self.run_rebalance().await;

        let members = self
            .state
            .read()
            .partitions_to_members
            .get(&key)
            .cloned()
            .unwrap_or_default();
        let _ = reply_to.send(Partition { key, members, zk_path, tag });
    }

    async fn run_rebalance(&self) {
        let client = self.client.load_full();
        let (candidates, plan_input) = {
            let state = self.state.read();
            let mut candidates: Vec<Address> = state.members.iter().cloned().collect();
            if self.spare_leader {
                if let Some(leader) = &state.leader {
                    candidates.retain(|a| a != leader);
                }
            }
            let mut plan_input = BTreeMap::new();
            for (key, current) in &state.partitions_to_members {
                plan_input.insert(key.clone(), current.clone());
            }
            (candidates, plan_input)
        };

        let mut entries = BTreeMap::new();
        for (key, current) in plan_input {
            let size_path = size_of_par_zk_path(&key, self.segments_size);
            let required = match client.get_data(&size_path).await {
                Ok(bytes) if bytes.len() == 4 => {
                    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                }
                _ => 1,
            };
            entries.insert(key, RebalanceEntry { required, current });
        }

        let plan = rebalance(&entries, &candidates, self.dc_resolver.as_ref());

        self.state.write().partitions_to_members = plan.clone();
        self.partition_tx.send(PartitionMessage::Rebalance(plan)).await.ok();
    }

    async fn become_leader(self: &Arc<Self>) {
        {
            let mut state = self.state.write();
            state.leader = Some(self.self_address.clone());
        }
        self.run_rebalance().await;
        self.transition_to(FsmState::Leader).await;
    }

    #[instrument(skip(self))]
    async fn transition_to(self: &Arc<Self>, next: FsmState) {
        let prev = {
            let mut state = self.state.write();
            let prev = state.state;
            state.state = next;
            prev
        };
        info!(?prev, ?next, "cluster fsm transition");

        match (prev, next) {
            (FsmState::Uninitialized, FsmState::Follower) => {
                self.unstash().await;
                self.monitor_self_partitions().await;
            }
            (FsmState::Uninitialized, FsmState::Leader) => {
                self.unstash().await;
            }
            (FsmState::Follower, FsmState::Leader) => {
                self.stop_monitor_self_partitions().await;
            }
            (FsmState::Leader, FsmState::Follower) => {
                self.monitor_self_partitions().await;
            }
            _ => {}
        }
    }

    async fn unstash(self: &Arc<Self>) {
        let stashed = std::mem::take(&mut *self.stash.lock());
        for msg in stashed {
            self.self_tx.send(msg).await.ok();
        }
    }

    async fn monitor_self_partitions(&self) {
        let (tx, mut rx) = mpsc::channel(1);
        self.partition_tx
            .send(PartitionMessage::MonitorPartition { subscriber: self.self_address.clone(), sender: tx })
            .await
            .ok();
        // Follower state holds this receiver open only for as long as it
        // takes to register; the Partition Manager fans PartitionDiff out
        // to the cluster channel directly, so this subscription exists for
        // subscriber-count bookkeeping rather than message delivery here.
        rx.close();
        let _ = rx.try_recv();
    }

    async fn stop_monitor_self_partitions(&self) {
        self.partition_tx
            .send(PartitionMessage::StopMonitorPartition { subscriber: self.self_address.clone() })
            .await
            .ok();
    }
}

/// `true` for the messages handled identically regardless of FSM state
/// (§4.3 "Universal (mandatory) handling") -- these bypass the
/// `Uninitialized` stash entirely, unlike every other message.
fn is_universal(msg: &ClusterMessage) -> bool {
    matches!(
        msg,
        ClusterMessage::ClientUpdated(_)
            | ClusterMessage::MonitorClient { .. }
            | ClusterMessage::QueryMembership { .. }
            | ClusterMessage::MonitorPartition { .. }
            | ClusterMessage::StopMonitorPartition { .. }
            | ClusterMessage::ListPartitions { .. }
    )
}

#[async_trait]
impl ManagedService for ClusterFsm {
    fn name(&self) -> &'static str {
        "cluster_fsm"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.seed_from_segments().await;
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Ok(())
    }
}
