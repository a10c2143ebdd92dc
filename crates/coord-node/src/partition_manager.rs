//! Partition Manager: per-segment watches, the local `partitionsToMembers`
//! snapshot, onboard/dropoff execution, and diff propagation.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use coord_core::{
    address_to_path, partition_member_path, partition_zk_path, path_to_address, path_to_key,
    size_of_par_zk_path, Address, CoordinationClient, CreateMode, PartitionKey, SegmentId,
    WatchEventKind, SEGMENTS_PATH, SIZE_NODE_NAME,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::messages::{ClusterMessage, Partition, PartitionDiff, PartitionEvent, PartitionMessage, Tag};
use crate::registry::{ManagedService, ServiceContext};

pub struct PartitionManager {
    segments_size: u32,
    client: ArcSwap<dyn CoordinationClient>,
    cluster_tx: mpsc::Sender<ClusterMessage>,
    /// Local snapshot: partition key -> ordered member addresses.
    snapshot: DashMap<PartitionKey, Vec<Address>>,
    /// Which segment each known key belongs to, for dropoff detection.
    key_segment: DashMap<PartitionKey, SegmentId>,
    subscribers: Mutex<BTreeMap<Address, mpsc::Sender<PartitionEvent>>>,
    mailbox: Mutex<Option<mpsc::Receiver<PartitionMessage>>>,
    self_tx: mpsc::Sender<PartitionMessage>,
    self_address: Address,
}

impl PartitionManager {
    #[must_use]
    pub fn new(
        self_address: Address,
        segments_size: u32,
        client: Arc<dyn CoordinationClient>,
        cluster_tx: mpsc::Sender<ClusterMessage>,
    ) -> Arc<Self> {
        let (self_tx, mailbox) = mpsc::channel(256);
        Arc::new(Self {
            segments_size,
            client: ArcSwap::from(client),
            cluster_tx,
            snapshot: DashMap::new(),
            key_segment: DashMap::new(),
            subscribers: Mutex::new(BTreeMap::new()),
            mailbox: Mutex::new(Some(mailbox)),
            self_tx,
            self_address,
        })
    }

    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<PartitionMessage> {
        self.self_tx.clone()
    }

    pub async fn run(self: Arc<Self>) {
        let mut mailbox = self
            .mailbox
            .lock()
            .take()
            .expect("PartitionManager::run called more than once");

        self.initialize().await;
        self.spawn_watchers();

        while let Some(msg) = mailbox.recv().await {
            self.handle(msg).await;
        }
    }

    /// One child-watcher per known segment and per known partition, matching
    /// what `initialize` just discovered.
    fn spawn_watchers(self: &Arc<Self>) {
        let segments: std::collections::BTreeSet<SegmentId> =
            self.key_segment.iter().map(|e| *e.value()).collect();
        for segment in segments {
            self.spawn_segment_watcher(segment);
        }
        for entry in self.key_segment.iter() {
            let key = entry.key().clone();
            let segment = *entry.value();
            let segment_path = format!("{SEGMENTS_PATH}/{}", segment.node_name());
            let key_path = format!("{segment_path}/{}", coord_core::key_to_path(key.as_bytes()));
            self.spawn_partition_watcher(segment, key_path);
        }
    }

    fn spawn_segment_watcher(self: &Arc<Self>, segment: SegmentId) {
        let client = self.client.load_full();
        let segment_path = format!("{SEGMENTS_PATH}/{}", segment.node_name());
        let mut rx = client.watch_children(&segment_path);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(
                    event.kind,
                    WatchEventKind::NodeCreated
                        | WatchEventKind::NodeDataChanged
                        | WatchEventKind::NodeChildrenChanged
                ) {
                    continue;
                }
                this.refresh_segment(segment).await;
            }
        });
    }

    async fn refresh_segment(self: &Arc<Self>, segment: SegmentId) {
        let client = self.client.load_full();
        let segment_path = format!("{SEGMENTS_PATH}/{}", segment.node_name());
        let children = match client.get_children(&segment_path).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, segment = segment.0, "failed to refresh segment");
                return;
            }
        };

        let mut change = BTreeMap::new();
        for key_segment_name in children {
            let Ok(raw) = path_to_key(&key_segment_name) else { continue };
            let key = PartitionKey::from(raw);
            let key_path = format!("{segment_path}/{key_segment_name}");
            let members = match client.get_children(&key_path).await {
                Ok(c) => c,
                Err(_) => continue,
            };
            let addresses: Vec<Address> = members
                .into_iter()
                .filter(|name| name != SIZE_NODE_NAME)
                .filter_map(|name| path_to_address(&name).ok())
                .collect();
            if !self.key_segment.contains_key(&key) {
                self.spawn_partition_watcher(segment, key_path);
            }
            change.insert(key, addresses);
        }

        self.self_tx
            .send(PartitionMessage::PartitionsChanged { segment: segment.0, change })
            .await
            .ok();
    }

    fn spawn_partition_watcher(self: &Arc<Self>, segment: SegmentId, key_path: String) {
        let client = self.client.load_full();
        let mut rx = client.watch_children(&key_path);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(
                    event.kind,
                    WatchEventKind::NodeCreated
                        | WatchEventKind::NodeDataChanged
                        | WatchEventKind::NodeChildrenChanged
                ) {
                    continue;
                }
                this.refresh_segment(segment).await;
            }
        });
    }

    #[instrument(skip(self))]
    async fn initialize(&self) {
        let client = self.client.load_full();
        let segments = match client.get_children(SEGMENTS_PATH).await {
            Ok(children) => children,
            Err(e) => {
                warn!(error = %e, "failed to list segments");
                return;
            }
        };

        for segment_name in segments {
            let Some(segment) = parse_segment_name(&segment_name) else {
                continue;
            };
            let segment_path = format!("{SEGMENTS_PATH}/{segment_name}");
            let children = match client.get_children(&segment_path).await {
                Ok(c) => c,
                Err(e) if e.is_no_node() => continue,
                Err(e) => {
                    warn!(error = %e, segment = segment.0, "failed to list partitions in segment");
                    continue;
                }
            };
            for key_segment_name in children {
                let Ok(raw) = path_to_key(&key_segment_name) else {
                    warn!(key_segment_name, "unparseable partition key segment, skipping");
                    continue;
                };
                let key = PartitionKey::from(raw);
                let key_path = format!("{segment_path}/{key_segment_name}");
                let members = match client.get_children(&key_path).await {
                    Ok(c) => c,
                    Err(e) if e.is_no_node() => continue,
                    Err(e) => {
                        warn!(error = %e, "failed to read partition members");
                        continue;
                    }
                };
                let addresses = members
                    .into_iter()
                    .filter(|name| name != SIZE_NODE_NAME)
                    .filter_map(|name| path_to_address(&name).ok())
                    .collect();
                self.snapshot.insert(key.clone(), addresses);
                self.key_segment.insert(key, segment);
            }
        }
    }

    async fn handle(self: &Arc<Self>, msg: PartitionMessage) {
        match msg {
            PartitionMessage::PartitionsChanged { segment, change } => {
                self.apply_partitions_changed(segment, change).await;
            }
            PartitionMessage::Rebalance(plan) => self.apply_rebalance(plan).await,
            PartitionMessage::PartitionOnboard { key, zk_path } => {
                self.partition_onboard(&key, &zk_path).await;
            }
            PartitionMessage::PartitionDropoff { key, zk_path } => {
                self.partition_dropoff(&key, &zk_path).await;
            }
            PartitionMessage::RemovePartition { key } => self.remove_partition(&key).await,
            PartitionMessage::QueryPartition { key, tag, reply_to } => {
                let _ = reply_to.send(self.read_partition(&key, tag).await);
            }
            PartitionMessage::MonitorPartition { subscriber, sender } => {
                self.subscribers.lock().insert(subscriber, sender);
            }
            PartitionMessage::StopMonitorPartition { subscriber } => {
                self.subscribers.lock().remove(&subscriber);
            }
            PartitionMessage::ClientUpdated(client) => {
                self.client.store(client);
                self.initialize().await;
                self.spawn_watchers();
            }
        }
    }

    async fn apply_partitions_changed(&self, segment: u32, change: BTreeMap<PartitionKey, Vec<Address>>) {
        let segment = SegmentId(segment);
        let local_keys_in_segment: Vec<PartitionKey> = self
            .key_segment
            .iter()
            .filter(|e| *e.value() == segment)
            .map(|e| e.key().clone())
            .collect();

        let dropoffs: Vec<PartitionKey> = local_keys_in_segment
            .into_iter()
            .filter(|k| !change.contains_key(k))
            .collect();

        let mut onboards: Vec<PartitionKey> = Vec::new();
        for (key, members) in &change {
            let differs = self
                .snapshot
                .get(key)
                .map_or(true, |existing| existing.value() != members);
            if differs {
                onboards.push(key.clone());
            }
        }

        if dropoffs.is_empty() && onboards.is_empty() {
            return;
        }

        let mut diff: PartitionDiff = BTreeMap::new();
        let mut zk_paths: BTreeMap<PartitionKey, String> = BTreeMap::new();

        for key in &onboards {
            let members = change.get(key).cloned().unwrap_or_default();
            let ordered = self.order_by_age(key, &members).await;
            zk_paths.insert(key.clone(), partition_zk_path(key, self.segments_size));
            diff.insert(key.clone(), ordered.clone());
            self.snapshot.insert(key.clone(), ordered);
            self.key_segment.insert(key.clone(), segment);
        }
        for key in &dropoffs {
            diff.insert(key.clone(), Vec::new());
            zk_paths.insert(key.clone(), partition_zk_path(key, self.segments_size));
            self.snapshot.remove(key);
            self.key_segment.remove(key);
        }

        self.notify_subscribers(PartitionEvent::Diff { diff: diff.clone(), zk_paths: zk_paths.clone() });
        self.cluster_tx
            .send(ClusterMessage::PartitionDiff { diff, zk_paths })
            .await
            .ok();
    }

    /// Deterministic primary/replica order: by ephemeral-node creation
    /// timestamp, tie-broken on address. Identical across processes for a
    /// given `(key, members)` because both inputs are pure function
    /// arguments and the timestamp is observed coordination-service state.
    async fn order_by_age(&self, key: &PartitionKey, members: &[Address]) -> Vec<Address> {
        let client = self.client.load_full();
        let mut with_age = Vec::with_capacity(members.len());
        for addr in members {
            let path = partition_member_path(key, self.segments_size, addr);
            let age = client.created_at_ms(&path).await.unwrap_or(u64::MAX);
            with_age.push((age, addr.clone()));
        }
        with_age.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        with_age.into_iter().map(|(_, a)| a).collect()
    }

    async fn apply_rebalance(&self, plan: BTreeMap<PartitionKey, Vec<Address>>) {
        for (key, desired) in plan {
            let current = self.snapshot.get(&key).map(|v| v.value().clone()).unwrap_or_default();
            let desired_set: std::collections::BTreeSet<_> = desired.iter().cloned().collect();
            let current_set: std::collections::BTreeSet<_> = current.iter().cloned().collect();

            let onboards: Vec<Address> = desired_set.difference(&current_set).cloned().collect();
            let dropoffs: Vec<Address> = current_set.difference(&desired_set).cloned().collect();
            let zk_path = partition_zk_path(&key, self.segments_size);

            for addr in onboards {
                if addr == self.self_address {
                    self.partition_onboard(&key, &zk_path).await;
                } else {
                    debug!(%addr, partition_key = ?key, "onboard addressed to peer, not delivered (no remote transport configured)");
                }
            }
            for addr in dropoffs {
                if addr == self.self_address {
                    self.partition_dropoff(&key, &zk_path).await;
                } else {
                    debug!(%addr, partition_key = ?key, "dropoff addressed to peer, not delivered (no remote transport configured)");
                }
            }
        }
    }

    async fn partition_onboard(&self, _key: &PartitionKey, zk_path: &str) {
        let client = self.client.load_full();
        if let Err(e) = client.guarantee(zk_path, Vec::new(), CreateMode::Persistent).await {
            warn!(error = %e, zk_path, "failed to guarantee partition node");
            return;
        }
        let self_path = format!("{zk_path}/{}", address_to_path(&self.self_address));
        if let Err(e) = client.guarantee(&self_path, Vec::new(), CreateMode::Ephemeral).await {
            warn!(error = %e, self_path, "failed to create ephemeral onboard node");
        }
    }

    async fn partition_dropoff(&self, _key: &PartitionKey, zk_path: &str) {
        let client = self.client.load_full();
        let self_path = format!("{zk_path}/{}", address_to_path(&self.self_address));
        client.safely_discard(&self_path).await.ok();
    }

    async fn remove_partition(&self, key: &PartitionKey) {
        let client = self.client.load_full();
        let zk_path = partition_zk_path(key, self.segments_size);
        client.delete_recursive(&zk_path).await.ok();
        self.snapshot.remove(key);
        self.key_segment.remove(key);
        self.notify_subscribers(PartitionEvent::Removal(key.clone()));
        self.cluster_tx
            .send(ClusterMessage::PartitionRemoval(key.clone()))
            .await
            .ok();
    }

    async fn read_partition(&self, key: &PartitionKey, tag: Tag) -> Partition {
        let members = self.snapshot.get(key).map(|v| v.value().clone()).unwrap_or_default();
        let ordered = self.order_by_age(key, &members).await;
        Partition {
            key: key.clone(),
            members: ordered,
            zk_path: partition_zk_path(key, self.segments_size),
            tag,
        }
    }

    fn notify_subscribers(&self, event: PartitionEvent) {
        let subscribers = self.subscribers.lock();
        for sender in subscribers.values() {
            let _ = sender.try_send(event.clone());
        }
    }
}

fn parse_segment_name(name: &str) -> Option<SegmentId> {
    name.strip_prefix("segment-")?.parse::<u32>().ok().map(SegmentId)
}

#[async_trait]
impl ManagedService for PartitionManager {
    fn name(&self) -> &'static str {
        "partition_manager"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.snapshot.clear();
        self.key_segment.clear();
        self.initialize().await;
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeClient;

    fn manager() -> Arc<PartitionManager> {
        let (tx, _rx) = mpsc::channel(8);
        let client: Arc<dyn CoordinationClient> = Arc::new(FakeClient::new());
        PartitionManager::new(Address::new("self", 1), 128, client, tx)
    }

    #[test]
    fn parse_segment_name_extracts_index() {
        assert_eq!(parse_segment_name("segment-7"), Some(SegmentId(7)));
        assert_eq!(parse_segment_name("not-a-segment"), None);
    }

    #[tokio::test]
    async fn onboard_then_dropoff_round_trips_ephemeral() {
        let mgr = manager();
        let key = PartitionKey::from("k");
        let zk_path = partition_zk_path(&key, 128);
        mgr.partition_onboard(&key, &zk_path).await;
        let self_path = format!("{zk_path}/{}", address_to_path(&mgr.self_address));
        assert!(mgr.client.load().get_data(&self_path).await.is_ok());

        mgr.partition_dropoff(&key, &zk_path).await;
        assert!(mgr.client.load().get_data(&self_path).await.is_err());
    }

    #[tokio::test]
    async fn dropoff_on_missing_node_is_not_an_error() {
        let mgr = manager();
        let key = PartitionKey::from("k");
        let zk_path = partition_zk_path(&key, 128);
        // No onboard happened; dropoff must still succeed silently.
        mgr.partition_dropoff(&key, &zk_path).await;
    }

    #[tokio::test]
    async fn apply_partitions_changed_suppresses_notification_on_no_change() {
        let mgr = manager();
        let key = PartitionKey::from("k");
        let members = vec![Address::new("a", 1)];
        let mut change = BTreeMap::new();
        change.insert(key.clone(), members.clone());

        mgr.apply_partitions_changed(0, change.clone()).await;
        assert!(mgr.snapshot.contains_key(&key));

        // Re-apply the same change: no onboard/dropoff, so the (already
        // quiescent) snapshot must remain untouched.
        mgr.apply_partitions_changed(0, change).await;
        assert_eq!(mgr.snapshot.get(&key).unwrap().value(), &members);
    }
}
