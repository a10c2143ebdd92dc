//! Membership Monitor: leader latch participation, ephemeral presence, and
//! watches on `/leader` and `/members`.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use coord_core::{
    Address, CoordinationClient, CreateMode, LeaderLatch, WatchEventKind, LEADER_PATH, MEMBERS_PATH,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::messages::{ClusterMessage, MembershipMessage};
use crate::registry::{ManagedService, ServiceContext};

const ACQUIRE_LEADERSHIP_WAIT: Duration = Duration::from_secs(1);
const ACQUIRE_LEADERSHIP_RETRY: Duration = Duration::from_millis(100);

/// Builds a fresh `LeaderLatch` bound to a given client. Called on first
/// start and again after `ClientUpdated`, since a latch is only valid for
/// the session it was created under.
#[async_trait]
pub trait LatchFactory: Send + Sync {
    async fn build(&self, client: &Arc<dyn CoordinationClient>) -> Arc<dyn LeaderLatch>;
}

pub struct MembershipMonitor {
    self_address: Address,
    client: ArcSwap<dyn CoordinationClient>,
    latch: Mutex<Arc<dyn LeaderLatch>>,
    latch_factory: Arc<dyn LatchFactory>,
    cluster_tx: mpsc::Sender<ClusterMessage>,
    mailbox: Mutex<Option<mpsc::Receiver<MembershipMessage>>>,
    self_tx: mpsc::Sender<MembershipMessage>,
}

impl MembershipMonitor {
    #[must_use]
    pub fn new(
        self_address: Address,
        client: Arc<dyn CoordinationClient>,
        latch: Arc<dyn LeaderLatch>,
        latch_factory: Arc<dyn LatchFactory>,
        cluster_tx: mpsc::Sender<ClusterMessage>,
    ) -> Arc<Self> {
        let (self_tx, mailbox) = mpsc::channel(128);
        Arc::new(Self {
            self_address,
            client: ArcSwap::from(client),
            latch: Mutex::new(latch),
            latch_factory,
            cluster_tx,
            mailbox: Mutex::new(Some(mailbox)),
            self_tx,
        })
    }

    /// Runs the mailbox loop plus the watch-driven event sources. Consumes
    /// the mailbox receiver, so this may only be called once per instance.
    pub async fn run(self: Arc<Self>) {
        let mut mailbox = self
            .mailbox
            .lock()
            .take()
            .expect("MembershipMonitor::run called more than once");

        self.start_watches().await;
        self.spawn_watchers();
        self.self_tx
            .send(MembershipMessage::AcquireLeadership)
            .await
            .ok();

        while let Some(msg) = mailbox.recv().await {
            match msg {
                MembershipMessage::AcquireLeadership => self.acquire_leadership().await,
                MembershipMessage::ClientUpdated(new_client) => {
                    self.on_client_updated(new_client).await;
                }
            }
        }
    }

    #[instrument(skip(self), fields(node = %self.self_address))]
    async fn start_watches(&self) {
        self.client
            .load()
            .guarantee(
                &member_path(&self.self_address),
                Vec::new(),
                CreateMode::Ephemeral,
            )
            .await
            .ok();

        self.refresh_leader().await;
        self.refresh_members().await;
    }

    fn spawn_watchers(self: &Arc<Self>) {
        let client = self.client.load_full();

        let leader_watch = client.watch_data(LEADER_PATH);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = leader_watch;
            while let Some(event) = rx.recv().await {
                this.on_watch_event(event.kind, true).await;
            }
        });

        let members_watch = client.watch_children(MEMBERS_PATH);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = members_watch;
            while let Some(event) = rx.recv().await {
                this.on_watch_event(event.kind, false).await;
            }
        });
    }

    async fn refresh_leader(&self) {
        let client = self.client.load_full();
        match client.get_data(LEADER_PATH).await {
            Ok(bytes) => {
                let leader = decode_address(&bytes);
                self.cluster_tx
                    .send(ClusterMessage::LeaderElected(leader))
                    .await
                    .ok();
            }
            Err(e) if e.is_no_node() => {
                debug!("no leader node yet");
                self.cluster_tx
                    .send(ClusterMessage::LeaderElected(None))
                    .await
                    .ok();
            }
            Err(e) => warn!(error = %e, "failed to read leader node"),
        }
    }

    async fn refresh_members(&self) {
        let client = self.client.load_full();
        match client.get_children(MEMBERS_PATH).await {
            Ok(children) => {
                let members = children
                    .iter()
                    .filter_map(|segment| match coord_core::path_to_address(segment) {
                        Ok(addr) => Some(addr),
                        Err(_) => {
                            warn!(segment, "unparseable member address, skipping");
                            None
                        }
                    })
                    .collect();
                self.cluster_tx
                    .send(ClusterMessage::MembersChanged(members))
                    .await
                    .ok();
            }
            Err(e) => warn!(error = %e, "failed to list members"),
        }
    }

    /// Dispatches one watch event: re-read the relevant view, re-arm is the
    /// caller's responsibility (a fresh watch channel per firing).
    async fn on_watch_event(&self, kind: WatchEventKind, is_leader_path: bool) {
        if !matches!(
            kind,
            WatchEventKind::NodeCreated | WatchEventKind::NodeDataChanged | WatchEventKind::NodeChildrenChanged
        ) {
            return;
        }
        if is_leader_path {
            self.refresh_leader().await;
        } else {
            self.refresh_members().await;
        }
    }

    async fn acquire_leadership(&self) {
        let latch = self.latch.lock().clone();
        let won = tokio::time::timeout(ACQUIRE_LEADERSHIP_WAIT, async {
            latch.wait_for_leadership(ACQUIRE_LEADERSHIP_WAIT.as_millis() as u64).await
        })
        .await
        .unwrap_or(false);

        if won {
            let client = self.client.load_full();
            let data = self.self_address.to_string().into_bytes();
            if let Err(e) = client.guarantee(LEADER_PATH, data, CreateMode::Persistent).await {
                warn!(error = %e, "failed to write self into leader node");
            } else {
                info!(node = %self.self_address, "acquired leadership, wrote /leader");
            }
            self.reschedule(ACQUIRE_LEADERSHIP_RETRY);
        } else {
            self.reschedule(ACQUIRE_LEADERSHIP_RETRY);
        }
    }

    fn reschedule(&self, after: Duration) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            tx.send(MembershipMessage::AcquireLeadership).await.ok();
        });
    }

    async fn on_client_updated(self: &Arc<Self>, new_client: Arc<dyn CoordinationClient>) {
        let old_latch = self.latch.lock().clone();
        old_latch.close().await.ok();

        let new_latch = self.latch_factory.build(&new_client).await;
        *self.latch.lock() = new_latch;

        self.client.store(new_client);
        self.start_watches().await;
        self.spawn_watchers();
        self.self_tx.send(MembershipMessage::AcquireLeadership).await.ok();
    }

    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<MembershipMessage> {
        self.self_tx.clone()
    }
}

fn member_path(address: &Address) -> String {
    coord_core::member_path(address)
}

fn decode_address(bytes: &[u8]) -> Option<Address> {
    if bytes.is_empty() {
        return None;
    }
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.rsplit_once(':'))
        .and_then(|(host, port)| port.parse::<u16>().ok().map(|p| Address::new(host, p)))
}

#[async_trait]
impl ManagedService for MembershipMonitor {
    fn name(&self) -> &'static str {
        "membership"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.start_watches().await;
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        self.latch.lock().close().await.ok();
        Ok(())
    }
}
