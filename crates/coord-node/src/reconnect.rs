//! Client-state listener: on session `LOST`, rebuilds the coordination
//! client and broadcasts `ClientUpdated` to all three components.

use std::sync::Arc;

use async_trait::async_trait;
use coord_core::{ClientState, CoordinationClient};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

use crate::messages::{ClusterMessage, MembershipMessage, PartitionMessage};
use crate::registry::{ManagedService, ServiceContext};

/// Builds a fresh `CoordinationClient` (e.g. reconnecting with the same
/// retry policy and namespace) on demand.
#[async_trait]
pub trait ClientBuilder: Send + Sync {
    async fn build(&self) -> anyhow::Result<Arc<dyn CoordinationClient>>;
}

pub struct ReconnectListener {
    builder: Arc<dyn ClientBuilder>,
    current: Mutex<Arc<dyn CoordinationClient>>,
    membership_tx: mpsc::Sender<MembershipMessage>,
    partition_tx: mpsc::Sender<PartitionMessage>,
    cluster_tx: mpsc::Sender<ClusterMessage>,
}

impl ReconnectListener {
    #[must_use]
    pub fn new(
        initial_client: Arc<dyn CoordinationClient>,
        builder: Arc<dyn ClientBuilder>,
        membership_tx: mpsc::Sender<MembershipMessage>,
        partition_tx: mpsc::Sender<PartitionMessage>,
        cluster_tx: mpsc::Sender<ClusterMessage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            builder,
            current: Mutex::new(initial_client),
            membership_tx,
            partition_tx,
            cluster_tx,
        })
    }

    /// Watches the live client's state channel; runs until it closes.
    pub async fn run(self: Arc<Self>) {
        let mut state_rx: watch::Receiver<ClientState> = {
            let client = self.current.lock().await;
            client.state_changes()
        };

        loop {
            if state_rx.changed().await.is_err() {
                return;
            }
            if *state_rx.borrow() == ClientState::Lost {
                self.reconnect().await;
                state_rx = {
                    let client = self.current.lock().await;
                    client.state_changes()
                };
            }
        }
    }

    async fn reconnect(&self) {
        warn!("coordination-service session lost, rebuilding client");
        let new_client = match self.builder.build().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to rebuild coordination-service client");
                return;
            }
        };
        *self.current.lock().await = new_client.clone();

        self.membership_tx
            .send(MembershipMessage::ClientUpdated(new_client.clone()))
            .await
            .ok();
        self.partition_tx
            .send(PartitionMessage::ClientUpdated(new_client.clone()))
            .await
            .ok();
        self.cluster_tx
            .send(ClusterMessage::ClientUpdated(new_client))
            .await
            .ok();
        info!("broadcast ClientUpdated to membership, partition_manager, cluster_fsm");
    }
}

#[async_trait]
impl ManagedService for ReconnectListener {
    fn name(&self) -> &'static str {
        "reconnect"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Ok(())
    }
}
