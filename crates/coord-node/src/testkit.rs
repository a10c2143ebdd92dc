//! In-memory fakes for the coordination-service seam, used only by tests in
//! this crate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use coord_core::{ClientState, CoordError, CoordinationClient, CreateMode, LeaderLatch, WatchEvent};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::membership::LatchFactory;

struct Node {
    data: Vec<u8>,
    created_at_ms: u64,
}

/// A single-process, in-memory stand-in for a ZooKeeper-like client.
///
/// Good enough to exercise create/guarantee/delete/get/list semantics and
/// the no-node error path; it does not model sessions, watches firing on
/// remote writes across distinct `FakeClient` instances, or ephemeral
/// expiry -- tests that need those drive the relevant method directly.
pub struct FakeClient {
    nodes: Mutex<BTreeMap<String, Node>>,
    clock: AtomicU64,
    state_tx: watch::Sender<ClientState>,
}

impl FakeClient {
    #[must_use]
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ClientState::Connected);
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            clock: AtomicU64::new(0),
            state_tx,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let nodes = self.nodes.lock();
        let mut names: Vec<String> = nodes
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl Default for FakeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationClient for FakeClient {
    async fn create(&self, path: &str, data: Vec<u8>, _mode: CreateMode) -> Result<(), CoordError> {
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(path) {
            return Err(CoordError::NodeExists { path: path.to_string() });
        }
        let created_at_ms = self.tick();
        nodes.insert(path.to_string(), Node { data, created_at_ms });
        Ok(())
    }

    async fn guarantee(&self, path: &str, data: Vec<u8>, _mode: CreateMode) -> Result<(), CoordError> {
        let created_at_ms = self.tick();
        let mut nodes = self.nodes.lock();
        nodes
            .entry(path.to_string())
            .and_modify(|n| n.data = data.clone())
            .or_insert(Node { data, created_at_ms });
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), CoordError> {
        let mut nodes = self.nodes.lock();
        if nodes.remove(path).is_none() {
            return Err(CoordError::NoNode { path: path.to_string() });
        }
        Ok(())
    }

    async fn delete_recursive(&self, path: &str) -> Result<(), CoordError> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut nodes = self.nodes.lock();
        nodes.retain(|key, _| key != path && !key.starts_with(&prefix));
        Ok(())
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>, CoordError> {
        self.nodes
            .lock()
            .get(path)
            .map(|n| n.data.clone())
            .ok_or_else(|| CoordError::NoNode { path: path.to_string() })
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, CoordError> {
        Ok(self.children_of(path))
    }

    async fn created_at_ms(&self, path: &str) -> Result<u64, CoordError> {
        self.nodes
            .lock()
            .get(path)
            .map(|n| n.created_at_ms)
            .ok_or_else(|| CoordError::NoNode { path: path.to_string() })
    }

    fn watch_data(&self, _path: &str) -> mpsc::Receiver<WatchEvent> {
        // No firing support in this fake: tests drive refresh paths directly
        // rather than relying on watch delivery.
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    fn watch_children(&self, _path: &str) -> mpsc::Receiver<WatchEvent> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    fn state_changes(&self) -> watch::Receiver<ClientState> {
        self.state_tx.subscribe()
    }
}

/// A leader latch that always resolves the same way, for tests that need a
/// deterministic winner or loser without a real election.
pub struct FakeLatch {
    wins: bool,
}

impl FakeLatch {
    #[must_use]
    pub fn winner() -> Self {
        Self { wins: true }
    }

    #[must_use]
    pub fn loser() -> Self {
        Self { wins: false }
    }
}

#[async_trait]
impl LeaderLatch for FakeLatch {
    async fn wait_for_leadership(&self, _timeout_ms: u64) -> bool {
        self.wins
    }

    async fn close(&self) -> Result<(), CoordError> {
        Ok(())
    }
}

#[must_use]
pub fn fake_client() -> Arc<dyn CoordinationClient> {
    Arc::new(FakeClient::new())
}

/// A `LatchFactory` that always hands back a fixed win/lose outcome and
/// counts how many times it was asked to build one, so tests can assert a
/// reconnect actually triggered a rebuild.
pub struct StaticLatchFactory {
    wins: bool,
    builds: AtomicU64,
}

impl StaticLatchFactory {
    #[must_use]
    pub fn winner() -> Self {
        Self { wins: true, builds: AtomicU64::new(0) }
    }

    #[must_use]
    pub fn loser() -> Self {
        Self { wins: false, builds: AtomicU64::new(0) }
    }

    #[must_use]
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LatchFactory for StaticLatchFactory {
    async fn build(&self, _client: &Arc<dyn CoordinationClient>) -> Arc<dyn LeaderLatch> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.wins { Arc::new(FakeLatch::winner()) } else { Arc::new(FakeLatch::loser()) }
    }
}
