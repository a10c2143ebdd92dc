//! Abstraction over the coordination-service client (ZooKeeper-like).
//!
//! The client itself -- retry policy, session management, namespacing -- is
//! out of scope (§1); this trait is the seam the three components are
//! written against, and a test fake stands in for it in unit tests.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::CoordError;

/// How a znode should be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

/// The watch event types the coordinator acts on; all others are ignored
/// per §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    NodeCreated,
    NodeDataChanged,
    NodeChildrenChanged,
    NodeDeleted,
    Other,
}

/// A fired watch, re-armed as part of the read that produced it.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchEventKind,
}

/// Session-level connectivity state, driven by the underlying client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    /// Momentary disconnection; the client is expected to reconnect with
    /// the same session.
    Suspended,
    /// The session is gone. Triggers full component re-initialization.
    Lost,
}

/// The coordination-service client seam.
///
/// Reads and single-node writes (`create`, `guarantee`, `delete`) are
/// synchronous from the caller's point of view (an `async fn` that resolves
/// quickly); `watch_data`/`watch_children` hand back a channel that receives
/// one [`WatchEvent`] per firing, re-armed by the implementation as part of
/// delivering it.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Creates `path` with `data`. Fails with `CoordError::NodeExists` if
    /// the path already exists and the caller did not want `guarantee`
    /// semantics.
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<(), CoordError>;

    /// Creates `path` if absent; overwrites its data if present. Idempotent.
    async fn guarantee(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<(), CoordError>;

    /// Deletes `path`. Fails with `CoordError::NoNode` if it does not exist.
    async fn delete(&self, path: &str) -> Result<(), CoordError>;

    /// Deletes `path`, ignoring `CoordError::NoNode` (§7: "ignored,
    /// idempotent").
    async fn safely_discard(&self, path: &str) -> Result<(), CoordError> {
        match self.delete(path).await {
            Err(e) if e.is_no_node() => Ok(()),
            other => other,
        }
    }

    /// Recursively deletes `path` and all descendants.
    async fn delete_recursive(&self, path: &str) -> Result<(), CoordError>;

    /// Reads the data stored at `path`.
    async fn get_data(&self, path: &str) -> Result<Vec<u8>, CoordError>;

    /// Lists the child node names of `path`.
    async fn get_children(&self, path: &str) -> Result<Vec<String>, CoordError>;

    /// Returns the creation timestamp (ms) of `path`, used by `orderByAge`
    /// to derive a deterministic primary/replica order.
    async fn created_at_ms(&self, path: &str) -> Result<u64, CoordError>;

    /// Subscribes to data-change watches on `path`. The returned channel
    /// fires on every future change until dropped.
    fn watch_data(&self, path: &str) -> mpsc::Receiver<WatchEvent>;

    /// Subscribes to child-change watches on `path`.
    fn watch_children(&self, path: &str) -> mpsc::Receiver<WatchEvent>;

    /// Subscribes to session state transitions.
    fn state_changes(&self) -> watch::Receiver<ClientState>;
}

/// A cluster-wide leader-latch primitive: exactly one participant is the
/// winner at a time.
#[async_trait]
pub trait LeaderLatch: Send + Sync {
    /// Waits up to `timeout_ms` to become (or confirm being) the latch
    /// winner. Returns `true` iff this process holds the latch.
    async fn wait_for_leadership(&self, timeout_ms: u64) -> bool;

    /// Leaves the latch, releasing leadership if held.
    async fn close(&self) -> Result<(), CoordError>;
}
