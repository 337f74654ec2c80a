//! The coordination service contract consumed by the recipes.
//!
//! A coordination service is a hierarchical store of small nodes with
//! atomic create/delete, optional service-assigned sequence suffixes,
//! one-shot change watches, and session-scoped ephemeral ownership.
//! The recipes never talk to a concrete client; they hold an
//! `Arc<dyn CoordinationService>`.

use crate::error::{CoordError, CoordResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateMode {
    /// Plain durable node
    Persistent,
    /// Durable node with a service-assigned sequence suffix
    PersistentSequential,
    /// Node deleted when the creating session ends
    Ephemeral,
    /// Ephemeral node with a service-assigned sequence suffix
    EphemeralSequential,
}

impl CreateMode {
    /// True when the service appends a sequence suffix to the name
    #[must_use]
    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }

    /// True when the node dies with its creating session
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }
}

/// Node metadata returned by existence checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Mutation version, starts at 0
    pub version: i32,
    /// Number of direct children
    pub num_children: usize,
    /// Owning session id for ephemeral nodes
    pub ephemeral_owner: Option<u64>,
}

/// What changed at a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// The watched node appeared
    NodeCreated,
    /// The watched node was deleted
    NodeDeleted,
    /// The watched node's child list changed
    ChildrenChanged,
}

/// A single change notification delivered to a watch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEvent {
    /// Kind of change
    pub kind: EventKind,
    /// Path the watch was registered on
    pub path: String,
}

/// Session lifecycle notifications, delivered out-of-band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Session established or re-established
    Connected,
    /// Connection dropped; in-flight operations should be retried
    Disconnected,
    /// Session is gone for good, along with its ephemeral nodes
    Expired,
}

/// One-shot watch handle.
///
/// A watch fires at most once and must be re-registered to keep observing;
/// every recipe loop re-registers on each iteration.
#[derive(Debug)]
pub struct Watch {
    rx: oneshot::Receiver<WatchedEvent>,
}

impl Watch {
    /// Create a watch and the sender half a service uses to fire it.
    #[must_use]
    pub fn channel() -> (oneshot::Sender<WatchedEvent>, Watch) {
        let (tx, rx) = oneshot::channel();
        (tx, Watch { rx })
    }

    /// Wait for the watch to fire.
    ///
    /// # Errors
    ///
    /// Returns `SessionExpired` if the owning session died before the
    /// watch fired; the notification will never arrive.
    pub async fn wait(self) -> CoordResult<WatchedEvent> {
        self.rx.await.map_err(|_| CoordError::SessionExpired)
    }
}

/// Contract of a hierarchical coordination service, as seen by one session.
///
/// Sequential creates append a zero-padded, monotonically increasing
/// integer chosen by the service, unique per parent across all sessions.
/// Watches are one-shot. Implementations must make create/delete/exists
/// atomic with respect to each other; the recipes lean on that atomicity
/// instead of in-process locks.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Id of the session this handle speaks for
    fn session_id(&self) -> u64;

    /// Create a node, returning the actual created path (which differs
    /// from `path` for sequential modes).
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> CoordResult<String>;

    /// Check whether a node exists.
    async fn exists(&self, path: &str) -> CoordResult<Option<Stat>>;

    /// Check existence and register a watch that fires on the next
    /// create or delete of `path`, whether or not the node exists now.
    async fn exists_watch(&self, path: &str) -> CoordResult<(Option<Stat>, Watch)>;

    /// Read a node's payload.
    async fn get_data(&self, path: &str) -> CoordResult<Vec<u8>>;

    /// Read a node's payload and register a watch on the node.
    async fn get_data_watch(&self, path: &str) -> CoordResult<(Vec<u8>, Watch)>;

    /// List a node's children, in no particular order.
    async fn get_children(&self, path: &str) -> CoordResult<Vec<String>>;

    /// List children and register a watch that fires when the child list
    /// changes or the node itself is deleted.
    async fn get_children_watch(&self, path: &str) -> CoordResult<(Vec<String>, Watch)>;

    /// Delete a node. `version >= 0` makes the delete conditional on the
    /// node's current version; `-1` deletes unconditionally.
    async fn delete(&self, path: &str, version: i32) -> CoordResult<()>;

    /// Subscribe to session lifecycle events.
    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;
}

/// Join a directory path and a child name.
#[must_use]
pub fn join_path(dir: &str, child: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{child}")
    } else {
        format!("{dir}/{child}")
    }
}

/// The bare name after the final `/` of a path.
#[must_use]
pub fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
