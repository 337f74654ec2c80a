//! In-memory coordination service.
//!
//! Test scaffolding: a single shared tree with the semantics the recipes
//! depend on — atomic create/delete/exists under one lock, per-parent
//! zero-padded sequence counters, one-shot watches, and session-scoped
//! ephemeral cleanup. It stands in for a live coordination cluster so
//! the recipes can be tested without a running server.
//!
//! Not a coordination service implementation: there is no consensus, no
//! storage, no wire protocol, and the no-children rule on delete is not
//! enforced.

use crate::error::{CoordError, CoordResult};
use crate::service::{
    CoordinationService, CreateMode, EventKind, SessionEvent, Stat, Watch, WatchedEvent,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

/// Per-node state
struct NodeState {
    data: Vec<u8>,
    version: i32,
    owner: Option<u64>,
    next_sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKind {
    Exists,
    Data,
    Children,
}

struct PendingWatch {
    kind: WatchKind,
    path: String,
    session: u64,
    tx: tokio::sync::oneshot::Sender<WatchedEvent>,
}

/// The shared tree, guarded by one lock
struct Tree {
    nodes: BTreeMap<String, NodeState>,
    watches: Vec<PendingWatch>,
    next_session: u64,
    expired: HashSet<u64>,
}

impl Tree {
    fn check_session(&self, session: u64) -> CoordResult<()> {
        if self.expired.contains(&session) {
            return Err(CoordError::SessionExpired);
        }
        Ok(())
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| {
                let rest = &key[prefix.len()..];
                !rest.is_empty() && !rest.contains('/')
            })
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect()
    }

    fn stat_of(&self, path: &str) -> Option<Stat> {
        self.nodes.get(path).map(|node| Stat {
            version: node.version,
            num_children: self.children_of(path).len(),
            ephemeral_owner: node.owner,
        })
    }

    fn register(&mut self, kind: WatchKind, path: &str, session: u64) -> Watch {
        let (tx, watch) = Watch::channel();
        self.watches.push(PendingWatch {
            kind,
            path: path.to_string(),
            session,
            tx,
        });
        watch
    }

    fn fire(&mut self, kind: WatchKind, path: &str, event: EventKind) {
        let mut i = 0;
        while i < self.watches.len() {
            if self.watches[i].kind == kind && self.watches[i].path == path {
                let pending = self.watches.swap_remove(i);
                let _ = pending.tx.send(WatchedEvent {
                    kind: event,
                    path: pending.path,
                });
            } else {
                i += 1;
            }
        }
    }

    fn remove_node(&mut self, path: &str) {
        if self.nodes.remove(path).is_none() {
            return;
        }
        self.fire(WatchKind::Exists, path, EventKind::NodeDeleted);
        self.fire(WatchKind::Data, path, EventKind::NodeDeleted);
        self.fire(WatchKind::Children, path, EventKind::NodeDeleted);
        let parent = parent_of(path).to_string();
        self.fire(WatchKind::Children, &parent, EventKind::ChildrenChanged);
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn validate_path(path: &str) -> CoordResult<()> {
    let bad = |reason: &str| CoordError::BadPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if !path.starts_with('/') {
        return Err(bad("must start with '/'"));
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(bad("must not end with '/'"));
    }
    if path[1..].split('/').any(str::is_empty) {
        return Err(bad("empty path segment"));
    }
    Ok(())
}

/// A process-local coordination cluster. Cheap to construct; sessions are
/// minted with [`MemoryCluster::session`] and all share one tree.
pub struct MemoryCluster {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryCluster {
    /// Create an empty cluster holding only the root node `/`.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            NodeState {
                data: Vec::new(),
                version: 0,
                owner: None,
                next_sequence: 0,
            },
        );
        Self {
            tree: Arc::new(Mutex::new(Tree {
                nodes,
                watches: Vec::new(),
                next_session: 1,
                expired: HashSet::new(),
            })),
        }
    }

    /// Open a new session against this cluster.
    #[must_use]
    pub fn session(&self) -> MemorySession {
        let id = {
            let mut tree = lock(&self.tree);
            let id = tree.next_session;
            tree.next_session += 1;
            id
        };
        let (events, _) = broadcast::channel(16);
        let _ = events.send(SessionEvent::Connected);
        debug!(session = id, "memory session opened");
        MemorySession {
            tree: Arc::clone(&self.tree),
            id,
            events,
        }
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(tree: &Mutex<Tree>) -> MutexGuard<'_, Tree> {
    tree.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One session against a [`MemoryCluster`].
#[derive(Clone)]
pub struct MemorySession {
    tree: Arc<Mutex<Tree>>,
    id: u64,
    events: broadcast::Sender<SessionEvent>,
}

impl MemorySession {
    /// Close the session: its ephemeral nodes are deleted (firing watches
    /// held by other sessions), its own pending watches are dropped, and
    /// every further operation fails with `SessionExpired`. Idempotent.
    pub fn close(&self) {
        let mut tree = lock(&self.tree);
        if !tree.expired.insert(self.id) {
            return;
        }
        let owned: Vec<String> = tree
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(self.id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            tree.remove_node(&path);
        }
        tree.watches.retain(|watch| watch.session != self.id);
        debug!(session = self.id, "memory session closed");
        let _ = self.events.send(SessionEvent::Expired);
    }
}

#[async_trait]
impl CoordinationService for MemorySession {
    fn session_id(&self) -> u64 {
        self.id
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> CoordResult<String> {
        let mut tree = lock(&self.tree);
        tree.check_session(self.id)?;
        validate_path(path)?;

        let parent = parent_of(path).to_string();
        let actual = match tree.nodes.get_mut(&parent) {
            None => return Err(CoordError::NoNode { path: parent }),
            Some(parent_node) if mode.is_sequential() => {
                let sequence = parent_node.next_sequence;
                parent_node.next_sequence += 1;
                format!("{path}{sequence:010}")
            }
            Some(_) => {
                if tree.nodes.contains_key(path) {
                    return Err(CoordError::NodeExists {
                        path: path.to_string(),
                    });
                }
                path.to_string()
            }
        };

        tree.nodes.insert(
            actual.clone(),
            NodeState {
                data,
                version: 0,
                owner: mode.is_ephemeral().then_some(self.id),
                next_sequence: 0,
            },
        );
        tree.fire(WatchKind::Exists, &actual, EventKind::NodeCreated);
        tree.fire(WatchKind::Children, &parent, EventKind::ChildrenChanged);
        Ok(actual)
    }

    async fn exists(&self, path: &str) -> CoordResult<Option<Stat>> {
        let tree = lock(&self.tree);
        tree.check_session(self.id)?;
        Ok(tree.stat_of(path))
    }

    async fn exists_watch(&self, path: &str) -> CoordResult<(Option<Stat>, Watch)> {
        let mut tree = lock(&self.tree);
        tree.check_session(self.id)?;
        let stat = tree.stat_of(path);
        let watch = tree.register(WatchKind::Exists, path, self.id);
        Ok((stat, watch))
    }

    async fn get_data(&self, path: &str) -> CoordResult<Vec<u8>> {
        let tree = lock(&self.tree);
        tree.check_session(self.id)?;
        tree.nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordError::NoNode {
                path: path.to_string(),
            })
    }

    async fn get_data_watch(&self, path: &str) -> CoordResult<(Vec<u8>, Watch)> {
        let mut tree = lock(&self.tree);
        tree.check_session(self.id)?;
        let data = tree
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordError::NoNode {
                path: path.to_string(),
            })?;
        let watch = tree.register(WatchKind::Data, path, self.id);
        Ok((data, watch))
    }

    async fn get_children(&self, path: &str) -> CoordResult<Vec<String>> {
        let tree = lock(&self.tree);
        tree.check_session(self.id)?;
        if !tree.nodes.contains_key(path) {
            return Err(CoordError::NoNode {
                path: path.to_string(),
            });
        }
        Ok(tree.children_of(path))
    }

    async fn get_children_watch(&self, path: &str) -> CoordResult<(Vec<String>, Watch)> {
        let mut tree = lock(&self.tree);
        tree.check_session(self.id)?;
        if !tree.nodes.contains_key(path) {
            return Err(CoordError::NoNode {
                path: path.to_string(),
            });
        }
        let children = tree.children_of(path);
        let watch = tree.register(WatchKind::Children, path, self.id);
        Ok((children, watch))
    }

    async fn delete(&self, path: &str, version: i32) -> CoordResult<()> {
        let mut tree = lock(&self.tree);
        tree.check_session(self.id)?;
        let node = tree.nodes.get(path).ok_or_else(|| CoordError::NoNode {
            path: path.to_string(),
        })?;
        if version >= 0 && node.version != version {
            return Err(CoordError::BadVersion {
                path: path.to_string(),
                expected: version,
                actual: node.version,
            });
        }
        tree.remove_node(path);
        Ok(())
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
