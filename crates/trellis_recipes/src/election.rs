//! Mutual leader election.
//!
//! Every candidate creates one ephemeral-sequential node under the
//! election root and watches the single candidate ordered directly
//! before it. The minimum of the total order is the leader; when a
//! predecessor disappears, the awakened candidate re-runs the full
//! ranking step before claiming anything, so a stale notification can
//! never promote a non-minimal candidate.

use crate::error::{RecipeError, RecipeResult};
use crate::retry::RetryPolicy;
use crate::sequence::SequencedName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trellis_coord::{CoordinationService, CreateMode, Watch, join_path, last_segment};

/// Receives the leadership hand-off.
///
/// Called at most once per leadership acquisition, on the task that
/// observed the acquisition; implementations should return quickly.
pub trait LeadershipWatcher: Send + Sync {
    /// This process is now the leader.
    fn take_leadership(&self);
}

impl<F> LeadershipWatcher for F
where
    F: Fn() + Send + Sync,
{
    fn take_leadership(&self) {
        self()
    }
}

/// Election configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Election root path
    pub path: String,
    /// Payload stored on the candidacy node
    pub data: Vec<u8>,
    /// Retry policy for the candidacy protocol
    pub retry: RetryPolicy,
}

impl ElectionConfig {
    /// Create a config for the given election root
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            data: Vec::new(),
            retry: RetryPolicy::new(),
        }
    }

    /// Set the candidacy node payload
    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Election lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionState {
    /// `start()` has not been called
    NotStarted,
    /// Candidacy registered, waiting on a predecessor
    Running,
    /// This candidate holds leadership
    Leading,
    /// `close()` was called; terminal
    Closed,
}

/// Outcome of one candidacy step
enum Campaign {
    Elected,
    Watching(Watch),
}

struct Inner {
    service: Arc<dyn CoordinationService>,
    config: ElectionConfig,
    watcher: Arc<dyn LeadershipWatcher>,
    state: RwLock<ElectionState>,
    is_owner: AtomicBool,
    /// Bare name of this candidate's node under the election root
    id: RwLock<Option<String>>,
}

impl Inner {
    fn candidacy_prefix(&self) -> String {
        format!("election-{}-", self.service.session_id())
    }

    /// Find or create this session's candidacy node. Reuse before create
    /// keeps a retried step from registering the candidate twice.
    async fn acquire_candidacy(&self) -> RecipeResult<String> {
        if let Some(name) = self.id.read().await.clone() {
            return Ok(name);
        }
        let prefix = self.candidacy_prefix();
        let children = self.service.get_children(&self.config.path).await?;
        let name = match children.into_iter().find(|child| child.starts_with(&prefix)) {
            Some(name) => {
                debug!(%name, "reusing candidacy node from an earlier attempt");
                name
            }
            None => {
                let created = self
                    .service
                    .create(
                        &join_path(&self.config.path, &prefix),
                        self.config.data.clone(),
                        CreateMode::EphemeralSequential,
                    )
                    .await?;
                debug!(node = %created, "created candidacy node");
                last_segment(&created).to_string()
            }
        };
        *self.id.write().await = Some(name.clone());
        Ok(name)
    }

    /// One candidacy step: rank all candidates, then either take
    /// leadership or watch the immediate predecessor.
    async fn run_for_leader(&self) -> RecipeResult<Campaign> {
        let name = self.acquire_candidacy().await?;
        let me = SequencedName::parse(&name)?;

        let children = self.service.get_children(&self.config.path).await?;
        let mut ranked = BTreeSet::new();
        for child in children {
            ranked.insert(SequencedName::parse(&child)?);
        }

        // Priors are the candidates ordered at or before this one. The
        // listing must contain at least our own node; anything less means
        // the candidacy is gone and the protocol cannot continue.
        let priors = ranked.range(..=me.clone()).count();
        if priors == 0 {
            return Err(RecipeError::ProtocolViolation {
                reason: format!("candidacy node {name} missing from election listing"),
            });
        }
        if priors == 1 {
            self.promote().await;
            return Ok(Campaign::Elected);
        }

        // Watch only the candidate directly before us, never the whole
        // set: one watch per candidate regardless of cluster size.
        let predecessor = match ranked.range(..me.clone()).next_back() {
            Some(predecessor) => predecessor.clone(),
            None => {
                return Err(RecipeError::ProtocolViolation {
                    reason: format!("no predecessor for {name} despite {priors} priors"),
                });
            }
        };
        let watch_path = join_path(&self.config.path, predecessor.name());
        let (stat, watch) = self.service.exists_watch(&watch_path).await?;
        if stat.is_none() {
            // it vanished between the listing and the watch registration
            self.promote().await;
            return Ok(Campaign::Elected);
        }
        debug!(candidate = %me, predecessor = %predecessor, "watching predecessor");
        Ok(Campaign::Watching(watch))
    }

    async fn promote(&self) {
        if !self.is_owner.swap(true, Ordering::SeqCst) {
            *self.state.write().await = ElectionState::Leading;
            info!(path = %self.config.path, "took leadership");
            self.watcher.take_leadership();
        }
    }
}

/// One candidate in a mutual leader election.
pub struct LeaderElection {
    inner: Arc<Inner>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderElection {
    /// Create a candidate. Nothing touches the service until `start()`.
    #[must_use]
    pub fn new(
        service: Arc<dyn CoordinationService>,
        config: ElectionConfig,
        watcher: Arc<dyn LeadershipWatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                config,
                watcher,
                state: RwLock::new(ElectionState::NotStarted),
                is_owner: AtomicBool::new(false),
                id: RwLock::new(None),
            }),
            watch_task: Mutex::new(None),
        }
    }

    /// Whether this candidate currently holds leadership
    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.inner.is_owner.load(Ordering::SeqCst)
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ElectionState {
        *self.inner.state.read().await
    }

    /// Enter the election.
    ///
    /// Returns `Ok(true)` if this candidate took leadership immediately,
    /// `Ok(false)` if it is waiting on its predecessor; in the latter
    /// case the hand-off is driven by a background watch and reported
    /// through the [`LeadershipWatcher`].
    ///
    /// # Errors
    ///
    /// Fails on exhausted retries, session expiry, a protocol violation,
    /// or when called in any state but `NotStarted`.
    pub async fn start(&self) -> RecipeResult<bool> {
        {
            let mut state = self.inner.state.write().await;
            if *state != ElectionState::NotStarted {
                return Err(RecipeError::InvalidState {
                    reason: format!("start() called in state {:?}", *state),
                });
            }
            *state = ElectionState::Running;
        }

        let inner = &self.inner;
        inner
            .config
            .retry
            .ensure_path_exists(inner.service.as_ref(), &inner.config.path)
            .await?;

        match inner.config.retry.run(|| inner.run_for_leader()).await? {
            Campaign::Elected => Ok(true),
            Campaign::Watching(watch) => {
                let task = tokio::spawn(Self::watch_predecessor(Arc::clone(inner), watch));
                *self.watch_task.lock().await = Some(task);
                Ok(false)
            }
        }
    }

    async fn watch_predecessor(inner: Arc<Inner>, mut watch: Watch) {
        loop {
            let event = match watch.wait().await {
                Ok(event) => event,
                Err(error) => {
                    warn!(%error, "predecessor watch lost, abandoning candidacy");
                    return;
                }
            };
            if *inner.state.read().await == ElectionState::Closed {
                return;
            }
            debug!(?event, "predecessor changed, re-ranking");
            // Re-run the full ranking step rather than assuming the
            // deletion made this candidate the minimum.
            match inner.config.retry.run(|| inner.run_for_leader()).await {
                Ok(Campaign::Elected) => return,
                Ok(Campaign::Watching(next)) => watch = next,
                Err(error) => {
                    warn!(%error, "re-ranking after predecessor change failed");
                    return;
                }
            }
        }
    }

    /// Leave the election: clears ownership, stops the predecessor watch,
    /// and deletes the candidacy node. Not retried; the service reclaims
    /// the ephemeral node on session death anyway. Idempotent.
    ///
    /// # Errors
    ///
    /// Surfaces a delete failure other than the node already being gone.
    pub async fn close(&self) -> RecipeResult<()> {
        {
            let mut state = self.inner.state.write().await;
            if *state == ElectionState::Closed {
                return Ok(());
            }
            *state = ElectionState::Closed;
        }
        self.inner.is_owner.store(false, Ordering::SeqCst);
        if let Some(task) = self.watch_task.lock().await.take() {
            task.abort();
        }
        if let Some(name) = self.inner.id.write().await.take() {
            let node = join_path(&self.inner.config.path, &name);
            match self.inner.service.delete(&node, -1).await {
                Ok(()) => {}
                Err(error) if error.is_no_node() => {
                    debug!(%node, "candidacy node already gone");
                }
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use trellis_coord::{MemoryCluster, MemorySession};

    const ROOT: &str = "/election";

    fn candidate(
        session: MemorySession,
        label: u32,
        tx: mpsc::UnboundedSender<u32>,
    ) -> LeaderElection {
        let watcher = Arc::new(move || {
            let _ = tx.send(label);
        });
        LeaderElection::new(Arc::new(session), ElectionConfig::new(ROOT), watcher)
    }

    #[tokio::test]
    async fn test_sole_candidate_is_elected_immediately() {
        let cluster = MemoryCluster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let election = candidate(cluster.session(), 1, tx);

        assert!(election.start().await.unwrap());
        assert!(election.is_owner());
        assert_eq!(election.state().await, ElectionState::Leading);
        assert_eq!(rx.try_recv(), Ok(1));
        assert!(rx.try_recv().is_err()); // callback fired exactly once
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let cluster = MemoryCluster::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let election = candidate(cluster.session(), 1, tx);

        election.start().await.unwrap();
        assert!(matches!(
            election.start().await,
            Err(RecipeError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_exactly_one_initial_leader() {
        let cluster = MemoryCluster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = candidate(cluster.session(), 1, tx.clone());
        let second = candidate(cluster.session(), 2, tx.clone());
        let third = candidate(cluster.session(), 3, tx);

        assert!(first.start().await.unwrap());
        assert!(!second.start().await.unwrap());
        assert!(!third.start().await.unwrap());

        assert!(first.is_owner());
        assert!(!second.is_owner());
        assert!(!third.is_owner());
        assert_eq!(rx.try_recv(), Ok(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leadership_hands_off_down_the_chain() {
        let cluster = MemoryCluster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = candidate(cluster.session(), 1, tx.clone());
        let second = candidate(cluster.session(), 2, tx.clone());
        let third = candidate(cluster.session(), 3, tx);

        first.start().await.unwrap();
        second.start().await.unwrap();
        third.start().await.unwrap();
        assert_eq!(rx.recv().await, Some(1));

        first.close().await.unwrap();
        assert_eq!(timeout(Duration::from_secs(5), rx.recv()).await.unwrap(), Some(2));
        assert!(second.is_owner());
        assert_eq!(second.state().await, ElectionState::Leading);
        assert!(!third.is_owner());

        second.close().await.unwrap();
        assert_eq!(timeout(Duration::from_secs(5), rx.recv()).await.unwrap(), Some(3));
        assert!(third.is_owner());
    }

    #[tokio::test]
    async fn test_session_death_hands_off_like_close() {
        let cluster = MemoryCluster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let leader_session = cluster.session();
        let first = candidate(leader_session.clone(), 1, tx.clone());
        let second = candidate(cluster.session(), 2, tx);

        first.start().await.unwrap();
        second.start().await.unwrap();
        assert_eq!(rx.recv().await, Some(1));

        // the service reclaims the ephemeral candidacy node
        leader_session.close();

        assert_eq!(timeout(Duration::from_secs(5), rx.recv()).await.unwrap(), Some(2));
        assert!(second.is_owner());
    }

    #[tokio::test]
    async fn test_candidacy_node_is_reused_not_duplicated() {
        let cluster = MemoryCluster::new();
        let session = cluster.session();
        session
            .create(ROOT, Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        // a candidacy node left over from an interrupted earlier attempt
        session
            .create(
                &format!("{ROOT}/election-{}-", session.session_id()),
                Vec::new(),
                CreateMode::EphemeralSequential,
            )
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let election = candidate(session.clone(), 1, tx);

        assert!(election.start().await.unwrap());
        assert_eq!(session.get_children(ROOT).await.unwrap().len(), 1);
        assert_eq!(rx.try_recv(), Ok(1));
    }

    #[tokio::test]
    async fn test_close_removes_the_candidacy_node() {
        let cluster = MemoryCluster::new();
        let session = cluster.session();
        let (tx, _rx) = mpsc::unbounded_channel();
        let election = candidate(session.clone(), 1, tx);

        election.start().await.unwrap();
        assert_eq!(session.get_children(ROOT).await.unwrap().len(), 1);

        election.close().await.unwrap();
        assert!(!election.is_owner());
        assert_eq!(election.state().await, ElectionState::Closed);
        assert!(session.get_children(ROOT).await.unwrap().is_empty());

        election.close().await.unwrap(); // idempotent
    }

    #[tokio::test]
    async fn test_vanished_candidacy_is_never_promoted() {
        let cluster = MemoryCluster::new();
        let admin = cluster.session();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = candidate(cluster.session(), 1, tx.clone());
        let second = candidate(cluster.session(), 2, tx);
        first.start().await.unwrap();
        second.start().await.unwrap();
        assert_eq!(rx.recv().await, Some(1));

        // wipe both candidacy nodes; deleting the leader's node fires the
        // second candidate's predecessor watch, but its own node is gone
        // too, so re-ranking must refuse to promote it
        let mut names = admin.get_children(ROOT).await.unwrap();
        names.sort();
        for name in names.iter().rev() {
            admin.delete(&join_path(ROOT, name), -1).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second.is_owner());
        assert!(rx.try_recv().is_err());
    }
}
