//! Counting rendezvous barrier.
//!
//! A double barrier over a shared root node: `enter` parks the caller
//! until `size` participants have announced themselves, `leave` parks it
//! until every announcement is gone again. Announcements are ephemeral,
//! so a participant that dies mid-computation releases the others instead
//! of wedging them.

use crate::error::RecipeResult;
use std::sync::Arc;
use tracing::{debug, warn};
use trellis_coord::{CoordError, CoordinationService, CreateMode, join_path};

/// A symmetric double barrier for `size` participants.
///
/// Every participant holds its own `DoubleBarrier` on the same root and
/// calls `enter`, computes, then calls `leave`. The two phases are
/// independent rendezvous: all must arrive before any proceeds, and all
/// must depart before any returns from `leave`.
pub struct DoubleBarrier {
    service: Arc<dyn CoordinationService>,
    root: String,
    size: usize,
    node_path: String,
}

impl DoubleBarrier {
    /// Create a participant handle with a random announcement name.
    ///
    /// The barrier root is created here if missing; failures are logged
    /// and deferred to `enter`, where they resurface with context.
    pub async fn new(
        service: Arc<dyn CoordinationService>,
        root: impl Into<String>,
        size: usize,
    ) -> Self {
        Self::with_node_name(service, root, size, uuid::Uuid::new_v4().to_string()).await
    }

    /// Like [`new`](Self::new), but with a caller-chosen announcement
    /// name. Names must be distinct across participants.
    pub async fn with_node_name(
        service: Arc<dyn CoordinationService>,
        root: impl Into<String>,
        size: usize,
        node_name: impl Into<String>,
    ) -> Self {
        let root = root.into();
        match service
            .create(&root, Vec::new(), CreateMode::Persistent)
            .await
        {
            Ok(_) => {}
            Err(CoordError::NodeExists { .. }) => {
                debug!(%root, "barrier root already present");
            }
            Err(error) => {
                warn!(%root, %error, "could not create barrier root");
            }
        }
        let node_path = join_path(&root, &node_name.into());
        Self {
            service,
            root,
            size,
            node_path,
        }
    }

    /// The barrier root path
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Number of participants the barrier waits for
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Announce this participant and wait until `size` have announced.
    ///
    /// # Errors
    ///
    /// Surfaces service failures, including session expiry while parked.
    pub async fn enter(&self) -> RecipeResult<bool> {
        match self
            .service
            .create(&self.node_path, Vec::new(), CreateMode::Ephemeral)
            .await
        {
            Ok(_) => {}
            // already entered, fall through to the wait
            Err(CoordError::NodeExists { .. }) => {
                debug!(path = %self.node_path, "announcement already present");
            }
            Err(error) => return Err(error.into()),
        }
        loop {
            let (children, watch) = self.service.get_children_watch(&self.root).await?;
            if children.len() >= self.size {
                debug!(root = %self.root, arrived = children.len(), "barrier entered");
                return Ok(true);
            }
            watch.wait().await?;
        }
    }

    /// Withdraw this participant's announcement and wait until every
    /// announcement is gone.
    ///
    /// # Errors
    ///
    /// Surfaces service failures, including session expiry while parked.
    pub async fn leave(&self) -> RecipeResult<bool> {
        match self.service.delete(&self.node_path, -1).await {
            Ok(()) => {}
            // expired session or double leave already removed it
            Err(CoordError::NoNode { .. }) => {
                debug!(path = %self.node_path, "announcement already gone");
            }
            Err(error) => return Err(error.into()),
        }
        loop {
            let (children, watch) = self.service.get_children_watch(&self.root).await?;
            if children.is_empty() {
                debug!(root = %self.root, "barrier left");
                return Ok(true);
            }
            watch.wait().await?;
        }
    }
}
