//! FIFO distributed queue.
//!
//! Elements are persistent-sequential children of the queue root; the
//! service-assigned sequence number is the FIFO order. Nothing here holds
//! an in-process lock: between listing the children and taking the head,
//! any other consumer may get there first, so every read and delete
//! tolerates the node being gone and moves on to the next candidate.

use crate::error::RecipeResult;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use trellis_coord::{CoordError, CoordinationService, CreateMode, join_path};

/// Name prefix of every queue element node
const ELEMENT_PREFIX: &str = "qn-";

/// A FIFO queue shared through the coordination service.
///
/// Elements are durable: they survive the disconnection of whoever
/// enqueued them, and ownership passes to whichever consumer deletes
/// them first.
pub struct DistributedQueue {
    service: Arc<dyn CoordinationService>,
    dir: String,
}

impl DistributedQueue {
    /// Create a handle on the queue rooted at `dir`. The root node is
    /// created lazily on first use.
    #[must_use]
    pub fn new(service: Arc<dyn CoordinationService>, dir: impl Into<String>) -> Self {
        Self {
            service,
            dir: dir.into(),
        }
    }

    /// The queue root path
    #[must_use]
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Append an element.
    ///
    /// # Errors
    ///
    /// Surfaces service failures; a missing root is created on the fly
    /// and the append retried, so root-creation races are invisible.
    pub async fn enqueue(&self, data: &[u8]) -> RecipeResult<()> {
        loop {
            match self
                .service
                .create(
                    &join_path(&self.dir, ELEMENT_PREFIX),
                    data.to_vec(),
                    CreateMode::PersistentSequential,
                )
                .await
            {
                Ok(_) => return Ok(()),
                Err(CoordError::NoNode { .. }) => self.create_root().await?,
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Read the head element without removing it.
    ///
    /// # Errors
    ///
    /// Surfaces service failures; an empty queue is `Ok(None)`.
    pub async fn peek(&self) -> RecipeResult<Option<Vec<u8>>> {
        self.get_element(false).await
    }

    /// Remove and return the head element.
    ///
    /// # Errors
    ///
    /// Surfaces service failures; an empty queue is `Ok(None)`.
    pub async fn dequeue(&self) -> RecipeResult<Option<Vec<u8>>> {
        self.get_element(true).await
    }

    /// Remove and return the head element, waiting for one to appear.
    ///
    /// # Errors
    ///
    /// Surfaces service failures, including session expiry while waiting.
    pub async fn take(&self) -> RecipeResult<Vec<u8>> {
        loop {
            if let Some(data) = self.take_inner(None).await? {
                return Ok(data);
            }
        }
    }

    /// Like [`take`](Self::take), but gives up after `timeout`.
    /// A zero timeout polls once without blocking.
    ///
    /// # Errors
    ///
    /// Surfaces service failures; expiry of the timeout is `Ok(None)`.
    pub async fn try_take(&self, timeout: Duration) -> RecipeResult<Option<Vec<u8>>> {
        // an unrepresentable deadline means "wait forever"
        let deadline = Instant::now().checked_add(timeout);
        self.take_inner(deadline).await
    }

    async fn create_root(&self) -> RecipeResult<()> {
        match self
            .service
            .create(&self.dir, Vec::new(), CreateMode::Persistent)
            .await
        {
            Ok(_) => Ok(()),
            Err(CoordError::NodeExists { .. }) => {
                debug!(dir = %self.dir, "queue root created concurrently");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Map service-assigned sequence numbers to child names, ascending.
    /// Children that do not follow the element naming scheme are logged
    /// and skipped, never fatal.
    fn order(&self, children: Vec<String>) -> BTreeMap<u64, String> {
        let mut ordered = BTreeMap::new();
        for child in children {
            let Some(suffix) = child.strip_prefix(ELEMENT_PREFIX) else {
                warn!(dir = %self.dir, name = %child, "skipping child with unexpected name");
                continue;
            };
            match suffix.parse::<u64>() {
                Ok(key) => {
                    ordered.insert(key, child);
                }
                Err(_) => {
                    warn!(dir = %self.dir, name = %child, "skipping child with non-numeric suffix");
                }
            }
        }
        ordered
    }

    /// Race-tolerant scan of the ordered children: the first element
    /// whose read (and, when dequeuing, delete) wins is returned; losing
    /// either race moves on to the next candidate.
    async fn scan(
        &self,
        ordered: &BTreeMap<u64, String>,
        delete: bool,
    ) -> RecipeResult<Option<Vec<u8>>> {
        for name in ordered.values() {
            let path = join_path(&self.dir, name);
            let data = match self.service.get_data(&path).await {
                Ok(data) => data,
                Err(CoordError::NoNode { .. }) => {
                    debug!(%path, "element already taken by another consumer");
                    continue;
                }
                Err(error) => return Err(error.into()),
            };
            if delete {
                match self.service.delete(&path, -1).await {
                    Ok(()) => {}
                    Err(CoordError::NoNode { .. }) => {
                        debug!(%path, "element deleted from under us");
                        continue;
                    }
                    Err(error) => return Err(error.into()),
                }
            }
            return Ok(Some(data));
        }
        Ok(None)
    }

    async fn get_element(&self, delete: bool) -> RecipeResult<Option<Vec<u8>>> {
        let children = match self.service.get_children(&self.dir).await {
            Ok(children) => children,
            // the queue was never initialized, so it is empty
            Err(CoordError::NoNode { .. }) => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        self.scan(&self.order(children), delete).await
    }

    async fn take_inner(&self, deadline: Option<Instant>) -> RecipeResult<Option<Vec<u8>>> {
        loop {
            let (children, watch) = match self.service.get_children_watch(&self.dir).await {
                Ok(listing) => listing,
                Err(CoordError::NoNode { .. }) => {
                    self.create_root().await?;
                    continue;
                }
                Err(error) => return Err(error.into()),
            };
            let ordered = self.order(children);

            if ordered.is_empty() {
                match deadline {
                    None => {
                        watch.wait().await?;
                    }
                    Some(deadline) => {
                        if Instant::now() >= deadline {
                            return Ok(None);
                        }
                        match tokio::time::timeout_at(deadline, watch.wait()).await {
                            Ok(event) => {
                                event?;
                            }
                            Err(_) => return Ok(None),
                        }
                    }
                }
                continue;
            }

            if let Some(data) = self.scan(&ordered, true).await? {
                return Ok(Some(data));
            }
            // every candidate vanished between listing and scanning
        }
    }
}
