//! Retry discipline shared by every recipe.
//!
//! Transient coordination faults are retried with linear backoff up to a
//! fixed attempt budget; session-fatal faults are never retried, because
//! every ephemeral node the session owned is already gone and blindly
//! re-running the operation cannot be correct.

use crate::error::RecipeError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use trellis_coord::{CoordError, CoordResult, CoordinationService, CreateMode};

/// Classification seam the retry loop uses to decide what to do with a
/// failure. Anything neither transient nor session-fatal is a protocol
/// answer (`NoNode`, `NodeExists`, ...) and propagates immediately.
pub trait RetryClass {
    /// Worth retrying after a delay
    fn is_transient(&self) -> bool;
    /// The session is gone; retrying cannot help
    fn is_session_fatal(&self) -> bool;
}

impl RetryClass for CoordError {
    fn is_transient(&self) -> bool {
        CoordError::is_transient(self)
    }

    fn is_session_fatal(&self) -> bool {
        CoordError::is_session_fatal(self)
    }
}

impl RetryClass for RecipeError {
    fn is_transient(&self) -> bool {
        matches!(self, RecipeError::Service(error) if error.is_transient())
    }

    fn is_session_fatal(&self) -> bool {
        matches!(self, RecipeError::Service(error) if error.is_session_fatal())
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempt budget, including the first try
    pub attempts: u32,
    /// Backoff unit; the n-th retry waits `n * base_delay`, the first
    /// retry runs immediately
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with the default budget
    #[must_use]
    pub fn new() -> Self {
        Self {
            attempts: 10,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Set the attempt budget
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the backoff unit
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Run `op`, retrying transient failures with linear backoff.
    ///
    /// # Errors
    ///
    /// Session-fatal failures and protocol answers propagate on the spot;
    /// a transient failure surfaces once the attempt budget is exhausted,
    /// and the error returned is the last one observed.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        E: RetryClass + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts.max(1);
        let mut failures = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_session_fatal() => {
                    warn!(%error, "session is gone, not retrying");
                    return Err(error);
                }
                Err(error) if error.is_transient() => {
                    failures += 1;
                    if failures >= attempts {
                        warn!(%error, attempts, "attempt budget exhausted");
                        return Err(error);
                    }
                    let delay = self.base_delay * (failures - 1);
                    debug!(%error, attempt = failures, ?delay, "transient failure, retrying");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Ensure every segment of `path` exists as an empty persistent node.
    ///
    /// # Errors
    ///
    /// Surfaces whatever the retried per-segment steps surface; losing a
    /// create race is success, not an error.
    pub async fn ensure_path_exists(
        &self,
        service: &dyn CoordinationService,
        path: &str,
    ) -> CoordResult<()> {
        self.ensure_exists(service, path, &[], CreateMode::Persistent)
            .await
    }

    /// Ensure `path` exists, creating missing segments from the root down.
    /// Only the leaf receives `data` and `mode`; intermediate segments are
    /// created empty and persistent. Idempotent under repeated calls and
    /// concurrent callers.
    ///
    /// # Errors
    ///
    /// Surfaces whatever the retried per-segment steps surface.
    pub async fn ensure_exists(
        &self,
        service: &dyn CoordinationService,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> CoordResult<()> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut partial = String::with_capacity(path.len());
        for (index, segment) in segments.iter().enumerate() {
            partial.push('/');
            partial.push_str(segment);
            let leaf = index + 1 == segments.len();
            let current = partial.clone();
            self.run(|| async {
                if service.exists(&current).await?.is_some() {
                    return Ok(());
                }
                let (payload, create_mode) = if leaf {
                    (data.to_vec(), mode)
                } else {
                    (Vec::new(), CreateMode::Persistent)
                };
                match service.create(&current, payload, create_mode).await {
                    Ok(_) => Ok(()),
                    Err(error) if error.is_node_exists() => {
                        debug!(path = %current, "lost the create race, node already there");
                        Ok(())
                    }
                    Err(error) => Err(error),
                }
            })
            .await?;
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
