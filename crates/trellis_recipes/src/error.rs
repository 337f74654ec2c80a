//! Recipe-level errors.

use trellis_coord::CoordError;

/// Result type for recipe operations
pub type RecipeResult<T> = Result<T, RecipeError>;

/// Errors surfaced by the recipes.
///
/// Not-found outcomes (empty queue) are **not** errors; the queue surfaces
/// them as `Ok(None)`. Benign races (`NoNode` on an expected-present node,
/// `NodeExists` on an expected-absent one) are swallowed at the call sites
/// that expect them and never reach callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecipeError {
    /// The coordination service failed
    #[error(transparent)]
    Service(#[from] CoordError),

    /// A node name that must parse did not (empty name)
    #[error("invalid node name: {name:?}")]
    InvalidNodeName {
        /// The offending name
        name: String,
    },

    /// The election observed state it can never legally observe
    #[error("election protocol violation: {reason}")]
    ProtocolViolation {
        /// What was observed
        reason: String,
    },

    /// The operation is not valid in the recipe's current state
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Why the operation was rejected
        reason: String,
    },
}
