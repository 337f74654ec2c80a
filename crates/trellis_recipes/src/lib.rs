//! Distributed-coordination recipes.
//!
//! Leader election, a FIFO distributed queue, and a counting rendezvous
//! barrier, all built against the [`trellis_coord`] service contract.
//! The recipes share one retry discipline ([`RetryPolicy`]) and one
//! ranking scheme for sequential node names ([`SequencedName`]).
//!
//! Nothing in this crate holds an in-process lock across service calls:
//! correctness comes from the service's atomic create/delete and from
//! tolerating every race those atomics leave open.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod barrier;
pub mod election;
pub mod error;
pub mod queue;
pub mod retry;
pub mod sequence;

pub use barrier::DoubleBarrier;
pub use election::{ElectionConfig, ElectionState, LeaderElection, LeadershipWatcher};
pub use error::{RecipeError, RecipeResult};
pub use queue::DistributedQueue;
pub use retry::{RetryClass, RetryPolicy};
pub use sequence::SequencedName;
