//! TRELLIS coordination contract
//!
//! The hierarchical coordination service contract the TRELLIS recipes
//! consume: error taxonomy, create modes, one-shot watches, session
//! events, and an in-memory harness for tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod memory;
pub mod service;

pub use error::{CoordError, CoordResult};
pub use memory::{MemoryCluster, MemorySession};
pub use service::{
    CoordinationService, CreateMode, EventKind, SessionEvent, Stat, Watch, WatchedEvent,
    join_path, last_segment,
};
