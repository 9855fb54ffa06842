//! In-memory transactional state storage: the commit hash map (component B)
//! and the uncommitted set (component C) of spec.md §2/§4.2/§4.3.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit_map;
pub mod uncommitted;

pub use commit_map::{CommitHashMap, CommitMapConfig, WriteStatus};
pub use uncommitted::{UncommittedConfig, UncommittedSet};
