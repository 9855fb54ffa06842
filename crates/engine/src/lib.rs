//! Transaction State Machine (component E, spec.md §4.4).
//!
//! Orchestrates `begin`/`commit`/`fullAbort` against the timestamp oracle
//! (A), commit hash map (B), uncommitted set (C), and state journal (D).
//! This is the only component that mutates more than one of A-D per
//! request, and the only one that decides commit vs. abort.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod state_machine;

pub use state_machine::{AbortReason, CommitOutcome, EngineError, TransactionEngine};
