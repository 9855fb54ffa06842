//! State Journal (component D, spec.md §4.5) and recovery.
//!
//! An append-only byte log that batches mutation records (`COMMIT`,
//! `ABORT`, `LOW_WATERMARK_ADVANCE`) and only acknowledges them once
//! durable. The engine (component E) must not release a client reply
//! until the record covering that reply's mutation has been acknowledged.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod record;
pub mod recovery;

mod journal;

pub use backend::{FailingBackend, FileBackend, InMemoryBackend, JournalBackend};
pub use journal::{DurabilityMode, JournalConfig, JournalError, StateJournal};
pub use record::JournalRecord;
pub use recovery::{RecoveryReport, Recoverer};
