//! `tso`: the Transaction Status Oracle facade.
//!
//! Wires the five components of spec.md §2 — timestamp oracle (A), commit
//! hash map (B), uncommitted set (C), state journal (D), and the
//! transaction state machine (E) — into a single owning aggregate. `Tso`
//! is the only public entry point; A-D are not reachable for direct
//! mutation from outside it, per spec.md §5.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use tso_concurrency::{FileRangeStore, InMemoryRangeStore, OracleError, RangeStore, TimestampOracle};
use tso_core::{CellHash, Timestamp, TsoConfig};
use tso_durability::{
    DurabilityMode, FileBackend, InMemoryBackend, JournalConfig, JournalError, Recoverer,
};
use tso_engine::{CommitOutcome, EngineError, TransactionEngine};
use tso_storage::{CommitHashMap, CommitMapConfig, UncommittedConfig, UncommittedSet};

pub use tso_core::CoreError;
pub use tso_durability::RecoveryReport;
pub use tso_engine::AbortReason;

/// Errors surfaced by the facade, unifying every component's error kinds
/// (spec.md §7) behind one type.
#[derive(Debug, Error)]
pub enum TsoError {
    /// A fatal or poisoned-state error from the transaction engine.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The timestamp oracle failed to reserve a durable range while
    /// opening or recovering.
    #[error(transparent)]
    Oracle(#[from] OracleError),
    /// The journal failed during open, replay, or shutdown.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// Filesystem error opening the data directory's backing files.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Where a [`Tso`] keeps its durable state.
enum Backing {
    InMemory,
    Disk(PathBuf),
}

/// The Transaction Status Oracle.
///
/// Owns one instance of every component (A-E) for the lifetime of a TSO
/// epoch. Construct with [`Tso::open`] for a disk-backed instance (with
/// recovery) or [`Tso::in_memory`] for tests and ephemeral instances.
pub struct Tso {
    config: TsoConfig,
    engine: TransactionEngine,
    oracle: Arc<TimestampOracle>,
    _backing: Backing,
}

impl Tso {
    /// Open (or create) a disk-backed TSO under `data_dir`, replaying any
    /// existing journal to rebuild B, C, and L before accepting requests
    /// (spec.md §4.5).
    pub fn open(data_dir: impl AsRef<Path>, config: TsoConfig) -> Result<Self, TsoError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let journal_path = data_dir.join("journal.log");
        let range_path = data_dir.join("oracle.range");

        let mut recovery_backend = FileBackend::open(&journal_path)?;
        let journal_bytes = {
            use tso_durability::JournalBackend;
            recovery_backend.read_all()?
        };

        let commit_map = Arc::new(CommitHashMap::new(
            CommitMapConfig {
                max_items: config.max_items,
            },
            Timestamp::new(0),
        ));
        let uncommitted = Arc::new(UncommittedSet::new(UncommittedConfig {
            max_commits: config.max_commits,
        }));
        let report = Recoverer::replay(&journal_bytes, &commit_map, &uncommitted)
            .map_err(|e| TsoError::Journal(JournalError::Unavailable(e.to_string())))?;
        tracing::info!(
            records_replayed = report.records_replayed,
            low_watermark = report.low_watermark.get(),
            highest_tc_seen = report.highest_tc_seen.get(),
            live_transactions = report.live_transactions,
            "recovered TSO state from journal"
        );

        let range_store: Arc<dyn RangeStore> = Arc::new(FileRangeStore::open(&range_path)?);
        let oracle = Arc::new(TimestampOracle::resume_above(
            range_store,
            config.range_size,
            report.highest_tc_seen.get(),
        )?);

        let journal = tso_durability::StateJournal::open(
            Box::new(FileBackend::open(&journal_path)?),
            JournalConfig {
                mode: DurabilityMode::Batched {
                    batch_size: config.batch_size,
                    flush_timeout: config.flush_timeout(),
                },
            },
        );

        let engine = TransactionEngine::new(oracle.clone(), commit_map, uncommitted, journal);
        Ok(Tso {
            config,
            engine,
            oracle,
            _backing: Backing::Disk(data_dir.to_path_buf()),
        })
    }

    /// Build an ephemeral, in-memory-only TSO (no recovery, nothing
    /// persisted past process exit). Intended for tests and short-lived
    /// embeddings.
    pub fn in_memory(config: TsoConfig) -> Result<Self, TsoError> {
        let range_store: Arc<dyn RangeStore> = Arc::new(InMemoryRangeStore::new());
        let oracle = Arc::new(TimestampOracle::open(range_store, config.range_size)?);
        let commit_map = Arc::new(CommitHashMap::new(
            CommitMapConfig {
                max_items: config.max_items,
            },
            Timestamp::new(0),
        ));
        let uncommitted = Arc::new(UncommittedSet::new(UncommittedConfig {
            max_commits: config.max_commits,
        }));
        let journal = tso_durability::StateJournal::open(
            Box::new(InMemoryBackend::new()),
            JournalConfig {
                mode: DurabilityMode::Batched {
                    batch_size: config.batch_size,
                    flush_timeout: config.flush_timeout(),
                },
            },
        );
        let engine = TransactionEngine::new(oracle.clone(), commit_map, uncommitted, journal);
        Ok(Tso {
            config,
            engine,
            oracle,
            _backing: Backing::InMemory,
        })
    }

    /// The configuration this instance was opened with.
    pub fn config(&self) -> &TsoConfig {
        &self.config
    }

    /// `begin` (spec.md §4.4.1).
    pub fn begin(&self) -> Result<Timestamp, TsoError> {
        Ok(self.engine.begin()?)
    }

    /// `commit(Ts, writeSet)` (spec.md §4.4.2).
    pub fn commit(
        &self,
        ts: Timestamp,
        write_set: &[CellHash],
    ) -> Result<CommitOutcome, TsoError> {
        Ok(self.engine.commit(ts, write_set)?)
    }

    /// `fullAbort(Ts)` (spec.md §4.4.3).
    pub fn full_abort(&self, ts: Timestamp) -> Result<(), TsoError> {
        Ok(self.engine.full_abort(ts)?)
    }

    /// The current low watermark L (spec.md §3, §4.4.4). Clients with
    /// `Ts` below this must fall back to the external commit table.
    pub fn watermark(&self) -> Timestamp {
        self.engine.low_watermark()
    }

    /// The oracle's current counter value, without advancing it.
    pub fn oracle_value(&self) -> Timestamp {
        self.oracle.get()
    }

    /// `true` once a fatal error has poisoned the engine; an embedding
    /// supervisor must start a new epoch (spec.md §7).
    pub fn is_poisoned(&self) -> bool {
        self.engine.is_poisoned()
    }
}

/// Install a `tracing` subscriber reading verbosity from `RUST_LOG`,
/// falling back to `info` if unset. Intended for binaries/tests embedding
/// the facade; the library itself never installs a global subscriber.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(v: u64) -> CellHash {
        CellHash::from_raw(v)
    }

    #[test]
    fn in_memory_begin_commit_round_trip() {
        let tso = Tso::in_memory(TsoConfig::default()).unwrap();
        let ts = tso.begin().unwrap();
        let outcome = tso.commit(ts, &[cell(1)]).unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed(_)));
    }

    #[test]
    fn disk_backed_tso_recovers_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let orig_ts;
        let tc;
        {
            let tso = Tso::open(dir.path(), TsoConfig::default()).unwrap();
            orig_ts = tso.begin().unwrap();
            match tso.commit(orig_ts, &[cell(1), cell(2)]).unwrap() {
                CommitOutcome::Committed(t) => tc = t,
                other => panic!("expected commit, got {other:?}"),
            }
        }
        {
            let tso = Tso::open(dir.path(), TsoConfig::default()).unwrap();
            assert!(tso.oracle_value() >= tc);
            // A stale retry at the original (pre-crash) Ts must still see
            // its conflicting commit entry in the recovered map, per
            // spec.md §8 invariant 7 (recovery equivalence).
            let outcome = tso.commit(orig_ts, &[cell(1)]).unwrap();
            assert_eq!(
                outcome,
                CommitOutcome::Aborted(AbortReason::ConflictDetected),
                "h1's recovered commit entry must still be visible to a conflicting writer"
            );
        }
    }
}
