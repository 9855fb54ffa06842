//! The begin/commit/fullAbort protocol itself (spec.md §4.4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use tso_concurrency::{OracleError, TimestampOracle};
use tso_core::{CellHash, Timestamp};
use tso_durability::{JournalError, JournalRecord, StateJournal};
use tso_storage::{CommitHashMap, UncommittedSet, WriteStatus};

/// Why a commit was aborted (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A later-ordered commit already touched one of this transaction's
    /// cells (step 2 of spec.md §4.4.2).
    ConflictDetected,
    /// `Ts` was already below the low watermark when commit was attempted;
    /// conflict checks against evicted entries cannot be trusted.
    StaleTransaction,
}

/// The outcome of a commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The transaction committed at this `Tc`.
    Committed(Timestamp),
    /// The transaction was aborted, half-aborted in B until a matching
    /// `full_abort` call (or eviction) clears the tag.
    Aborted(AbortReason),
}

/// Fatal engine errors (spec.md §7): both stop the engine from releasing
/// any further reply and require a supervisor to start a new epoch.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The state journal could not persist a record.
    #[error("journal unavailable: {0}")]
    JournalUnavailable(#[from] JournalError),
    /// The timestamp oracle could not reserve a new range.
    #[error("oracle range reservation failed: {0}")]
    OracleRangeFailure(#[from] OracleError),
    /// A fatal error already occurred; the engine is refusing further work
    /// until a supervisor restarts it in a new epoch.
    #[error("engine is poisoned by a prior fatal error")]
    Poisoned,
}

/// Orchestrates A-D into the begin/commit/fullAbort protocol.
///
/// `commit_lock` linearizes the critical section spanning the oracle's
/// `next()` call and the commit hash map write, per the tie-break note in
/// spec.md §4.4.1: two commits with overlapping write sets must observe a
/// single total order between allocating `Tc` and writing B.
pub struct TransactionEngine {
    oracle: Arc<TimestampOracle>,
    commit_map: Arc<CommitHashMap>,
    uncommitted: Arc<UncommittedSet>,
    journal: Arc<StateJournal>,
    commit_lock: Mutex<()>,
    poisoned: AtomicBool,
}

impl TransactionEngine {
    /// Wire the four durable/in-memory components into one engine.
    pub fn new(
        oracle: Arc<TimestampOracle>,
        commit_map: Arc<CommitHashMap>,
        uncommitted: Arc<UncommittedSet>,
        journal: Arc<StateJournal>,
    ) -> Self {
        TransactionEngine {
            oracle,
            commit_map,
            uncommitted,
            journal,
            commit_lock: Mutex::new(()),
            poisoned: AtomicBool::new(false),
        }
    }

    /// The engine's current view of the low watermark (spec.md §4.4.4):
    /// clients whose `Ts` is below this must fall back to the external
    /// commit table.
    pub fn low_watermark(&self) -> Timestamp {
        self.commit_map.low_watermark()
    }

    /// `true` once a fatal journal or oracle error has occurred and no
    /// further replies will be released (spec.md §7, scenario S5).
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    fn check_not_poisoned(&self) -> Result<(), EngineError> {
        if self.poisoned.load(Ordering::SeqCst) {
            Err(EngineError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }

    /// `begin` (spec.md §4.4.1): allocate `Ts`, mark it live in C, persist
    /// a `BEGIN` record, and only then reply.
    pub fn begin(&self) -> Result<Timestamp, EngineError> {
        self.check_not_poisoned()?;
        let ts = self.oracle.next().map_err(|e| {
            tracing::error!(error = %e, "oracle range reservation failed during begin, poisoning engine");
            self.poison();
            EngineError::OracleRangeFailure(e)
        })?;
        self.uncommitted.start(ts);
        self.journal
            .add_record(JournalRecord::Begin { ts })
            .map_err(|e| {
                tracing::error!(ts = ts.get(), error = %e, "journal unavailable during begin, poisoning engine");
                self.poison();
                EngineError::JournalUnavailable(e)
            })?;
        tracing::debug!(ts = ts.get(), "begin");
        Ok(ts)
    }

    /// `commit(Ts, writeSet)` (spec.md §4.4.2).
    pub fn commit(
        &self,
        ts: Timestamp,
        write_set: &[CellHash],
    ) -> Result<CommitOutcome, EngineError> {
        self.check_not_poisoned()?;
        let _guard = self.commit_lock.lock();

        let watermark = self.commit_map.low_watermark();
        if ts < watermark {
            tracing::debug!(ts = ts.get(), watermark = watermark.get(), "commit aborted: stale transaction");
            return self.abort(ts, write_set, AbortReason::StaleTransaction);
        }

        let conflict = write_set.iter().any(|&cell| {
            match self.commit_map.get_latest_write(cell) {
                WriteStatus::Clear => false,
                WriteStatus::Committed(prev) => prev > ts,
                WriteStatus::HalfAborted => true,
            }
        });
        if conflict {
            tracing::debug!(ts = ts.get(), "commit aborted: conflict detected");
            return self.abort(ts, write_set, AbortReason::ConflictDetected);
        }

        let tc = self.oracle.next().map_err(|e| {
            tracing::error!(ts = ts.get(), error = %e, "oracle range reservation failed during commit, poisoning engine");
            self.poison();
            EngineError::OracleRangeFailure(e)
        })?;
        self.commit_map.set_committed_timestamp(ts, tc, write_set);
        self.uncommitted.committed(ts);
        self.journal
            .add_record(JournalRecord::Commit {
                ts,
                tc,
                write_set: write_set.to_vec(),
            })
            .map_err(|e| {
                tracing::error!(ts = ts.get(), tc = tc.get(), error = %e, "journal unavailable during commit, poisoning engine");
                self.poison();
                EngineError::JournalUnavailable(e)
            })?;
        tracing::debug!(ts = ts.get(), tc = tc.get(), "commit");

        let new_watermark = self.commit_map.low_watermark();
        if new_watermark > watermark {
            self.journal
                .add_record(JournalRecord::LowWatermarkAdvance {
                    watermark: new_watermark,
                })
                .map_err(|e| {
                    tracing::error!(watermark = new_watermark.get(), error = %e, "journal unavailable while checkpointing low watermark, poisoning engine");
                    self.poison();
                    EngineError::JournalUnavailable(e)
                })?;
            tracing::debug!(watermark = new_watermark.get(), "low watermark checkpoint");
        }

        Ok(CommitOutcome::Committed(tc))
    }

    fn abort(
        &self,
        ts: Timestamp,
        write_set: &[CellHash],
        reason: AbortReason,
    ) -> Result<CommitOutcome, EngineError> {
        self.commit_map.set_half_aborted(ts, write_set);
        self.uncommitted.abort(ts);
        self.journal
            .add_record(JournalRecord::Abort { ts })
            .map_err(|e| {
                tracing::error!(ts = ts.get(), error = %e, "journal unavailable during abort, poisoning engine");
                self.poison();
                EngineError::JournalUnavailable(e)
            })?;
        tracing::debug!(ts = ts.get(), ?reason, "abort");
        Ok(CommitOutcome::Aborted(reason))
    }

    /// `fullAbort(Ts)` (spec.md §4.4.3). Idempotent; no journal record is
    /// required since the half-abort is already durable.
    pub fn full_abort(&self, ts: Timestamp) -> Result<(), EngineError> {
        self.check_not_poisoned()?;
        self.commit_map.set_full_aborted(ts);
        tracing::debug!(ts = ts.get(), "full_abort");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tso_concurrency::range_store::InMemoryRangeStore;
    use tso_durability::{DurabilityMode, InMemoryBackend, JournalConfig};
    use tso_storage::{CommitMapConfig, UncommittedConfig};

    fn cell(v: u64) -> CellHash {
        CellHash::from_raw(v)
    }

    fn engine() -> TransactionEngine {
        let oracle = Arc::new(TimestampOracle::open(Arc::new(InMemoryRangeStore::new()), 1_000).unwrap());
        let commit_map = Arc::new(CommitHashMap::new(
            CommitMapConfig { max_items: 100 },
            Timestamp::new(0),
        ));
        let uncommitted = Arc::new(UncommittedSet::new(UncommittedConfig { max_commits: 100 }));
        let journal = StateJournal::open(
            Box::new(InMemoryBackend::new()),
            JournalConfig {
                mode: DurabilityMode::None,
            },
        );
        TransactionEngine::new(oracle, commit_map, uncommitted, journal)
    }

    #[test]
    fn clean_commit_is_visible_in_b() {
        // S1 - clean commit.
        let engine = engine();
        let ts = engine.begin().unwrap();
        let outcome = engine.commit(ts, &[cell(1), cell(2)]).unwrap();
        assert_eq!(outcome, CommitOutcome::Committed(Timestamp::new(ts.get() + 1)));
    }

    #[test]
    fn later_tc_blocks_earlier_conflicting_commit() {
        // S2 - write-write conflict.
        let engine = engine();
        let ts7 = engine.begin().unwrap();
        let ts8 = engine.begin().unwrap();
        let outcome8 = engine.commit(ts8, &[cell(1)]).unwrap();
        assert!(matches!(outcome8, CommitOutcome::Committed(_)));
        let outcome7 = engine.commit(ts7, &[cell(1)]).unwrap();
        assert_eq!(
            outcome7,
            CommitOutcome::Aborted(AbortReason::ConflictDetected)
        );
    }

    #[test]
    fn stale_transaction_after_eviction() {
        // S3 - capacity 1, third commit observes Ts < L.
        let oracle = Arc::new(TimestampOracle::open(Arc::new(InMemoryRangeStore::new()), 1_000).unwrap());
        let commit_map = Arc::new(CommitHashMap::new(
            CommitMapConfig { max_items: 1 },
            Timestamp::new(0),
        ));
        let uncommitted = Arc::new(UncommittedSet::new(UncommittedConfig { max_commits: 100 }));
        let journal = StateJournal::open(
            Box::new(InMemoryBackend::new()),
            JournalConfig {
                mode: DurabilityMode::None,
            },
        );
        let engine = TransactionEngine::new(oracle, commit_map, uncommitted, journal);

        let ts5 = engine.begin().unwrap();
        engine.commit(ts5, &[cell(1)]).unwrap();
        let ts7 = engine.begin().unwrap();
        engine.commit(ts7, &[cell(2)]).unwrap(); // evicts cell(1), advances L

        let outcome = engine.commit(ts5, &[cell(3)]).unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Aborted(AbortReason::StaleTransaction)
        );
    }

    #[test]
    fn half_abort_blocks_until_full_abort_then_commits() {
        // S4 - half/full abort sequence. ts_a starts before ts_b but ts_b's
        // commit lands a higher Tc on the shared cell first, so ts_a's
        // later commit attempt conflicts and is half-aborted.
        let engine = engine();
        let ts_a = engine.begin().unwrap();
        let ts_b = engine.begin().unwrap();
        let outcome_b = engine.commit(ts_b, &[cell(4)]).unwrap();
        assert!(matches!(outcome_b, CommitOutcome::Committed(_)));

        let outcome_a = engine.commit(ts_a, &[cell(4)]).unwrap();
        assert_eq!(
            outcome_a,
            CommitOutcome::Aborted(AbortReason::ConflictDetected)
        );

        let ts_c = engine.begin().unwrap();
        let outcome_c = engine.commit(ts_c, &[cell(4)]).unwrap();
        assert_eq!(
            outcome_c,
            CommitOutcome::Aborted(AbortReason::ConflictDetected),
            "half-abort entry must block until fullAbort clears it"
        );

        engine.full_abort(ts_a).unwrap();

        let ts_d = engine.begin().unwrap();
        let outcome_d = engine.commit(ts_d, &[cell(4)]).unwrap();
        assert!(matches!(outcome_d, CommitOutcome::Committed(_)));
    }

    #[test]
    fn poisoned_engine_rejects_further_work() {
        // S5 - journal fail-fast.
        let oracle = Arc::new(TimestampOracle::open(Arc::new(InMemoryRangeStore::new()), 1_000).unwrap());
        let commit_map = Arc::new(CommitHashMap::new(
            CommitMapConfig { max_items: 100 },
            Timestamp::new(0),
        ));
        let uncommitted = Arc::new(UncommittedSet::new(UncommittedConfig { max_commits: 100 }));
        let journal = StateJournal::open(
            Box::new(tso_durability::FailingBackend),
            JournalConfig {
                mode: DurabilityMode::None,
            },
        );
        let engine = TransactionEngine::new(oracle, commit_map, uncommitted, journal);

        assert!(engine.begin().is_err());
        assert!(engine.is_poisoned());
        assert!(matches!(
            engine.commit(Timestamp::new(1), &[cell(1)]),
            Err(EngineError::Poisoned)
        ));
    }
}
