//! Journal replay on restart (spec.md §4.5, invariant 7, scenario S6).
//!
//! `Recoverer::replay` reconstructs the commit hash map (B), the
//! uncommitted set (C), the low watermark (L), and the timestamp the
//! oracle must resume above, purely from the durable journal tail. It owns
//! no state of its own beyond the report it returns.

use thiserror::Error;
use tso_core::Timestamp;
use tso_storage::{CommitHashMap, UncommittedSet};

use crate::record::{decode_all_framed, JournalRecord, RecordDecodeError};

/// A summary of what replay reconstructed, for logging and for the caller
/// to hand the oracle its resume point.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryReport {
    /// Number of records successfully replayed.
    pub records_replayed: usize,
    /// The low watermark after replay.
    pub low_watermark: Timestamp,
    /// The highest `Tc` observed in any COMMIT record during replay (`0`
    /// if none). The oracle must resume strictly above
    /// `max(highest_tc_seen, persisted_range_high_water)`, per spec.md
    /// §4.5.
    pub highest_tc_seen: Timestamp,
    /// Transactions left in the uncommitted set because a BEGIN record
    /// was seen with no matching terminal (COMMIT/ABORT) record.
    pub live_transactions: usize,
}

/// Errors replaying the journal.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// A complete record frame failed its checksum; the journal tail is
    /// corrupt beyond the tolerated torn-write case.
    #[error("journal record failed checksum during recovery: {0}")]
    Corrupt(#[from] RecordDecodeError),
}

/// Replays a journal's durable byte stream into fresh B/C/L state.
pub struct Recoverer;

impl Recoverer {
    /// Replay `bytes` (the full durable journal, e.g. from
    /// `StateJournal::read_all`) into `commit_map` and `uncommitted`, both
    /// of which should be freshly constructed and empty.
    ///
    /// `COMMIT(Ts,Tc)` records rebuild B with their carried write set.
    /// `ABORT(Ts)` records are treated as final regardless of whether a
    /// prior half-abort was ever recorded, matching spec.md §6's
    /// conservative replay stance. `BEGIN(Ts)` records without a
    /// subsequent terminal record re-enter C as live.
    pub fn replay(
        bytes: &[u8],
        commit_map: &CommitHashMap,
        uncommitted: &UncommittedSet,
    ) -> Result<RecoveryReport, RecoveryError> {
        let records = decode_all_framed(bytes)?;
        let mut highest_tc_seen = Timestamp::new(0);
        let mut low_watermark = Timestamp::new(0);
        let mut live_transactions = 0usize;

        for record in &records {
            match record {
                JournalRecord::Begin { ts } => {
                    uncommitted.start(*ts);
                    live_transactions += 1;
                }
                JournalRecord::Commit { ts, tc, write_set } => {
                    commit_map.set_committed_timestamp(*ts, *tc, write_set);
                    uncommitted.committed(*ts);
                    if *tc > highest_tc_seen {
                        highest_tc_seen = *tc;
                    }
                    live_transactions = live_transactions.saturating_sub(1);
                }
                JournalRecord::Abort { ts } => {
                    commit_map.set_full_aborted(*ts);
                    uncommitted.abort(*ts);
                    live_transactions = live_transactions.saturating_sub(1);
                }
                JournalRecord::LowWatermarkAdvance { watermark } => {
                    if *watermark > low_watermark {
                        low_watermark = *watermark;
                    }
                }
            }
        }

        // The commit map folds its own low watermark on eviction; take
        // whichever is higher between that and the last checkpoint record,
        // since an eviction during replay can itself advance it further
        // than the last periodic checkpoint had observed.
        let folded = commit_map.low_watermark();
        if folded > low_watermark {
            low_watermark = folded;
        }

        tracing::info!(
            records = records.len(),
            low_watermark = low_watermark.get(),
            highest_tc_seen = highest_tc_seen.get(),
            live_transactions,
            "journal replay complete"
        );

        Ok(RecoveryReport {
            records_replayed: records.len(),
            low_watermark,
            highest_tc_seen,
            live_transactions,
        })
    }
}
