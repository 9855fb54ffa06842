//! The monotonic timestamp allocator itself (spec.md §4.1).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tso_core::Timestamp;

use crate::range_store::RangeStore;

/// Errors the timestamp oracle can raise.
///
/// Per spec.md §7, [`OracleError::RangeReservationFailed`] is fatal: the
/// engine must stop releasing replies and escalate to epoch termination.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The durability layer backing range reservation failed or timed out.
    #[error("failed to durably reserve a new timestamp range: {0}")]
    RangeReservationFailed(String),
}

/// Monotonic 64-bit timestamp allocator, persisted in ranges.
///
/// `last` is the most recently issued timestamp. `high_water` is the end of
/// the currently reserved range: `next()` may return any value up to and
/// including `high_water` without touching the [`RangeStore`]; crossing it
/// requires reserving (and durably recording) a new range first.
pub struct TimestampOracle {
    last: AtomicU64,
    first: Timestamp,
    high_water: AtomicU64,
    range_size: u64,
    store: Arc<dyn RangeStore>,
    // Serializes range-reservation so two concurrent `next()` calls that both
    // cross `high_water` don't each reserve a range.
    reservation_lock: Mutex<()>,
}

impl TimestampOracle {
    /// Start a fresh epoch: reserve the first range and begin counting from
    /// the range store's last recorded high-water (or zero, if this is the
    /// very first epoch).
    ///
    /// `range_size` is `R` from spec.md §4.1 (e.g. `TsoConfig::range_size`).
    pub fn open(store: Arc<dyn RangeStore>, range_size: u64) -> Result<Self, OracleError> {
        assert!(range_size > 0, "range_size must be positive");
        let resume_at = store.recover()?.unwrap_or(0);
        let high_water = resume_at.saturating_add(range_size);
        store.reserve(high_water)?;
        Ok(TimestampOracle {
            last: AtomicU64::new(resume_at),
            first: Timestamp::new(resume_at),
            high_water: AtomicU64::new(high_water),
            range_size,
            store,
            reservation_lock: Mutex::new(()),
        })
    }

    /// Resume from an explicit point (used by engine recovery, spec.md §4.5,
    /// when the journal replay has observed a `Tc` beyond the range store's
    /// own last-recorded high-water — the oracle must resume strictly above
    /// the maximum of the two).
    pub fn resume_above(
        store: Arc<dyn RangeStore>,
        range_size: u64,
        at_least: u64,
    ) -> Result<Self, OracleError> {
        let recorded = store.recover()?.unwrap_or(0);
        let resume_at = recorded.max(at_least);
        let high_water = resume_at.saturating_add(range_size);
        store.reserve(high_water)?;
        Ok(TimestampOracle {
            last: AtomicU64::new(resume_at),
            first: Timestamp::new(resume_at),
            high_water: AtomicU64::new(high_water),
            range_size,
            store,
            reservation_lock: Mutex::new(()),
        })
    }

    /// Return the next timestamp, post-incrementing the counter.
    ///
    /// Strictly monotonic across all callers, within an epoch and across
    /// restarts (the range store enforces the latter).
    pub fn next(&self) -> Result<Timestamp, OracleError> {
        loop {
            let candidate = self.last.fetch_add(1, Ordering::SeqCst) + 1;
            let high_water = self.high_water.load(Ordering::SeqCst);
            if candidate <= high_water {
                return Ok(Timestamp::new(candidate));
            }
            // Crossed the reserved range: one caller reserves the next
            // range; everyone else just re-checks high_water once it moves.
            self.reserve_next_range(high_water)?;
        }
    }

    fn reserve_next_range(&self, observed_high_water: u64) -> Result<(), OracleError> {
        let _guard = self.reservation_lock.lock();
        // Another thread may have already advanced high_water while we
        // waited for the lock.
        if self.high_water.load(Ordering::SeqCst) > observed_high_water {
            return Ok(());
        }
        let new_high_water = observed_high_water.saturating_add(self.range_size);
        self.store.reserve(new_high_water)?;
        self.high_water.store(new_high_water, Ordering::SeqCst);
        tracing::debug!(new_high_water, "reserved new timestamp range");
        Ok(())
    }

    /// The counter value at which this epoch began (used to seed the
    /// uncommitted set's bucket ranges, spec.md §4.1/§4.3).
    pub fn first(&self) -> Timestamp {
        self.first
    }

    /// The current counter value, without advancing it.
    pub fn get(&self) -> Timestamp {
        Timestamp::new(self.last.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_store::InMemoryRangeStore;
    use std::sync::Arc;
    use std::thread;

    fn oracle(range_size: u64) -> TimestampOracle {
        TimestampOracle::open(Arc::new(InMemoryRangeStore::new()), range_size).unwrap()
    }

    #[test]
    fn timestamps_are_strictly_increasing() {
        let oracle = oracle(10);
        let mut prev = oracle.get();
        for _ in 0..25 {
            let next = oracle.next().unwrap();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn crossing_range_boundary_reserves_new_range() {
        let store = Arc::new(InMemoryRangeStore::new());
        let oracle = TimestampOracle::open(store.clone(), 3).unwrap();
        assert_eq!(store.recover().unwrap(), Some(3));
        for _ in 0..3 {
            oracle.next().unwrap();
        }
        // Next call must cross the boundary and reserve range [3, 6].
        let ts = oracle.next().unwrap();
        assert_eq!(ts.get(), 4);
        assert_eq!(store.recover().unwrap(), Some(6));
    }

    #[test]
    fn resume_after_restart_continues_above_high_water() {
        let store = Arc::new(InMemoryRangeStore::new());
        {
            let oracle = TimestampOracle::open(store.clone(), 5).unwrap();
            for _ in 0..5 {
                oracle.next().unwrap();
            }
        }
        // New epoch, same durable store: must resume strictly above the
        // last recorded high-water (5), even though only 5 timestamps were
        // actually handed out.
        let resumed = TimestampOracle::open(store, 5).unwrap();
        let ts = resumed.next().unwrap();
        assert!(ts.get() > 5);
    }

    #[test]
    fn concurrent_next_calls_stay_strictly_monotonic() {
        let oracle = Arc::new(oracle(1_000));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let oracle = oracle.clone();
            handles.push(thread::spawn(move || {
                (0..500)
                    .map(|_| oracle.next().unwrap().get())
                    .collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let before = all.len();
        all.dedup();
        assert_eq!(all.len(), before, "no two calls observed the same timestamp");
    }
}
