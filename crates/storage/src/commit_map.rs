//! The Commit Hash Map (component B, spec.md §4.2).
//!
//! A bounded, approximate "last committed timestamp per written cell"
//! structure. Capacity is fixed at construction; once the map would exceed
//! its maximum load factor, the oldest-by-`Tc` entry is evicted and its
//! `Tc` is folded into the low watermark.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tso_core::{CellHash, Timestamp};

/// Configuration for a [`CommitHashMap`].
#[derive(Debug, Clone, Copy)]
pub struct CommitMapConfig {
    /// Fixed capacity (`MAX_ITEMS` in spec.md §4.2).
    pub max_items: usize,
}

impl Default for CommitMapConfig {
    fn default() -> Self {
        CommitMapConfig { max_items: 100_000 }
    }
}

/// The result of looking up a cell in the commit hash map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// No entry recorded for this cell (or it was evicted).
    Clear,
    /// The cell was last committed at this `Tc`.
    Committed(Timestamp),
    /// The cell is tagged half-aborted: conservatively block every
    /// commit that touches it until `set_full_aborted` clears the tag or
    /// it is evicted (Open Question resolution, see spec.md §9 and
    /// DESIGN.md).
    HalfAborted,
}

#[derive(Debug, Clone, Copy)]
enum EntryKind {
    Committed(Timestamp),
    HalfAborted { start_ts: Timestamp },
}

#[derive(Debug, Clone, Copy)]
struct StoredEntry {
    kind: EntryKind,
    seq: u64,
}

struct RingSlot {
    cell: CellHash,
    seq: u64,
}

struct Inner {
    map: FxHashMap<CellHash, StoredEntry>,
    ring: VecDeque<RingSlot>,
    next_seq: u64,
    low_watermark: Timestamp,
}

/// Bounded map from cell fingerprint to its last known commit outcome.
///
/// Internally a single mutex guards both the hash map and the FIFO
/// eviction ring; callers are already expected to serialize mutating calls
/// through the engine's commit-section lock (spec.md §4.4.1 tie-break
/// note), so this is not a scalability bottleneck, only a correctness
/// guard against misuse from outside that protocol.
pub struct CommitHashMap {
    config: CommitMapConfig,
    inner: Mutex<Inner>,
}

impl CommitHashMap {
    /// Construct an empty map with the given capacity, and an initial low
    /// watermark (the oracle's epoch-start value, per spec.md §3).
    pub fn new(config: CommitMapConfig, initial_low_watermark: Timestamp) -> Self {
        CommitHashMap {
            config,
            inner: Mutex::new(Inner {
                map: FxHashMap::default(),
                ring: VecDeque::new(),
                next_seq: 0,
                low_watermark: initial_low_watermark,
            }),
        }
    }

    /// Fixed capacity this map was constructed with.
    pub fn capacity(&self) -> usize {
        self.config.max_items
    }

    /// Current number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current load factor (`len / capacity`), exposed for observability
    /// (SPEC_FULL.md §4.2).
    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.config.max_items as f64
    }

    /// The largest `Tc` ever evicted from this map, plus the initial
    /// oracle value at construction (spec.md §3).
    pub fn low_watermark(&self) -> Timestamp {
        self.inner.lock().low_watermark
    }

    /// `getLatestWrite` (spec.md §4.2).
    pub fn get_latest_write(&self, cell: CellHash) -> WriteStatus {
        match self.inner.lock().map.get(&cell) {
            None => WriteStatus::Clear,
            Some(entry) => match entry.kind {
                EntryKind::Committed(tc) => WriteStatus::Committed(tc),
                EntryKind::HalfAborted { .. } => WriteStatus::HalfAborted,
            },
        }
    }

    /// `setCommittedTimestamp` (spec.md §4.2): record `Tc` for every cell
    /// in `write_set`, evicting the oldest-by-`Tc` entries as needed.
    /// Returns the (possibly advanced) low watermark.
    pub fn set_committed_timestamp(
        &self,
        _ts: Timestamp,
        tc: Timestamp,
        write_set: &[CellHash],
    ) -> Timestamp {
        let mut inner = self.inner.lock();
        for &cell in write_set {
            Self::evict_until_room(&mut inner, self.config.max_items);
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.map.insert(
                cell,
                StoredEntry {
                    kind: EntryKind::Committed(tc),
                    seq,
                },
            );
            inner.ring.push_back(RingSlot { cell, seq });
        }
        inner.low_watermark
    }

    /// `setHalfAborted` (spec.md §4.2): tag every cell in `write_set` as
    /// half-aborted for `ts`, so subsequent conflict checks block until
    /// `set_full_aborted(ts)` or eviction.
    ///
    /// A cell already tagged half-aborted for a *different* Ts is left
    /// alone: that tag belongs to the transaction that first lost the
    /// race on this cell, and only its own `fullAbort` may clear it. This
    /// keeps a chain of conflicting commits all blocking on the original
    /// half-abort instead of each rewriting the tag's owner.
    pub fn set_half_aborted(&self, ts: Timestamp, write_set: &[CellHash]) {
        let mut inner = self.inner.lock();
        for &cell in write_set {
            if matches!(
                inner.map.get(&cell),
                Some(StoredEntry {
                    kind: EntryKind::HalfAborted { .. },
                    ..
                })
            ) {
                continue;
            }
            Self::evict_until_room(&mut inner, self.config.max_items);
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.map.insert(
                cell,
                StoredEntry {
                    kind: EntryKind::HalfAborted { start_ts: ts },
                    seq,
                },
            );
            inner.ring.push_back(RingSlot { cell, seq });
        }
    }

    /// `setFullAborted` (spec.md §4.2): purge all entries half-aborted for
    /// `ts`. Idempotent.
    pub fn set_full_aborted(&self, ts: Timestamp) {
        let mut inner = self.inner.lock();
        inner.map.retain(|_, entry| {
            !matches!(entry.kind, EntryKind::HalfAborted { start_ts } if start_ts == ts)
        });
        // Ring slots for purged entries become stale and are skipped
        // lazily by `evict_until_room`/eviction, same as overwritten ones.
    }

    /// Evict entries (oldest-by-insertion, which is oldest-by-`Tc` for
    /// committed entries, per spec.md §4.2) until the map has room for one
    /// more insert without exceeding `capacity`.
    fn evict_until_room(inner: &mut Inner, capacity: usize) {
        while inner.map.len() >= capacity {
            let Some(slot) = inner.ring.pop_front() else {
                // Ring exhausted but map still "full": should not happen
                // since every insert pushes a ring slot, but don't spin.
                break;
            };
            let is_live = matches!(inner.map.get(&slot.cell), Some(e) if e.seq == slot.seq);
            if !is_live {
                // Stale slot: the cell was overwritten or purged since this
                // slot was pushed. Not a real eviction.
                continue;
            }
            if let Some(entry) = inner.map.remove(&slot.cell) {
                if let EntryKind::Committed(tc) = entry.kind {
                    if tc > inner.low_watermark {
                        inner.low_watermark = tc;
                        tracing::debug!(low_watermark = tc.get(), "low watermark advanced");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(v: u64) -> Timestamp {
        Timestamp::new(v)
    }

    fn cell(v: u64) -> CellHash {
        CellHash::from_raw(v)
    }

    #[test]
    fn clean_commit_is_visible() {
        let map = CommitHashMap::new(CommitMapConfig { max_items: 4 }, ts(0));
        map.set_committed_timestamp(ts(5), ts(6), &[cell(1), cell(2)]);
        assert_eq!(map.get_latest_write(cell(1)), WriteStatus::Committed(ts(6)));
        assert_eq!(map.get_latest_write(cell(2)), WriteStatus::Committed(ts(6)));
        assert_eq!(map.get_latest_write(cell(3)), WriteStatus::Clear);
    }

    #[test]
    fn eviction_advances_low_watermark_by_tc_order() {
        let map = CommitHashMap::new(CommitMapConfig { max_items: 1 }, ts(0));
        map.set_committed_timestamp(ts(5), ts(6), &[cell(1)]);
        assert_eq!(map.low_watermark(), ts(0));
        // This insert must evict cell(1)@Tc=6, advancing the watermark.
        map.set_committed_timestamp(ts(7), ts(8), &[cell(2)]);
        assert_eq!(map.low_watermark(), ts(6));
        assert_eq!(map.get_latest_write(cell(1)), WriteStatus::Clear);
        assert_eq!(map.get_latest_write(cell(2)), WriteStatus::Committed(ts(8)));
    }

    #[test]
    fn half_abort_blocks_until_full_abort() {
        let map = CommitHashMap::new(CommitMapConfig { max_items: 4 }, ts(0));
        map.set_half_aborted(ts(10), &[cell(4)]);
        assert_eq!(map.get_latest_write(cell(4)), WriteStatus::HalfAborted);
        map.set_full_aborted(ts(10));
        assert_eq!(map.get_latest_write(cell(4)), WriteStatus::Clear);
    }

    #[test]
    fn a_second_conflicting_half_abort_does_not_steal_the_tag() {
        let map = CommitHashMap::new(CommitMapConfig { max_items: 4 }, ts(0));
        map.set_half_aborted(ts(10), &[cell(4)]);
        map.set_half_aborted(ts(11), &[cell(4)]); // loses the race, must not rewrite the tag
        assert_eq!(map.get_latest_write(cell(4)), WriteStatus::HalfAborted);
        map.set_full_aborted(ts(11)); // the wrong owner; must not clear it
        assert_eq!(map.get_latest_write(cell(4)), WriteStatus::HalfAborted);
        map.set_full_aborted(ts(10));
        assert_eq!(map.get_latest_write(cell(4)), WriteStatus::Clear);
    }

    #[test]
    fn full_abort_is_idempotent() {
        let map = CommitHashMap::new(CommitMapConfig { max_items: 4 }, ts(0));
        map.set_full_aborted(ts(99));
        map.set_half_aborted(ts(10), &[cell(4)]);
        map.set_full_aborted(ts(10));
        map.set_full_aborted(ts(10));
        assert_eq!(map.get_latest_write(cell(4)), WriteStatus::Clear);
    }

    #[test]
    fn overwriting_a_cell_does_not_double_evict() {
        let map = CommitHashMap::new(CommitMapConfig { max_items: 2 }, ts(0));
        map.set_committed_timestamp(ts(1), ts(2), &[cell(1)]);
        map.set_committed_timestamp(ts(3), ts(4), &[cell(1)]); // overwrite, still 1 live entry
        assert_eq!(map.len(), 1);
        map.set_committed_timestamp(ts(5), ts(6), &[cell(2)]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.low_watermark(), ts(0), "no eviction should have occurred yet");
    }

    #[test]
    fn load_factor_reflects_occupancy() {
        let map = CommitHashMap::new(CommitMapConfig { max_items: 4 }, ts(0));
        map.set_committed_timestamp(ts(1), ts(2), &[cell(1), cell(2)]);
        assert_eq!(map.load_factor(), 0.5);
    }
}
