//! The Uncommitted Set (component C, spec.md §4.3).
//!
//! A fixed array of buckets, each a bitmap covering a fixed range of
//! timestamps, recording which start timestamps are currently "live"
//! (begun, not yet committed or aborted). Buckets are a ring: as the
//! timestamp frontier advances, old buckets are reused for new ranges and
//! their bits implicitly become "long resolved" (spec.md §4.3,
//! "Uncommitted bucket reclamation policy" in §9).

use parking_lot::RwLock;
use tso_core::Timestamp;

const WORD_BITS: u64 = 64;

/// Configuration for an [`UncommittedSet`].
#[derive(Debug, Clone, Copy)]
pub struct UncommittedConfig {
    /// Sizing input (`MAX_COMMITS` in spec.md §4.3). `bucket_number` and
    /// `bucket_size` are both derived from this, rounded up to powers of
    /// two.
    pub max_commits: usize,
}

impl Default for UncommittedConfig {
    fn default() -> Self {
        UncommittedConfig { max_commits: 100_000 }
    }
}

/// A fixed number of fixed-size buckets, derived from `max_commits`.
#[derive(Debug, Clone, Copy)]
struct Dimensions {
    bucket_count: usize,
    bucket_size: u64,
}

impl Dimensions {
    /// 64 buckets is enough ring depth that a bucket only recycles after
    /// 64 full bucket-widths of timestamp advance; `bucket_size` is sized
    /// so the whole ring covers roughly `max_commits` timestamps.
    fn derive(max_commits: usize) -> Self {
        let bucket_count = 64usize;
        let per_bucket = (max_commits / bucket_count).max(1);
        let bucket_size = (per_bucket as u64).next_power_of_two();
        Dimensions {
            bucket_count,
            bucket_size,
        }
    }

    fn words_per_bucket(&self) -> usize {
        ((self.bucket_size + WORD_BITS - 1) / WORD_BITS) as usize
    }

    /// Decompose a timestamp into (ring slot, generation, bit offset).
    /// `generation` identifies which "pass" around the ring this
    /// timestamp belongs to; a slot whose stored generation doesn't match
    /// holds data from a different pass and is treated as empty.
    fn locate(&self, ts: u64) -> (usize, u64, usize) {
        let bucket_index = ts / self.bucket_size;
        let slot = (bucket_index % self.bucket_count as u64) as usize;
        let generation = bucket_index / self.bucket_count as u64;
        let bit_offset = (ts % self.bucket_size) as usize;
        (slot, generation, bit_offset)
    }
}

struct Inner {
    /// One bitmap (as `u64` words) per ring slot.
    words: Vec<Vec<u64>>,
    /// The generation currently represented by each ring slot.
    generation: Vec<u64>,
}

/// Bitmap-backed set of currently live (begun, unresolved) start
/// timestamps.
pub struct UncommittedSet {
    dims: Dimensions,
    inner: RwLock<Inner>,
}

impl UncommittedSet {
    /// Construct an empty set sized from `config`.
    pub fn new(config: UncommittedConfig) -> Self {
        let dims = Dimensions::derive(config.max_commits);
        let words_per_bucket = dims.words_per_bucket();
        UncommittedSet {
            dims,
            inner: RwLock::new(Inner {
                words: vec![vec![0u64; words_per_bucket]; dims.bucket_count],
                generation: vec![0u64; dims.bucket_count],
            }),
        }
    }

    /// Mark `ts` as live (`start(Ts)`, spec.md §4.3).
    pub fn start(&self, ts: Timestamp) {
        let (slot, generation, bit) = self.dims.locate(ts.get());
        let mut inner = self.inner.write();
        self.reset_slot_if_stale(&mut inner, slot, generation);
        let word = bit / WORD_BITS as usize;
        let offset = bit % WORD_BITS as usize;
        inner.words[slot][word] |= 1u64 << offset;
    }

    /// Clear `ts` on abort (`abort(Ts)`, spec.md §4.3).
    pub fn abort(&self, ts: Timestamp) {
        self.clear(ts);
    }

    /// Clear `ts` on commit (`committed(Ts)`, spec.md §4.3).
    pub fn committed(&self, ts: Timestamp) {
        self.clear(ts);
    }

    fn clear(&self, ts: Timestamp) {
        let (slot, generation, bit) = self.dims.locate(ts.get());
        let mut inner = self.inner.write();
        if inner.generation[slot] != generation {
            // Already a different pass through the ring: already resolved.
            return;
        }
        let word = bit / WORD_BITS as usize;
        let offset = bit % WORD_BITS as usize;
        inner.words[slot][word] &= !(1u64 << offset);
    }

    /// `isUncommitted(Ts)` (spec.md §4.3): `true` iff `ts` has been begun
    /// and not yet resolved.
    pub fn is_uncommitted(&self, ts: Timestamp) -> bool {
        let (slot, generation, bit) = self.dims.locate(ts.get());
        let inner = self.inner.read();
        if inner.generation[slot] != generation {
            return false;
        }
        let word = bit / WORD_BITS as usize;
        let offset = bit % WORD_BITS as usize;
        (inner.words[slot][word] & (1u64 << offset)) != 0
    }

    /// `raiseLowestBucket(Ts)` (spec.md §4.3): proactively recycle any
    /// ring slot that is about to be reused for `ts`'s generation, ahead
    /// of the next `start()` that would otherwise do it lazily. Safe to
    /// call at any time; existing live bits in slots not yet due for
    /// recycling are untouched.
    pub fn raise_lowest_bucket(&self, ts: Timestamp) {
        let (slot, generation, _) = self.dims.locate(ts.get());
        let mut inner = self.inner.write();
        self.reset_slot_if_stale(&mut inner, slot, generation);
    }

    fn reset_slot_if_stale(&self, inner: &mut Inner, slot: usize, generation: u64) {
        if inner.generation[slot] != generation {
            for word in inner.words[slot].iter_mut() {
                *word = 0;
            }
            inner.generation[slot] = generation;
        }
    }

    /// The span of timestamps a single bucket covers (for tests/tuning).
    pub fn bucket_size(&self) -> u64 {
        self.dims.bucket_size
    }

    /// Number of ring slots.
    pub fn bucket_count(&self) -> usize {
        self.dims.bucket_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(v: u64) -> Timestamp {
        Timestamp::new(v)
    }

    #[test]
    fn begun_timestamp_is_uncommitted() {
        let set = UncommittedSet::new(UncommittedConfig { max_commits: 1024 });
        set.start(ts(5));
        assert!(set.is_uncommitted(ts(5)));
        assert!(!set.is_uncommitted(ts(6)));
    }

    #[test]
    fn commit_and_abort_both_clear() {
        let set = UncommittedSet::new(UncommittedConfig { max_commits: 1024 });
        set.start(ts(5));
        set.committed(ts(5));
        assert!(!set.is_uncommitted(ts(5)));

        set.start(ts(6));
        set.abort(ts(6));
        assert!(!set.is_uncommitted(ts(6)));
    }

    #[test]
    fn recycled_bucket_reports_resolved() {
        let set = UncommittedSet::new(UncommittedConfig { max_commits: 64 });
        // bucket_count fixed at 64; bucket_size derived from max_commits/64 -> 1.
        set.start(ts(1));
        assert!(set.is_uncommitted(ts(1)));
        // Advance far enough to wrap the ring back onto ts=1's slot with a
        // new generation; the old bit must read as resolved, not live.
        let wrap_ts = ts(1 + set.bucket_size() * set.bucket_count() as u64);
        set.start(wrap_ts);
        assert!(!set.is_uncommitted(ts(1)));
        assert!(set.is_uncommitted(wrap_ts));
    }

    #[test]
    fn unset_timestamp_is_not_uncommitted() {
        let set = UncommittedSet::new(UncommittedConfig { max_commits: 1024 });
        assert!(!set.is_uncommitted(ts(123)));
    }

    #[test]
    fn raise_lowest_bucket_does_not_disturb_live_slots() {
        let set = UncommittedSet::new(UncommittedConfig { max_commits: 1024 });
        set.start(ts(5));
        set.raise_lowest_bucket(ts(5));
        assert!(set.is_uncommitted(ts(5)));
    }
}
