//! The `Timestamp` type used for both start (`Ts`) and commit (`Tc`) markers.
//!
//! Per spec.md §3: timestamps are unsigned 64-bit, strictly monotonic within
//! an epoch, and zero is reserved to mean "never". Start and commit
//! timestamps are drawn from the same counter; only usage context
//! distinguishes a `Ts` from a `Tc`.

use std::fmt;

/// A 64-bit, strictly monotonic timestamp.
///
/// `Timestamp::NEVER` (zero) is reserved and is never returned by the
/// timestamp oracle's `next()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The reserved "never" value. Not a valid start or commit timestamp.
    pub const NEVER: Timestamp = Timestamp(0);

    /// Wrap a raw `u64` value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        Timestamp(value)
    }

    /// The underlying `u64` value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// `true` if this is the reserved "never" value.
    #[inline]
    pub const fn is_never(self) -> bool {
        self.0 == 0
    }

    /// The next timestamp in sequence (saturating; the oracle is expected to
    /// be re-epoched long before overflow, per spec.md §4.2).
    #[inline]
    pub const fn succ(self) -> Self {
        Timestamp(self.0.saturating_add(1))
    }
}

impl From<u64> for Timestamp {
    #[inline]
    fn from(value: u64) -> Self {
        Timestamp(value)
    }
}

impl From<Timestamp> for u64 {
    #[inline]
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_zero() {
        assert!(Timestamp::NEVER.is_never());
        assert_eq!(Timestamp::NEVER.get(), 0);
    }

    #[test]
    fn ordering_matches_underlying_value() {
        let a = Timestamp::new(5);
        let b = Timestamp::new(6);
        assert!(a < b);
        assert_eq!(a.succ(), b);
    }

    #[test]
    fn succ_saturates_instead_of_wrapping() {
        let max = Timestamp::new(u64::MAX);
        assert_eq!(max.succ(), max);
    }
}
