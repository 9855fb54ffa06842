//! Timestamp Oracle (component A of spec.md §2/§4.1).
//!
//! A monotonic 64-bit counter durably allocated in ranges: `next()` never
//! returns a value beyond the high-water of the most recently, durably
//! recorded range.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod oracle;
pub mod range_store;

pub use oracle::{OracleError, TimestampOracle};
pub use range_store::{FileRangeStore, InMemoryRangeStore, RangeStore};
