//! Component-agnostic error kinds (spec.md §7).
//!
//! Each downstream crate defines its own `thiserror` enum for the errors it
//! can actually produce (`tso_concurrency::OracleError`,
//! `tso_durability::JournalError`, `tso_engine::EngineError`); this crate
//! only holds the handful of error conditions that are not owned by any one
//! component but are referenced across crate boundaries.

use thiserror::Error;

/// Convenience alias for `Result<T, CoreError>`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while constructing or validating shared TSO state.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configuration value was out of the range the component it applies
    /// to can support (e.g. a `max_items` of zero).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
