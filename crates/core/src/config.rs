//! TSO configuration (§6 of spec.md).
//!
//! `TsoConfig` is an immutable value constructed once when a [`crate::Timestamp`]
//! oracle epoch begins. Per the re-architecture note in spec.md §9 ("Mutable
//! globals for capacity"), there is no process-wide mutable configuration
//! state anywhere in this workspace — every component takes its `*Config`
//! struct by value at construction time.

use std::env;
use std::time::Duration;

/// Top-level, immutable TSO configuration.
///
/// Each field corresponds to one of the enumerated configuration values in
/// spec.md §6 and can be overridden by an environment variable, read once
/// at [`TsoConfig::from_env`] time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsoConfig {
    /// Capacity of the commit hash map (component B). Default `100_000`.
    pub max_items: usize,
    /// Sizing input for the uncommitted set's bucket grid (component C).
    /// Default `100_000`.
    pub max_commits: usize,
    /// Maximum milliseconds the journal holds a batch before flushing.
    /// Default `10`.
    pub flush_timeout_ms: u64,
    /// Maximum bytes per journal batch. Default `1024`.
    pub batch_size: usize,
    /// Size of each timestamp range the oracle reserves durably at once.
    /// Default `1_000_000`.
    pub range_size: u64,
}

impl TsoConfig {
    /// The maximum load factor the commit hash map is allowed to reach
    /// before an insert must evict, per spec.md §4.2 ("maximum load factor
    /// 0.5").
    pub const MAX_LOAD_FACTOR: f64 = 0.5;

    /// `flush_timeout_ms` as a [`Duration`].
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Build configuration from defaults, overridden by environment
    /// variables where present:
    ///
    /// - `TSO_MAX_ITEMS`
    /// - `TSO_MAX_COMMITS`
    /// - `TSO_FLUSH_TIMEOUT_MS`
    /// - `TSO_BATCH_SIZE`
    /// - `TSO_RANGE_SIZE`
    ///
    /// Malformed values are ignored (the default is kept) rather than
    /// causing a startup panic; optional environment-sourced settings are
    /// treated as best-effort.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_usize("TSO_MAX_ITEMS") {
            config.max_items = v;
        }
        if let Some(v) = env_usize("TSO_MAX_COMMITS") {
            config.max_commits = v;
        }
        if let Some(v) = env_u64("TSO_FLUSH_TIMEOUT_MS") {
            config.flush_timeout_ms = v;
        }
        if let Some(v) = env_usize("TSO_BATCH_SIZE") {
            config.batch_size = v;
        }
        if let Some(v) = env_u64("TSO_RANGE_SIZE") {
            config.range_size = v;
        }
        config
    }
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Default for TsoConfig {
    fn default() -> Self {
        TsoConfig {
            max_items: 100_000,
            max_commits: 100_000,
            flush_timeout_ms: 10,
            batch_size: 1024,
            range_size: 1_000_000,
        }
    }
}
