//! The batching, durability-gating journal itself (spec.md §4.5).
//!
//! Re-architected per the Design Note in spec.md §9 ("Callback-based
//! journal → explicit completion contract"): rather than threading ad-hoc
//! callbacks through the state machine, `add_record` is a plain blocking
//! call that only returns once the record's batch is durable. Internally
//! this is a producer/consumer handoff between the calling thread (which
//! enqueues bytes into the current batch) and either the same thread
//! (when a batch threshold is crossed) or a background flush-timer thread
//! (when the timeout elapses first) — whichever flushes first wakes every
//! caller waiting on a record in that batch, via a condition variable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::backend::JournalBackend;
use crate::record::{encode_framed, JournalRecord};

/// Durability/batching policy (see SPEC_FULL.md §4.5), phrased directly in
/// spec.md §6 terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// Flush after every record (no batching). Used by tests that want
    /// deterministic ack timing.
    None,
    /// Batch up to `batch_size` bytes or `flush_timeout`, whichever comes
    /// first (spec.md §6 defaults: 1024 bytes / 10ms).
    Batched {
        /// Maximum bytes held before an implicit flush.
        batch_size: usize,
        /// Maximum time a batch is held before an implicit flush.
        flush_timeout: Duration,
    },
}

/// Configuration for a [`StateJournal`].
#[derive(Debug, Clone, Copy)]
pub struct JournalConfig {
    /// Batching/durability policy.
    pub mode: DurabilityMode,
}

impl JournalConfig {
    /// The defaults named in spec.md §6: `batchSize = 1024`,
    /// `flushTimeout = 10ms`.
    pub fn from_spec_defaults() -> Self {
        JournalConfig {
            mode: DurabilityMode::Batched {
                batch_size: 1024,
                flush_timeout: Duration::from_millis(10),
            },
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self::from_spec_defaults()
    }
}

/// Journal errors (spec.md §7).
#[derive(Debug, Error)]
pub enum JournalError {
    /// The backend could not persist a batch. Fatal: per spec.md §7 the
    /// engine must stop releasing replies and escalate to epoch
    /// termination.
    #[error("journal unavailable: {0}")]
    Unavailable(String),
    /// The journal has been shut down and no longer accepts records.
    #[error("journal is shut down")]
    ShutDown,
}

struct State {
    backend: Box<dyn JournalBackend>,
    buffer: Vec<u8>,
    next_seq: u64,
    flushed_through: u64,
    poisoned: Option<String>,
    shutting_down: bool,
}

/// An append-only, batching state journal.
///
/// `add_record` blocks the calling thread until the record it enqueued has
/// been durably flushed, satisfying the "journal-before-reply" contract of
/// spec.md §4.4.2/§4.5 without the caller needing to manage a callback.
pub struct StateJournal {
    config: JournalConfig,
    state: Mutex<State>,
    flushed: Condvar,
    timer_running: Arc<AtomicBool>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StateJournal {
    /// `initialize` (spec.md §4.5): open the journal over `backend`.
    pub fn open(backend: Box<dyn JournalBackend>, config: JournalConfig) -> Arc<Self> {
        let journal = Arc::new(StateJournal {
            config,
            state: Mutex::new(State {
                backend,
                buffer: Vec::new(),
                next_seq: 0,
                flushed_through: 0,
                poisoned: None,
                shutting_down: false,
            }),
            flushed: Condvar::new(),
            timer_running: Arc::new(AtomicBool::new(true)),
            timer_handle: Mutex::new(None),
        });

        if let DurabilityMode::Batched { flush_timeout, .. } = config.mode {
            let weak_journal = Arc::downgrade(&journal);
            let running = journal.timer_running.clone();
            let handle = thread::Builder::new()
                .name("tso-journal-flush-timer".into())
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        thread::sleep(flush_timeout);
                        match weak_journal.upgrade() {
                            Some(journal) => journal.flush_if_pending(),
                            None => break,
                        }
                    }
                })
                .expect("failed to spawn journal flush timer");
            *journal.timer_handle.lock() = Some(handle);
        }
        journal
    }

    /// `addRecord` (spec.md §4.5): enqueue `record`, blocking until its
    /// batch has been durably acknowledged.
    pub fn add_record(&self, record: JournalRecord) -> Result<(), JournalError> {
        let framed = encode_framed(&record);
        let mut state = self.state.lock();
        if state.shutting_down {
            return Err(JournalError::ShutDown);
        }
        if let Some(reason) = &state.poisoned {
            return Err(JournalError::Unavailable(reason.clone()));
        }

        state.buffer.extend_from_slice(&framed);
        let my_seq = state.next_seq;
        state.next_seq += 1;

        let should_flush_now = match self.config.mode {
            DurabilityMode::None => true,
            DurabilityMode::Batched { batch_size, .. } => state.buffer.len() >= batch_size,
        };
        if should_flush_now {
            self.flush_locked(&mut state);
        }

        while state.flushed_through <= my_seq && state.poisoned.is_none() {
            self.flushed.wait(&mut state);
        }
        if let Some(reason) = &state.poisoned {
            return Err(JournalError::Unavailable(reason.clone()));
        }
        Ok(())
    }

    fn flush_if_pending(&self) {
        let mut state = self.state.lock();
        if !state.buffer.is_empty() {
            self.flush_locked(&mut state);
        }
    }

    fn flush_locked(&self, state: &mut State) {
        if state.buffer.is_empty() {
            return;
        }
        let result = state
            .backend
            .append(&state.buffer)
            .and_then(|_| state.backend.sync());
        match result {
            Ok(()) => {
                state.buffer.clear();
                state.flushed_through = state.next_seq;
            }
            Err(e) => {
                tracing::error!(error = %e, "state journal flush failed; journal is now fatal");
                state.poisoned = Some(e.to_string());
            }
        }
        self.flushed.notify_all();
    }

    /// `shutdown` (spec.md §4.5): flush any remaining buffered records and
    /// stop accepting new ones.
    pub fn shutdown(&self) -> Result<(), JournalError> {
        {
            let mut state = self.state.lock();
            self.flush_locked(&mut state);
            state.shutting_down = true;
            self.flushed.notify_all();
            if let Some(reason) = &state.poisoned {
                return Err(JournalError::Unavailable(reason.clone()));
            }
        }
        self.timer_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.timer_handle.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    /// `true` once a flush has failed and the journal can no longer make
    /// progress (spec.md §7 `JournalUnavailable`, fatal).
    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned.is_some()
    }

    /// Read back every durable byte for recovery.
    pub fn read_all(&self) -> Result<Vec<u8>, JournalError> {
        self.state
            .lock()
            .backend
            .read_all()
            .map_err(|e| JournalError::Unavailable(e.to_string()))
    }
}

impl Drop for StateJournal {
    fn drop(&mut self) {
        self.timer_running.store(false, Ordering::SeqCst);
    }
}
