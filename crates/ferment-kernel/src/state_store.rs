//! [`StateStore`] – latest status + bounded chart history.
//!
//! The store is the single shared-mutable resource of the dashboard.  One
//! mutex covers both halves so that an update (replace snapshot, append
//! history entry, evict) and a read (copy snapshot and history) never
//! interleave: a reader can never pair the snapshot of message N with a
//! history that already contains message N+1.
//!
//! Critical sections are O(capacity) copies with no I/O and no awaits, so a
//! high-frequency writer cannot starve readers for long.  A poisoned lock is
//! recovered rather than propagated: the guarded data is always left in a
//! consistent state by the code below.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ferment_types::{HISTORY_CAPACITY, HistoryEntry, Reading, StatusSnapshot};
use serde::Serialize;
use tracing::trace;

// ────────────────────────────────────────────────────────────────────────────
// Views
// ────────────────────────────────────────────────────────────────────────────

/// How current the data shown to the operator is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Freshness {
    /// No reading has ever been accepted; the status fields are placeholders.
    NoData,
    /// The last reading arrived within the staleness window.
    Live,
    /// The device has been silent for longer than the staleness window.
    Stale { silent_secs: u64 },
}

/// A consistent point-in-time copy of the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub status: StatusSnapshot,
    /// Chart points, oldest first.
    pub history: Vec<HistoryEntry>,
    /// The reading `status` was projected from; `None` until the first one.
    pub latest: Option<Reading>,
    /// Readings accepted since start-up (also the sequence of `latest`).
    pub readings_received: u64,
    #[serde(skip)]
    pub last_update: Option<Instant>,
}

impl DashboardView {
    /// `false` while the dashboard is still waiting for its first reading.
    pub fn has_data(&self) -> bool {
        self.latest.is_some()
    }

    /// Classify this view against a staleness window, measured from now.
    pub fn freshness(&self, stale_after: Duration) -> Freshness {
        self.freshness_at(Instant::now(), stale_after)
    }

    /// Classify this view against a staleness window, measured from `now`.
    pub fn freshness_at(&self, now: Instant, stale_after: Duration) -> Freshness {
        match self.last_update {
            None => Freshness::NoData,
            Some(at) => {
                let silent = now.saturating_duration_since(at);
                if silent > stale_after {
                    Freshness::Stale {
                        silent_secs: silent.as_secs(),
                    }
                } else {
                    Freshness::Live
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Store
// ────────────────────────────────────────────────────────────────────────────

struct StoreState {
    status: StatusSnapshot,
    history: VecDeque<HistoryEntry>,
    latest: Option<Reading>,
    readings_received: u64,
    last_update: Option<Instant>,
}

/// Thread-safe holder of the dashboard state.
///
/// Share it behind an `Arc` between the ingestion task (the only writer) and
/// any number of readers.
///
/// # Example
///
/// ```
/// use ferment_kernel::state_store::StateStore;
/// use ferment_types::Reading;
///
/// let store = StateStore::new();
/// assert!(!store.read_snapshot().has_data());
///
/// store.apply_reading(&Reading {
///     temperature: 25.5,
///     humidity: 60.0,
///     mode: "ROTI".to_string(),
///     target_min: 24.0,
///     target_max: 28.0,
///     timestamp: "08:15:00".to_string(),
/// });
///
/// let view = store.read_snapshot();
/// assert_eq!(view.status.range, "24-28 °C");
/// assert_eq!(view.history.len(), 1);
/// ```
pub struct StateStore {
    inner: Mutex<StoreState>,
    capacity: usize,
}

impl StateStore {
    /// Create an empty store holding [`HISTORY_CAPACITY`] chart points.
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// Create an empty store holding at most `capacity` chart points
    /// (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(StoreState {
                status: StatusSnapshot::default(),
                history: VecDeque::with_capacity(capacity),
                latest: None,
                readings_received: 0,
                last_update: None,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Atomically make `reading` the current status and append it to the
    /// history, evicting the oldest point beyond capacity.
    ///
    /// Returns the sequence number assigned to the reading (1-based).
    pub fn apply_reading(&self, reading: &Reading) -> u64 {
        let status = reading.status();
        let entry = reading.history_entry();

        let mut state = self.lock();
        state.status = status;
        while state.history.len() >= self.capacity {
            state.history.pop_front();
        }
        state.history.push_back(entry);
        state.latest = Some(reading.clone());
        state.readings_received += 1;
        state.last_update = Some(Instant::now());

        trace!(
            sequence = state.readings_received,
            history_len = state.history.len(),
            "reading applied"
        );
        state.readings_received
    }

    /// A consistent copy of the current status and history.
    pub fn read_snapshot(&self) -> DashboardView {
        let state = self.lock();
        DashboardView {
            status: state.status.clone(),
            history: state.history.iter().cloned().collect(),
            latest: state.latest.clone(),
            readings_received: state.readings_received,
            last_update: state.last_update,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
