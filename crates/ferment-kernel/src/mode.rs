//! [`ModeTracker`] – the dashboard's advisory view of the device program.
//!
//! The device is the source of truth.  A dispatched command is only a hint
//! until telemetry confirms it:
//!
//! ```text
//!   NONE ──dispatch(ROTI|BIR|TEMPE|YOGHURT)──► pending(mode)
//!   any  ──dispatch(STOP)───────────────────► pending(STOP)
//!   any  ──reading(mode = m)────────────────► reported(m), pending cleared
//! ```
//!
//! The tracker is deliberately separate from the
//! [`StateStore`][crate::state_store::StateStore]: dispatching a command
//! never touches the store.

use std::sync::{Mutex, MutexGuard, PoisonError};

use ferment_types::{ModeCommand, NO_MODE};
use serde::Serialize;
use tracing::debug;

/// Snapshot of the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeState {
    /// Mode from the most recent reading (`"NONE"` before the first one).
    pub reported: String,
    /// Last dispatched command not yet overwritten by telemetry.
    pub pending: Option<ModeCommand>,
}

impl ModeState {
    /// The mode the dashboard should display: a pending command wins until
    /// the device reports back.
    pub fn display_mode(&self) -> &str {
        match &self.pending {
            Some(cmd) => cmd.as_str(),
            None => &self.reported,
        }
    }
}

impl Default for ModeState {
    fn default() -> Self {
        Self {
            reported: NO_MODE.to_string(),
            pending: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ModeTracker {
    state: Mutex<ModeState>,
}

impl ModeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `cmd` is about to be handed to the transport.
    ///
    /// Returns the hint it replaced, for [`ModeTracker::on_dispatch_failed`].
    pub fn on_dispatch(&self, cmd: ModeCommand) -> Option<ModeCommand> {
        let mut state = self.lock();
        debug!(from = %state.display_mode(), to = %cmd, "mode command pending");
        state.pending.replace(cmd)
    }

    /// Undo [`ModeTracker::on_dispatch`] after the transport refused `cmd`.
    ///
    /// Only restores `previous` while `cmd` is still the pending hint; a
    /// reading or a newer dispatch in between wins.
    pub fn on_dispatch_failed(&self, cmd: ModeCommand, previous: Option<ModeCommand>) {
        let mut state = self.lock();
        if state.pending == Some(cmd) {
            debug!(command = %cmd, "mode command not sent; hint withdrawn");
            state.pending = previous;
        }
    }

    /// Record the mode carried by an accepted reading.  Always overwrites the
    /// dashboard's notion of the mode and clears any pending hint.
    pub fn on_reading(&self, mode: &str) {
        let mut state = self.lock();
        if let Some(pending) = state.pending.take() {
            if pending.as_str() == mode {
                debug!(mode, "device confirmed pending command");
            } else {
                debug!(mode, pending = %pending, "device reported a different mode");
            }
        }
        state.reported = mode.to_string();
    }

    pub fn snapshot(&self) -> ModeState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, ModeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
