//! [`Dashboard`] – the presentation port.
//!
//! Renderers never touch the store directly.  They either pull a [`Frame`]
//! or register with [`Dashboard::on_tick`] and receive one at a fixed
//! cadence; user actions come back in through [`Dashboard::on_command`].

use std::sync::Arc;
use std::time::Duration;

use ferment_kernel::{DashboardView, Freshness, HazardMonitor, ModeState, ModeTracker, StateStore};
use ferment_types::{FermentError, Hazard, HistoryEntry, ModeCommand, StatusSnapshot};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::dispatcher::CommandDispatcher;

/// Smallest accepted render period.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Everything a renderer needs for one redraw.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    #[serde(flatten)]
    pub view: DashboardView,
    pub freshness: Freshness,
    /// Hazards raised by the latest reading; empty before the first one.
    pub hazards: Vec<Hazard>,
    pub mode: ModeState,
    pub transport_connected: bool,
}

impl Frame {
    pub fn status(&self) -> &StatusSnapshot {
        &self.view.status
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.view.history
    }

    /// The advisory "no reading ever received" condition.
    pub fn awaiting_data(&self) -> bool {
        self.freshness == Freshness::NoData
    }
}

pub struct Dashboard {
    store: Arc<StateStore>,
    modes: Arc<ModeTracker>,
    hazards: Arc<HazardMonitor>,
    dispatcher: Arc<CommandDispatcher>,
    stale_after: Duration,
}

impl Dashboard {
    pub fn new(
        store: Arc<StateStore>,
        modes: Arc<ModeTracker>,
        hazards: Arc<HazardMonitor>,
        dispatcher: Arc<CommandDispatcher>,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            modes,
            hazards,
            dispatcher,
            stale_after,
        }
    }

    /// Build a frame from one consistent store snapshot.
    ///
    /// `mode.reported` is taken from the snapshot's latest reading so it
    /// always agrees with `status.mode`; only the pending hint comes from the
    /// tracker.
    pub fn frame(&self) -> Frame {
        let mut mode = self.modes.snapshot();
        let view = self.store.read_snapshot();
        if let Some(latest) = &view.latest {
            mode.reported.clone_from(&latest.mode);
        }
        Frame {
            freshness: view.freshness(self.stale_after),
            hazards: self.hazards.evaluate(&view),
            mode,
            transport_connected: self.dispatcher.is_connected(),
            view,
        }
    }

    /// Call `renderer` with a fresh [`Frame`] every `period` (first call
    /// immediately).  Missed ticks are skipped rather than bunched up.
    ///
    /// Abort the returned handle to stop rendering.
    pub fn on_tick<F>(self: &Arc<Self>, period: Duration, mut renderer: F) -> JoinHandle<()>
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        let dashboard = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(MIN_TICK));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let frame = dashboard.frame();
                renderer(&frame);
            }
        })
    }

    /// Forward an operator command to the device.
    pub async fn on_command(&self, cmd: ModeCommand) -> Result<(), FermentError> {
        debug!(command = %cmd, "operator command");
        self.dispatcher.dispatch(cmd).await
    }

    pub fn command_topic(&self) -> &str {
        self.dispatcher.topic()
    }
}
