//! [`CommandDispatcher`] – operator commands out to the device.

use std::sync::Arc;
use std::time::Duration;

use ferment_kernel::ModeTracker;
use ferment_middleware::{EventBus, Topic, Transport};
use ferment_types::{Event, EventPayload, FermentError, ModeCommand};
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

const SOURCE: &str = "ferment-runtime::dispatcher";

/// Publishes [`ModeCommand`]s on the single command topic.
///
/// Each call sends the command's literal tag exactly once.  There is no
/// retry and no acknowledgement: the device confirms a mode change only by
/// reporting it in its next reading.  Dispatch never touches the state store.
pub struct CommandDispatcher {
    transport: Arc<dyn Transport>,
    topic: String,
    modes: Arc<ModeTracker>,
    bus: EventBus,
}

impl CommandDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        topic: impl Into<String>,
        modes: Arc<ModeTracker>,
        bus: EventBus,
    ) -> Self {
        Self {
            transport,
            topic: topic.into(),
            modes,
            bus,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Send `cmd` to the device.
    ///
    /// # Errors
    ///
    /// [`FermentError::Publish`] when the transport refuses the message.
    pub async fn dispatch(&self, cmd: ModeCommand) -> Result<(), FermentError> {
        // The hint is set first so a reading that arrives while the publish
        // is in flight still clears it.
        let previous = self.modes.on_dispatch(cmd);
        if let Err(e) = self
            .transport
            .publish(&self.topic, cmd.as_str().as_bytes())
            .await
        {
            self.modes.on_dispatch_failed(cmd, previous);
            return Err(match e {
                FermentError::Publish(_) => e,
                other => FermentError::Publish(other.to_string()),
            });
        }

        info!(command = %cmd, topic = %self.topic, "command dispatched");
        if let Err(e) = self.bus.publish_to(
            Topic::Commands,
            Event::new(SOURCE, EventPayload::CommandDispatched(cmd)),
        ) {
            trace!(error = %e, "command event not observed");
        }
        Ok(())
    }

    /// Poll transport connectivity every `period` and publish a
    /// [`EventPayload::TransportStatus`] alert whenever it changes.
    pub fn spawn_link_monitor(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        let mut last = dispatcher.is_connected();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
            loop {
                ticker.tick().await;
                let connected = dispatcher.is_connected();
                if connected == last {
                    continue;
                }
                last = connected;
                if connected {
                    info!("broker link restored");
                } else {
                    warn!("broker link lost; commands will fail until it returns");
                }
                if let Err(e) = dispatcher.bus.publish_to(
                    Topic::Alerts,
                    Event::new(SOURCE, EventPayload::TransportStatus { connected }),
                ) {
                    trace!(error = %e, "link status not observed");
                }
            }
        })
    }
}
