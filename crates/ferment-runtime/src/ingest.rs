//! Ingestion pipeline: transport → normalizer → store → bus.
//!
//! Runs on the background task that drains the transport's [`Inbound`]
//! channel.  Every failure is logged and the message dropped; nothing on this
//! path reaches the presentation side as an error.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ferment_kernel::{HazardMonitor, ModeTracker, StateStore};
use ferment_middleware::{EventBus, Inbound, InboundMessage, Topic, normalizer};
use ferment_types::{Event, EventPayload, FermentError, Hazard, Reading};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const SOURCE: &str = "ferment-runtime::ingest";

/// Counters for every message the ingestor has seen.
#[derive(Debug, Default)]
pub struct IngestStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    ignored: AtomicU64,
}

impl IngestStats {
    /// Readings applied to the store.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Messages on the telemetry topic that failed to normalize.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Messages on any other topic.
    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }
}

/// Applies inbound telemetry to the shared state.
pub struct Ingestor {
    store: Arc<StateStore>,
    modes: Arc<ModeTracker>,
    hazards: Arc<HazardMonitor>,
    bus: EventBus,
    telemetry_topic: String,
    stats: IngestStats,
    /// Rules that fired on the previous reading.
    active_hazards: Mutex<BTreeSet<String>>,
}

impl Ingestor {
    pub fn new(
        store: Arc<StateStore>,
        modes: Arc<ModeTracker>,
        hazards: Arc<HazardMonitor>,
        bus: EventBus,
        telemetry_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            modes,
            hazards,
            bus,
            telemetry_topic: telemetry_topic.into(),
            stats: IngestStats::default(),
            active_hazards: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn telemetry_topic(&self) -> &str {
        &self.telemetry_topic
    }

    /// Process one inbound message.
    ///
    /// Returns the store sequence number of the accepted reading.  Messages
    /// on a foreign topic fail with [`FermentError::Channel`]; undecodable
    /// payloads fail with [`FermentError::Parse`] after a
    /// [`EventPayload::ReadingRejected`] event is published.
    pub fn ingest(&self, message: &InboundMessage) -> Result<u64, FermentError> {
        if message.topic != self.telemetry_topic {
            self.stats.ignored.fetch_add(1, Ordering::Relaxed);
            return Err(FermentError::Channel(format!(
                "unexpected topic '{}'",
                message.topic
            )));
        }

        let reading = match normalizer::parse(&message.payload) {
            Ok(reading) => reading,
            Err(err) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                self.emit(
                    Topic::Telemetry,
                    EventPayload::ReadingRejected {
                        reason: err.to_string(),
                    },
                );
                return Err(err);
            }
        };

        let sequence = self.store.apply_reading(&reading);
        self.modes.on_reading(&reading.mode);
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        let hazards = self.hazards.check(&reading);
        self.raise_new_hazards(&reading, hazards);

        Ok(sequence)
    }

    /// Publish a hazard only when its rule was quiet on the previous reading.
    fn raise_new_hazards(&self, reading: &Reading, hazards: Vec<Hazard>) {
        let mut active = self
            .active_hazards
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let now: BTreeSet<String> = hazards.iter().map(|h| h.rule.clone()).collect();
        for cleared in active.difference(&now) {
            info!(rule = %cleared, temperature = reading.temperature, "hazard cleared");
        }
        for hazard in hazards {
            if active.contains(&hazard.rule) {
                continue;
            }
            warn!(rule = %hazard.rule, temperature = hazard.temperature, "{}", hazard.message);
            self.emit(Topic::Alerts, EventPayload::Hazard(hazard));
        }
        *active = now;
    }

    fn emit(&self, topic: Topic, payload: EventPayload) {
        if let Err(e) = self.bus.publish_to(topic, Event::new(SOURCE, payload)) {
            trace!(error = %e, "event not observed");
        }
    }
}

/// Drain `inbound` on a background task, feeding every message to
/// `ingestor`.  The task ends when the transport drops its sender.
pub fn spawn_ingestion(inbound: Inbound, ingestor: Arc<Ingestor>) -> JoinHandle<()> {
    inbound.on_message(move |message| match ingestor.ingest(&message) {
        Ok(sequence) => debug!(sequence, topic = %message.topic, "reading accepted"),
        Err(FermentError::Parse(reason)) => {
            warn!(topic = %message.topic, %reason, "telemetry dropped")
        }
        Err(e) => debug!(topic = %message.topic, error = %e, "message ignored"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferment_kernel::{Freshness, OutOfTargetRangeRule};
    use ferment_middleware::LoopbackTransport;
    use std::time::Duration;

    const TOPIC: &str = "farm/pub/dht";

    fn ingestor(bus: &EventBus) -> Ingestor {
        Ingestor::new(
            Arc::new(StateStore::new()),
            Arc::new(ModeTracker::new()),
            Arc::new(HazardMonitor::with_max_temperature(40.0)),
            bus.clone(),
            TOPIC,
        )
    }

    fn message(payload: &str) -> InboundMessage {
        InboundMessage::new(TOPIC, payload.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn well_formed_payload_updates_status_and_history() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let ingestor = ingestor(&bus);

        let seq = ingestor
            .ingest(&message(
                r#"{"temperature":25.5,"humidity":60,"mode":"ROTI","target_min":24,"target_max":28}"#,
            ))
            .unwrap();
        assert_eq!(seq, 1);

        let view = ingestor.store.read_snapshot();
        assert_eq!(view.status.temp, 25.5);
        assert_eq!(view.status.hum, 60.0);
        assert_eq!(view.status.mode, "ROTI");
        assert_eq!(view.status.range, "24-28 °C");
        assert_eq!(view.history.len(), 1);
        assert_eq!(view.history[0].temp, 25.5);
        assert_eq!(view.history[0].time.len(), 8);
        assert_eq!(ingestor.modes.snapshot().reported, "ROTI");

        // A clean reading is carried by frames, not by bus events.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn hot_reading_without_mode_raises_one_alert() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::Alerts);
        let ingestor = ingestor(&bus);

        ingestor.ingest(&message(r#"{"temperature":45,"humidity":50}"#)).unwrap();

        let view = ingestor.store.read_snapshot();
        assert_eq!(view.status.mode, "NONE");
        assert_eq!(view.status.range, "0-0 °C");

        let event = alerts.recv().await.unwrap();
        match event.payload {
            EventPayload::Hazard(hazard) => {
                assert_eq!(hazard.rule, "over_temperature");
                assert_eq!(hazard.temperature, 45.0);
            }
            other => panic!("expected hazard, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hazard_alerts_fire_on_transition_only() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::Alerts);
        let ingestor = ingestor(&bus);

        for payload in [
            r#"{"temperature":41}"#,
            r#"{"temperature":42}"#,
            r#"{"temperature":30}"#,
            r#"{"temperature":43}"#,
        ] {
            ingestor.ingest(&message(payload)).unwrap();
        }

        let mut raised = Vec::new();
        while let Ok(event) = alerts.try_recv() {
            if let EventPayload::Hazard(h) = event.payload {
                raised.push(h.temperature);
            }
        }
        assert_eq!(raised, vec![41.0, 43.0]);
    }

    #[tokio::test]
    async fn each_rule_transitions_independently() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::Alerts);
        let mut monitor = HazardMonitor::with_max_temperature(40.0);
        monitor.add_rule(Box::new(OutOfTargetRangeRule { tolerance: 0.0 }));
        let ingestor = Ingestor::new(
            Arc::new(StateStore::new()),
            Arc::new(ModeTracker::new()),
            Arc::new(monitor),
            bus.clone(),
            TOPIC,
        );

        ingestor
            .ingest(&message(r#"{"temperature":38,"mode":"BIR","target_min":18,"target_max":22}"#))
            .unwrap();
        ingestor
            .ingest(&message(r#"{"temperature":44,"mode":"BIR","target_min":18,"target_max":22}"#))
            .unwrap();

        let mut rules = Vec::new();
        while let Ok(event) = alerts.try_recv() {
            if let EventPayload::Hazard(h) = event.payload {
                rules.push(h.rule);
            }
        }
        assert_eq!(rules, ["out_of_target_range", "over_temperature"]);
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected_and_state_untouched() {
        let bus = EventBus::default();
        let mut telemetry = bus.subscribe_to(Topic::Telemetry);
        let ingestor = ingestor(&bus);

        let err = ingestor.ingest(&message("{\"temperature\":")).unwrap_err();
        assert!(matches!(err, FermentError::Parse(_)));

        let view = ingestor.store.read_snapshot();
        assert!(!view.has_data());
        assert!(view.history.is_empty());
        assert_eq!(ingestor.stats().rejected(), 1);
        assert_eq!(ingestor.stats().accepted(), 0);

        let event = telemetry.recv().await.unwrap();
        assert!(matches!(event.payload, EventPayload::ReadingRejected { .. }));
        assert_eq!(event.source, SOURCE);
    }

    #[test]
    fn foreign_topic_is_ignored() {
        let bus = EventBus::default();
        let ingestor = ingestor(&bus);

        let err = ingestor
            .ingest(&InboundMessage::new("farm/sub/led", b"ROTI".to_vec()))
            .unwrap_err();
        assert!(matches!(err, FermentError::Channel(_)));
        assert_eq!(ingestor.stats().ignored(), 1);
        assert!(!ingestor.store.read_snapshot().has_data());
    }

    #[tokio::test]
    async fn background_task_drains_transport_and_survives_bad_input() {
        let (transport, inbound) = LoopbackTransport::new(16);
        let bus = EventBus::default();
        let ingestor = Arc::new(ingestor(&bus));
        let handle = spawn_ingestion(inbound, Arc::clone(&ingestor));

        transport.inject(TOPIC, b"not json".to_vec()).await.unwrap();
        for n in 0..25 {
            let payload = format!(r#"{{"temperature":{n},"humidity":50,"mode":"TEMPE"}}"#);
            transport.inject(TOPIC, payload.into_bytes()).await.unwrap();
        }
        drop(transport);
        handle.await.unwrap();

        let view = ingestor.store.read_snapshot();
        assert_eq!(view.history.len(), 20);
        assert_eq!(view.history.first().map(|e| e.temp), Some(5.0));
        assert_eq!(view.status.temp, 24.0);
        assert_eq!(view.freshness(Duration::from_secs(30)), Freshness::Live);
        assert_eq!(ingestor.stats().accepted(), 25);
        assert_eq!(ingestor.stats().rejected(), 1);
    }
}
