//! The dashboard session: one owned context per run.
//!
//! [`Dashboard`] owns the registry, the aggregator, the scheduler and the
//! optional snapshot store. Every mutation happens through `&mut self` on the
//! caller's timeline: feed events via [`Dashboard::handle`] and timers via
//! [`Dashboard::tick`]. [`Dashboard::shutdown`] cancels the timers and writes a
//! final snapshot.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::DashboardConfig;
use crate::data::{
    normalize, Aggregate, Aggregator, LivenessStatus, NodeRegistry, Source,
};
use crate::scheduler::{Scheduler, Task};
use crate::source::{decode_payload, parse_topic, FeedEvent, FeedMessage, FeedSource};
use crate::store::{self, SnapshotStore};

/// Connectivity of the feed transport.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransportStatus {
    #[default]
    Connecting,
    Connected { since: u64 },
    Error { message: String, at: u64 },
    Closed { at: u64 },
}

impl TransportStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, TransportStatus::Connected { .. })
    }

    /// Short label for the header.
    pub fn label(&self) -> &'static str {
        match self {
            TransportStatus::Connecting => "connecting",
            TransportStatus::Connected { .. } => "connected",
            TransportStatus::Error { .. } => "error",
            TransportStatus::Closed { .. } => "closed",
        }
    }
}

/// Feed counters since the session started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FeedStats {
    /// Deliveries on a telemetry topic, valid or not.
    pub routed: u64,
    /// Deliveries on any other topic.
    pub ignored: u64,
    /// Routed deliveries whose payload could not be decoded, plus feed input
    /// that never became a delivery.
    pub malformed: u64,
    /// Transport errors.
    pub errors: u64,
}

/// What one routed delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Metrics ingested for the source.
    Ingested { source: String },
    /// Payload was malformed; only liveness was refreshed.
    Malformed { source: String },
    /// Topic did not match.
    Ignored,
}

/// A live dashboard session.
#[derive(Debug)]
pub struct Dashboard {
    config: DashboardConfig,
    registry: NodeRegistry,
    aggregator: Aggregator,
    scheduler: Scheduler,
    store: Option<Box<dyn SnapshotStore>>,
    transport: TransportStatus,
    stats: FeedStats,
}

impl Dashboard {
    /// Build a session from configuration, without persistence.
    pub fn new(config: DashboardConfig) -> Self {
        let mut registry = NodeRegistry::new(config.liveness.timeout, config.series.capacity);
        if let Some(id) = &config.battery_monitor {
            registry = registry.with_battery_monitor(id.clone());
        }
        let aggregator = Aggregator::new(config.liveness.timeout, config.aggregate.capacity)
            .with_exclusions(config.aggregate.exclude.iter().cloned());
        let scheduler = Scheduler::new(config.liveness.sweep_every, config.aggregate.recompute_every);

        Self {
            config,
            registry,
            aggregator,
            scheduler,
            store: None,
            transport: TransportStatus::default(),
            stats: FeedStats::default(),
        }
    }

    /// Persist snapshots to `store` on the flush timer and at shutdown.
    pub fn with_store(mut self, store: Box<dyn SnapshotStore>) -> Self {
        self.scheduler = self.scheduler.with_flush(self.config.persistence.flush_every);
        self.store = Some(store);
        self
    }

    /// Restore persisted state, then arm the timers.
    pub fn start(&mut self, now: u64) {
        self.restore();
        self.scheduler.start(now);
        info!(sources = self.registry.len(), "dashboard started");
    }

    /// Load snapshots from the store. Returns the number of sources restored.
    ///
    /// Failures are logged; the session continues with in-memory state.
    pub fn restore(&mut self) -> usize {
        let Some(store) = self.store.as_mut() else {
            return 0;
        };
        match store::load_all(store.as_mut()) {
            Ok(restored) => {
                let count = restored.sources.len();
                self.registry.restore_all(restored.sources);
                if let Some(aggregate) = restored.aggregate {
                    self.aggregator.restore(aggregate);
                }
                if restored.discarded > 0 {
                    warn!(discarded = restored.discarded, "corrupt snapshots discarded");
                }
                info!(sources = count, "restored session state");
                count
            }
            Err(e) => {
                warn!(error = %e, "failed to read session state");
                0
            }
        }
    }

    /// Apply one feed event.
    pub fn handle(&mut self, event: FeedEvent, now: u64) -> Option<Routed> {
        match event {
            FeedEvent::Connected => {
                info!("feed connected");
                self.transport = TransportStatus::Connected { since: now };
                None
            }
            FeedEvent::Message(message) => Some(self.handle_message(message, now)),
            FeedEvent::Error(message) => {
                self.stats.errors += 1;
                warn!(error = %message, "feed error");
                self.transport = TransportStatus::Error { message, at: now };
                None
            }
            FeedEvent::Malformed(reason) => {
                self.stats.malformed += 1;
                warn!(error = %reason, "malformed feed input");
                None
            }
            FeedEvent::Closed => {
                info!("feed closed");
                self.transport = TransportStatus::Closed { at: now };
                None
            }
        }
    }

    fn handle_message(&mut self, message: FeedMessage, now: u64) -> Routed {
        let Some(id) = parse_topic(&message.topic, &self.config.topic_prefix) else {
            self.stats.ignored += 1;
            debug!(topic = %message.topic, "ignoring topic");
            return Routed::Ignored;
        };
        self.stats.routed += 1;

        // A delivery on the source's topic counts as liveness even if the
        // payload is unusable.
        let payload = match decode_payload(&message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.malformed += 1;
                warn!(topic = %message.topic, error = %e, "malformed payload");
                self.registry.touch(&id, message.retained, now);
                return Routed::Malformed { source: id };
            }
        };

        let metrics = normalize(&payload, self.registry.role_of(&id));
        self.registry.ingest(&id, metrics, message.retained, now);
        if !message.retained && !self.aggregator.is_excluded(&id) {
            self.aggregator.recompute(&self.registry, now);
        }
        Routed::Ingested { source: id }
    }

    /// Drain every pending event from `source`. Returns how many were applied.
    pub fn drain(&mut self, source: &mut dyn FeedSource, now: u64) -> usize {
        let mut applied = 0;
        while let Some(event) = source.poll() {
            self.handle(event, now);
            applied += 1;
        }
        applied
    }

    /// Run the timers due at `now`.
    pub fn tick(&mut self, now: u64) -> Vec<Task> {
        let tasks = self.scheduler.due(now);
        for task in &tasks {
            match task {
                Task::Sweep => {
                    self.registry.sweep(now);
                }
                Task::Recompute => {
                    self.aggregator.recompute(&self.registry, now);
                }
                Task::Flush => {
                    self.flush();
                }
            }
        }
        tasks
    }

    /// Write snapshots to the store. Returns `false` without a store or when
    /// any entry failed to save.
    pub fn flush(&mut self) -> bool {
        let Some(store) = self.store.as_mut() else {
            return false;
        };
        let report = store::save_all(store.as_mut(), &self.registry, &self.aggregator);
        if !report.is_complete() {
            warn!(failed = report.failed, written = report.written, "session state partly saved");
        }
        report.is_complete()
    }

    /// Cancel the timers and write a final snapshot.
    pub fn shutdown(&mut self) {
        self.scheduler.stop();
        self.flush();
        info!("dashboard stopped");
    }

    /// Forget every source, the aggregate and the persisted state.
    pub fn clear(&mut self) {
        self.registry.clear();
        self.aggregator.clear();
        if let Some(store) = self.store.as_mut() {
            match store::clear_all(store.as_mut()) {
                Ok(removed) => info!(removed, "cleared session state"),
                Err(e) => warn!(error = %e, "failed to clear session state"),
            }
        }
    }

    /// Full state as JSON, in the persisted snapshot layout.
    pub fn export_json(&self, now: u64) -> Value {
        json!({
            "exportedAt": now,
            "transport": self.transport,
            "stats": self.stats,
            "sources": self.registry.snapshot_all(),
            "aggregate": self.aggregator.snapshot(),
        })
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn aggregate(&self) -> &Aggregate {
        self.aggregator.aggregate()
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn transport(&self) -> &TransportStatus {
        &self.transport
    }

    pub fn stats(&self) -> FeedStats {
        self.stats
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Status of the battery monitor, if one is configured.
    pub fn battery_monitor_status(&self) -> Option<LivenessStatus> {
        let id = self.registry.battery_monitor()?;
        Some(
            self.registry
                .get(id)
                .map(Source::status)
                .unwrap_or(LivenessStatus::NeverConnected),
        )
    }

    /// Sources shown in the node table: every source but the battery monitor.
    pub fn visible_sources(&self) -> Vec<&Source> {
        self.registry
            .iter()
            .filter(|s| Some(s.id.as_str()) != self.registry.battery_monitor())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AggregateStatus, MetricValue, SeriesPoint};
    use crate::store::{FileStore, MemoryStore};
    use crate::ChannelSource;

    fn message(topic: &str, payload: &str, retained: bool) -> FeedEvent {
        FeedEvent::Message(FeedMessage::new(topic, payload.as_bytes().to_vec(), retained))
    }

    fn dashboard() -> Dashboard {
        let mut dashboard = Dashboard::new(DashboardConfig::default());
        dashboard.start(0);
        dashboard
    }

    #[test]
    fn test_transport_lifecycle() {
        let mut d = dashboard();
        assert_eq!(d.transport(), &TransportStatus::Connecting);
        d.handle(FeedEvent::Connected, 10);
        assert!(d.transport().is_connected());
        d.handle(FeedEvent::Error("refused".into()), 20);
        assert_eq!(d.transport().label(), "error");
        assert_eq!(d.stats().errors, 1);
        d.handle(FeedEvent::Closed, 30);
        assert_eq!(d.transport(), &TransportStatus::Closed { at: 30 });
    }

    #[test]
    fn test_malformed_input_keeps_transport_connected() {
        let mut d = dashboard();
        d.handle(FeedEvent::Connected, 0);
        d.handle(message("source2/telemetry", r#"{"lux": 1}"#, false), 10);
        d.handle(FeedEvent::Malformed("not a record".into()), 20);
        assert!(d.transport().is_connected());
        assert_eq!(d.stats().malformed, 1);
        assert_eq!(d.stats().errors, 0);

        d.handle(message("source2/telemetry", r#"{"lux": 2}"#, false), 30);
        assert!(d.transport().is_connected());
        assert_eq!(d.registry().get("source2").unwrap().numeric("lux"), Some(2.0));
    }

    #[test]
    fn test_message_flow_and_average() {
        let mut d = dashboard();
        let routed = d.handle(message("source2/telemetry", r#"{"temp_air": 20}"#, false), 0);
        assert_eq!(routed, Some(Routed::Ingested { source: "source2".into() }));
        d.handle(message("source3/telemetry", r#"{"temp_air": 22}"#, false), 100);
        d.handle(message("source4/telemetry", r#"{"lux": 5}"#, false), 200);

        assert_eq!(d.registry().len(), 3);
        assert_eq!(d.aggregate().metrics["temp_air"], 21.0);
        assert_eq!(d.aggregate().status, AggregateStatus::Averaging { active: 3 });
        assert_eq!(d.stats().routed, 3);
    }

    #[test]
    fn test_ignored_topics() {
        let mut d = dashboard();
        assert_eq!(
            d.handle(message("source2/status", "{}", false), 0),
            Some(Routed::Ignored)
        );
        assert_eq!(
            d.handle(message("weather/telemetry", "{}", false), 0),
            Some(Routed::Ignored)
        );
        assert!(d.registry().is_empty());
        assert_eq!(d.stats().ignored, 2);
    }

    #[test]
    fn test_malformed_payload_refreshes_liveness_only() {
        let mut d = dashboard();
        d.handle(message("source2/telemetry", r#"{"lux": 5}"#, false), 0);
        let routed = d.handle(message("source2/telemetry", "{lux:", false), 2_500);
        assert_eq!(routed, Some(Routed::Malformed { source: "source2".into() }));

        let source = d.registry().get("source2").unwrap();
        assert_eq!(source.liveness.last_seen_at, Some(2_500));
        assert_eq!(source.numeric("lux"), Some(5.0));
        assert_eq!(d.stats().malformed, 1);

        // still online past the original timeout thanks to the refresh
        d.tick(4_000);
        assert!(d.registry().get("source2").unwrap().liveness.online);
    }

    #[test]
    fn test_malformed_payload_does_not_affect_other_sources() {
        let mut d = dashboard();
        d.handle(message("source2/telemetry", r#"{"lux": 5}"#, false), 0);
        d.handle(message("source3/telemetry", "\u{0}garbage", false), 0);
        assert_eq!(d.registry().get("source2").unwrap().numeric("lux"), Some(5.0));
        assert!(d.registry().get("source3").unwrap().metrics.is_empty());
    }

    #[test]
    fn test_retained_message_does_not_promote() {
        let mut d = dashboard();
        d.handle(message("source5/telemetry", r#"{"lux": 50}"#, true), 0);
        let source = d.registry().get("source5").unwrap();
        assert!(!source.liveness.online);
        assert_eq!(source.numeric("lux"), Some(50.0));
        assert_eq!(d.aggregate().status, AggregateStatus::NoSourcesSeen);

        d.tick(1_000);
        assert_eq!(d.aggregate().status, AggregateStatus::NoActiveSources);
    }

    #[test]
    fn test_battery_monitor_role_and_exclusion() {
        let mut d = dashboard();
        assert_eq!(d.battery_monitor_status(), Some(LivenessStatus::NeverConnected));

        d.handle(
            message("source1/telemetry", r#"{"voltage": 12.4, "current": 1.5, "prox1": true}"#, false),
            0,
        );
        d.handle(message("source2/telemetry", r#"{"voltage": 3.3}"#, false), 0);

        let monitor = d.registry().get("source1").unwrap();
        assert_eq!(
            monitor.metrics["battery_status"].value,
            MetricValue::Text("charging".into())
        );
        assert!(d.battery_monitor_status().unwrap().is_online());
        assert_eq!(d.aggregate().metrics["voltage"], 3.3);
        assert_eq!(d.visible_sources().len(), 1);
    }

    #[test]
    fn test_timers_sweep_and_decay() {
        let mut d = dashboard();
        d.handle(message("source2/telemetry", r#"{"lux": 10}"#, false), 0);
        d.handle(message("source3/telemetry", r#"{"lux": 30}"#, false), 0);

        assert_eq!(d.tick(1_000), vec![Task::Sweep, Task::Recompute]);
        d.handle(message("source3/telemetry", r#"{"lux": 30}"#, false), 3_500);
        d.tick(4_000);

        assert!(!d.registry().get("source2").unwrap().liveness.online);
        assert_eq!(d.aggregate().metrics["lux"], 30.0);
        assert_eq!(d.aggregate().status.active_count(), 1);
    }

    #[test]
    fn test_persistence_roundtrip_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = Dashboard::new(DashboardConfig::default())
            .with_store(Box::new(FileStore::new(dir.path())));
        d.start(0);
        for (t, lux) in [(0u64, 100), (1_000, 110), (2_000, 120)] {
            d.handle(message("source2/telemetry", &format!(r#"{{"lux": {}}}"#, lux), false), t);
        }
        d.shutdown();

        let mut restored = Dashboard::new(DashboardConfig::default())
            .with_store(Box::new(FileStore::new(dir.path())));
        restored.start(2_000);
        let source = restored.registry().get("source2").unwrap();
        assert!(source.liveness.online);
        assert_eq!(
            source.series["lux"].snapshot(),
            vec![
                SeriesPoint::new(0, 100.0),
                SeriesPoint::new(1_000, 110.0),
                SeriesPoint::new(2_000, 120.0),
            ]
        );
        assert_eq!(restored.aggregate().metrics["lux"], 120.0);
        assert_eq!(restored.aggregate().series["lux"].len(), 3);
    }

    #[test]
    fn test_flush_timer_and_shutdown() {
        let mut d = Dashboard::new(DashboardConfig::default()).with_store(Box::new(MemoryStore::new()));
        d.start(0);
        d.handle(message("source2/telemetry", r#"{"lux": 1}"#, false), 0);
        assert!(d.tick(3_000).contains(&Task::Flush));

        d.shutdown();
        assert!(!d.is_running());
        assert!(d.tick(10_000).is_empty());
    }

    #[test]
    fn test_dotted_prefix_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = DashboardConfig {
            topic_prefix: "node.".to_string(),
            ..DashboardConfig::default()
        };
        let mut d = Dashboard::new(config.clone()).with_store(Box::new(FileStore::new(dir.path())));
        d.start(0);
        d.handle(message("node.2/telemetry", r#"{"lux": 5}"#, false), 0);
        assert!(d.flush());
        assert!(dir.path().join("nodewatch_aggregate.json").exists());

        let mut restored = Dashboard::new(config).with_store(Box::new(FileStore::new(dir.path())));
        restored.start(100);
        assert!(restored.registry().get("node.2").is_some());
    }

    #[test]
    fn test_flush_without_store() {
        let mut d = dashboard();
        assert!(!d.has_store());
        assert!(!d.flush());
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut d = Dashboard::new(DashboardConfig::default()).with_store(Box::new(MemoryStore::new()));
        d.start(0);
        d.handle(message("source2/telemetry", r#"{"lux": 1}"#, false), 0);
        d.flush();
        d.clear();
        assert!(d.registry().is_empty());
        assert!(d.aggregate().metrics.is_empty());
        assert_eq!(d.restore(), 0);
    }

    #[test]
    fn test_drain_channel_source() {
        let (tx, mut source) = ChannelSource::create("test");
        tx.send(FeedEvent::Connected).unwrap();
        tx.send(message("source2/telemetry", r#"{"lux": 1}"#, false)).unwrap();

        let mut d = dashboard();
        assert_eq!(d.drain(&mut source, 0), 2);
        assert!(d.transport().is_connected());
        assert_eq!(d.registry().len(), 1);
    }

    #[test]
    fn test_export_layout() {
        let mut d = dashboard();
        d.handle(message("source2/telemetry", r#"{"lux": 1}"#, false), 0);
        let export = d.export_json(5);
        assert_eq!(export["exportedAt"], 5);
        assert_eq!(export["sources"][0]["id"], "source2");
        assert_eq!(export["aggregate"]["activeCount"], 1);
        assert_eq!(export["transport"]["state"], "connecting");
        assert_eq!(export["stats"]["routed"], 1);
    }
}
