//! Registry of known sources with their liveness, latest metrics and series.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::liveness::{Liveness, LivenessStatus, Transition};
use super::metric::{MetricValue, NormalizedMetric, NormalizedMetrics, SourceRole};
use super::proximity::SensorFault;
use super::series::{RollingSeries, SeriesPoint, DEFAULT_SERIES_CAPACITY};

/// Default liveness timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3_000);

/// One originating node.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: String,
    pub role: SourceRole,
    pub liveness: Liveness,
    /// Latest value of every metric ever reported, numeric or textual.
    pub metrics: NormalizedMetrics,
    /// One series per numeric metric, created on its first numeric value.
    pub series: BTreeMap<String, RollingSeries>,
}

impl Source {
    fn new(id: &str, role: SourceRole) -> Self {
        Self {
            id: id.to_string(),
            role,
            liveness: Liveness::new(),
            metrics: NormalizedMetrics::new(),
            series: BTreeMap::new(),
        }
    }

    /// Derived display status.
    pub fn status(&self) -> LivenessStatus {
        self.liveness.status()
    }

    /// Latest numeric value of a metric, if it was observed and not withheld.
    pub fn numeric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).and_then(|m| m.value.as_number())
    }

    /// First sensor fault among the latest metrics.
    pub fn fault(&self) -> Option<SensorFault> {
        self.metrics.values().find_map(|m| m.value.fault())
    }
}

/// Result of feeding one delivery into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    /// The source was unknown before this delivery.
    pub created: bool,
    pub transition: Option<Transition>,
}

/// Persisted form of a [`Source`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnapshot {
    pub id: String,
    #[serde(flatten)]
    pub liveness: Liveness,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricValue>,
    #[serde(default)]
    pub series: BTreeMap<String, Vec<SeriesPoint>>,
}

/// Owns every known [`Source`].
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    sources: BTreeMap<String, Source>,
    timeout_ms: u64,
    series_capacity: usize,
    battery_monitor: Option<String>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_SERIES_CAPACITY)
    }
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new(timeout: Duration, series_capacity: usize) -> Self {
        Self {
            sources: BTreeMap::new(),
            timeout_ms: timeout.as_millis() as u64,
            series_capacity,
            battery_monitor: None,
        }
    }

    /// Designate the source id that reports as the battery monitor.
    pub fn with_battery_monitor(mut self, id: impl Into<String>) -> Self {
        self.battery_monitor = Some(id.into());
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn battery_monitor(&self) -> Option<&str> {
        self.battery_monitor.as_deref()
    }

    /// Role of a source id.
    pub fn role_of(&self, id: &str) -> SourceRole {
        if self.battery_monitor.as_deref() == Some(id) {
            SourceRole::BatteryMonitor
        } else {
            SourceRole::Sensor
        }
    }

    fn entry(&mut self, id: &str) -> (&mut Source, bool) {
        let role = self.role_of(id);
        let mut created = false;
        let source = self.sources.entry(id.to_string()).or_insert_with(|| {
            info!(source = %id, "new source");
            created = true;
            Source::new(id, role)
        });
        (source, created)
    }

    /// Record a delivery that carried no usable metrics.
    pub fn touch(&mut self, id: &str, replay: bool, now: u64) -> IngestOutcome {
        let (source, created) = self.entry(id);
        let transition = source.liveness.observe(now, replay);
        log_transition(id, transition);
        IngestOutcome {
            created,
            transition,
        }
    }

    /// Merge a normalized metric set into a source.
    ///
    /// Numeric values are appended to the metric's series; textual and
    /// withheld values only replace the latest value. Metrics absent from
    /// this delivery keep their previous value.
    pub fn ingest(
        &mut self,
        id: &str,
        metrics: NormalizedMetrics,
        replay: bool,
        now: u64,
    ) -> IngestOutcome {
        let capacity = self.series_capacity;
        let (source, created) = self.entry(id);
        let transition = source.liveness.observe(now, replay);

        for (key, metric) in metrics {
            if let Some(value) = metric.value.as_number() {
                source
                    .series
                    .entry(key.clone())
                    .or_insert_with(|| RollingSeries::new(capacity))
                    .append(now, value);
            }
            source.metrics.insert(key, metric);
        }

        log_transition(id, transition);
        IngestOutcome {
            created,
            transition,
        }
    }

    /// Apply the timeout rule to every source.
    pub fn sweep(&mut self, now: u64) -> Vec<(String, Transition)> {
        let timeout = self.timeout_ms;
        let mut transitions = Vec::new();
        for (id, source) in &mut self.sources {
            if let Some(t) = source.liveness.sweep(now, timeout) {
                log_transition(id, Some(t));
                transitions.push((id.clone(), t));
            }
        }
        transitions
    }

    /// Serialize every source.
    pub fn snapshot_all(&self) -> Vec<SourceSnapshot> {
        self.sources.values().map(snapshot_source).collect()
    }

    /// Serialize one source.
    pub fn snapshot(&self, id: &str) -> Option<SourceSnapshot> {
        self.sources.get(id).map(snapshot_source)
    }

    /// Rebuild sources from snapshots, replacing any with the same id.
    ///
    /// Liveness records are re-normalized and labels re-derived, so status
    /// text comes from the state machine rather than from stored text.
    pub fn restore_all(&mut self, snapshots: Vec<SourceSnapshot>) {
        for snapshot in snapshots {
            let role = self.role_of(&snapshot.id);
            let metrics = snapshot
                .metrics
                .into_iter()
                .map(|(key, value)| {
                    let metric = NormalizedMetric::new(&key, value, role);
                    (key, metric)
                })
                .collect();
            let series = snapshot
                .series
                .into_iter()
                .map(|(key, points)| {
                    let mut series = RollingSeries::new(self.series_capacity);
                    series.restore(points);
                    (key, series)
                })
                .collect();

            debug!(source = %snapshot.id, "restored source");
            self.sources.insert(
                snapshot.id.clone(),
                Source {
                    id: snapshot.id,
                    role,
                    liveness: snapshot.liveness.normalized(),
                    metrics,
                    series,
                },
            );
        }
    }

    /// Seed a metric series from externally fetched history.
    ///
    /// Creates the source (never seen) if it is unknown.
    pub fn seed_series(&mut self, id: &str, metric: &str, points: Vec<SeriesPoint>) {
        let capacity = self.series_capacity;
        let (source, _) = self.entry(id);
        source
            .series
            .entry(metric.to_string())
            .or_insert_with(|| RollingSeries::new(capacity))
            .restore(points);
    }

    pub fn get(&self, id: &str) -> Option<&Source> {
        self.sources.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Count sources currently online.
    pub fn online_count(&self) -> usize {
        self.sources.values().filter(|s| s.liveness.online).count()
    }

    /// Drop every source.
    pub fn clear(&mut self) {
        self.sources.clear();
    }
}

fn snapshot_source(source: &Source) -> SourceSnapshot {
    SourceSnapshot {
        id: source.id.clone(),
        liveness: source.liveness.clone(),
        metrics: source
            .metrics
            .iter()
            .map(|(k, m)| (k.clone(), m.value.clone()))
            .collect(),
        series: source
            .series
            .iter()
            .map(|(k, s)| (k.clone(), s.snapshot()))
            .collect(),
    }
}

fn log_transition(id: &str, transition: Option<Transition>) {
    match transition {
        Some(Transition::CameOnline(_)) => info!(source = %id, "source online"),
        Some(Transition::WentOffline(_)) => info!(source = %id, "source offline (timeout)"),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::metric::{normalize, PROXIMITY_KEY};
    use serde_json::{json, Value};

    fn metrics(value: Value, role: SourceRole) -> NormalizedMetrics {
        normalize(value.as_object().unwrap(), role)
    }

    fn registry() -> NodeRegistry {
        NodeRegistry::new(Duration::from_millis(3_000), 3600).with_battery_monitor("source1")
    }

    #[test]
    fn test_ingest_creates_source_and_goes_online() {
        let mut reg = registry();
        let outcome = reg.ingest("source2", metrics(json!({"lux": 10}), SourceRole::Sensor), false, 0);
        assert!(outcome.created);
        assert_eq!(outcome.transition, Some(Transition::CameOnline(0)));

        let source = reg.get("source2").unwrap();
        assert!(source.liveness.online);
        assert_eq!(source.role, SourceRole::Sensor);
        assert_eq!(source.series["lux"].len(), 1);
    }

    #[test]
    fn test_role_assignment() {
        let reg = registry();
        assert_eq!(reg.role_of("source1"), SourceRole::BatteryMonitor);
        assert_eq!(reg.role_of("source3"), SourceRole::Sensor);
    }

    #[test]
    fn test_text_metrics_have_no_series() {
        let mut reg = registry();
        reg.ingest("source2", metrics(json!({"mode": "eco"}), SourceRole::Sensor), false, 0);
        let source = reg.get("source2").unwrap();
        assert!(source.series.is_empty());
        assert_eq!(source.metrics["mode"].value, MetricValue::Text("eco".into()));
    }

    #[test]
    fn test_inconsistent_height_not_charted() {
        let mut reg = registry();
        let m = metrics(json!({"prox1": true, "prox2": false, "prox3": true}), SourceRole::Sensor);
        reg.ingest("source2", m, false, 0);
        let source = reg.get("source2").unwrap();
        assert!(!source.series.contains_key(PROXIMITY_KEY));
        assert_eq!(source.fault(), Some(SensorFault::HeightSensor2));
        assert_eq!(source.numeric(PROXIMITY_KEY), None);
    }

    #[test]
    fn test_metrics_merge_across_messages() {
        let mut reg = registry();
        reg.ingest("source2", metrics(json!({"lux": 10, "hum_air": 40}), SourceRole::Sensor), false, 0);
        reg.ingest("source2", metrics(json!({"lux": 12}), SourceRole::Sensor), false, 1_000);
        let source = reg.get("source2").unwrap();
        assert_eq!(source.numeric("lux"), Some(12.0));
        assert_eq!(source.numeric("hum_air"), Some(40.0));
        assert_eq!(source.series["lux"].len(), 2);
        assert_eq!(source.series["hum_air"].len(), 1);
    }

    #[test]
    fn test_replay_updates_values_but_not_online() {
        let mut reg = registry();
        let outcome = reg.ingest("source4", metrics(json!({"lux": 5}), SourceRole::Sensor), true, 500);
        assert_eq!(outcome.transition, None);
        let source = reg.get("source4").unwrap();
        assert!(!source.liveness.online);
        assert_eq!(source.liveness.last_seen_at, Some(500));
        assert_eq!(source.numeric("lux"), Some(5.0));
    }

    #[test]
    fn test_sweep_idempotent() {
        let mut reg = registry();
        reg.ingest("source2", metrics(json!({"lux": 1}), SourceRole::Sensor), false, 0);
        reg.ingest("source3", metrics(json!({"lux": 1}), SourceRole::Sensor), false, 2_000);

        let first = reg.sweep(4_000);
        assert_eq!(first, vec![("source2".to_string(), Transition::WentOffline(4_000))]);
        let after_once: Vec<_> = reg.snapshot_all();

        assert!(reg.sweep(4_000).is_empty());
        assert_eq!(reg.snapshot_all(), after_once);
        assert_eq!(reg.online_count(), 1);
    }

    #[test]
    fn test_touch_counts_as_delivery() {
        let mut reg = registry();
        let outcome = reg.touch("source5", false, 100);
        assert!(outcome.created);
        assert!(reg.get("source5").unwrap().metrics.is_empty());
        assert!(reg.get("source5").unwrap().liveness.online);
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let mut reg = registry();
        for (t, lux) in [(0u64, 100), (1_000, 110), (2_000, 120)] {
            reg.ingest("A", metrics(json!({"lux": lux}), SourceRole::Sensor), false, t);
        }
        reg.ingest("A", metrics(json!({"mode": "eco"}), SourceRole::Sensor), false, 2_500);
        reg.ingest("A", metrics(json!({"prox1": false, "prox2": true}), SourceRole::Sensor), false, 2_800);

        let json = serde_json::to_string(&reg.snapshot_all()).unwrap();
        let mut fresh = registry();
        fresh.restore_all(serde_json::from_str(&json).unwrap());

        let original = reg.get("A").unwrap();
        let restored = fresh.get("A").unwrap();
        assert!(restored.liveness.online);
        assert_eq!(
            restored.series["lux"].snapshot(),
            vec![
                SeriesPoint::new(0, 100.0),
                SeriesPoint::new(1_000, 110.0),
                SeriesPoint::new(2_000, 120.0),
            ]
        );
        assert_eq!(restored.liveness, original.liveness);
        assert_eq!(restored.metrics, original.metrics);
        assert_eq!(restored.status(), original.status());
    }

    #[test]
    fn test_snapshot_layout() {
        let mut reg = registry();
        reg.ingest("source2", metrics(json!({"lux": 7}), SourceRole::Sensor), false, 10);
        let value = serde_json::to_value(reg.snapshot("source2").unwrap()).unwrap();
        assert_eq!(value["id"], "source2");
        assert_eq!(value["online"], true);
        assert_eq!(value["connectedAt"], 10);
        assert_eq!(value["disconnectedAt"], Value::Null);
        assert_eq!(value["lastSeenAt"], 10);
        assert_eq!(value["series"]["lux"][0], json!({"x": 10, "y": 7.0}));
    }

    #[test]
    fn test_restore_trims_to_capacity() {
        let mut reg = NodeRegistry::new(Duration::from_secs(3), 2);
        reg.restore_all(vec![SourceSnapshot {
            id: "source2".into(),
            liveness: Liveness::default(),
            metrics: BTreeMap::new(),
            series: BTreeMap::from([(
                "lux".to_string(),
                vec![SeriesPoint::new(1, 1.0), SeriesPoint::new(2, 2.0), SeriesPoint::new(3, 3.0)],
            )]),
        }]);
        assert_eq!(reg.get("source2").unwrap().series["lux"].len(), 2);
    }

    #[test]
    fn test_seed_series_from_history() {
        let mut reg = registry();
        reg.seed_series("source3", "lux", vec![SeriesPoint::new(1, 4.0)]);
        let source = reg.get("source3").unwrap();
        assert_eq!(source.series["lux"].len(), 1);
        assert!(!source.liveness.ever_seen());
    }
}
