//! Cross-source running averages.
//!
//! The aggregate is a pseudo-source whose metrics are recomputed from
//! scratch on every call to [`Aggregator::recompute`]: each numeric metric is
//! the arithmetic mean over the active sources that currently report a
//! numeric value for it. A source missing a field, or whose value was
//! withheld (inconsistent plant height), is left out of that field's
//! numerator and denominator alike.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::registry::{NodeRegistry, Source};
use super::series::{RollingSeries, SeriesPoint};

/// Default capacity of each aggregate series.
pub const DEFAULT_AGGREGATE_CAPACITY: usize = 300;

/// State of the aggregate pseudo-source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregateStatus {
    /// No eligible source has ever reported.
    #[default]
    NoSourcesSeen,
    /// Sources are known but none is currently active.
    NoActiveSources,
    /// Averages were computed over this many active sources.
    Averaging { active: usize },
}

impl AggregateStatus {
    pub fn active_count(&self) -> usize {
        match self {
            AggregateStatus::Averaging { active } => *active,
            _ => 0,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, AggregateStatus::Averaging { .. })
    }
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateStatus::NoSourcesSeen => f.write_str("no sources seen yet"),
            AggregateStatus::NoActiveSources => f.write_str("no active sources"),
            AggregateStatus::Averaging { active: 1 } => f.write_str("average of 1 active source"),
            AggregateStatus::Averaging { active } => {
                write!(f, "average of {} active sources", active)
            }
        }
    }
}

/// The aggregate pseudo-source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub status: AggregateStatus,
    /// Latest means. Retained for display while no source is active.
    pub metrics: BTreeMap<String, f64>,
    pub series: BTreeMap<String, RollingSeries>,
    /// Time of the last successful averaging pass.
    pub updated_at: Option<u64>,
}

/// Persisted form of the [`Aggregate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    pub online: bool,
    pub status_text: String,
    pub active_count: usize,
    pub updated_at: Option<u64>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub series: BTreeMap<String, Vec<SeriesPoint>>,
}

/// Computes the aggregate over the registry.
#[derive(Debug, Clone)]
pub struct Aggregator {
    exclusions: BTreeSet<String>,
    timeout_ms: u64,
    capacity: usize,
    aggregate: Aggregate,
}

impl Aggregator {
    /// Create an aggregator using the liveness timeout and series capacity.
    pub fn new(timeout: Duration, capacity: usize) -> Self {
        Self {
            exclusions: BTreeSet::new(),
            timeout_ms: timeout.as_millis() as u64,
            capacity,
            aggregate: Aggregate::default(),
        }
    }

    /// Source ids never included in averages.
    pub fn with_exclusions<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn is_excluded(&self, id: &str) -> bool {
        self.exclusions.contains(id)
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    /// Non-excluded sources active at `now`.
    pub fn active_sources<'a>(&self, registry: &'a NodeRegistry, now: u64) -> Vec<&'a Source> {
        registry
            .iter()
            .filter(|s| !self.is_excluded(&s.id))
            .filter(|s| s.liveness.is_active(now, self.timeout_ms))
            .collect()
    }

    /// Recompute the averages from the current registry state.
    pub fn recompute(&mut self, registry: &NodeRegistry, now: u64) -> &Aggregate {
        let active = self.active_sources(registry, now);

        let status = if active.is_empty() {
            let any_seen = registry
                .iter()
                .any(|s| !self.is_excluded(&s.id) && s.liveness.ever_seen());
            if any_seen {
                AggregateStatus::NoActiveSources
            } else {
                AggregateStatus::NoSourcesSeen
            }
        } else {
            AggregateStatus::Averaging {
                active: active.len(),
            }
        };

        if status != self.aggregate.status {
            info!(status = %status, "aggregate status changed");
        }
        self.aggregate.status = status;

        if active.is_empty() {
            return &self.aggregate;
        }

        let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for source in &active {
            for (key, metric) in &source.metrics {
                if let Some(value) = metric.value.as_number() {
                    let entry = sums.entry(key.as_str()).or_insert((0.0, 0));
                    entry.0 += value;
                    entry.1 += 1;
                }
            }
        }

        let capacity = self.capacity;
        let mut means = BTreeMap::new();
        for (key, (sum, count)) in sums {
            let mean = sum / count as f64;
            self.aggregate
                .series
                .entry(key.to_string())
                .or_insert_with(|| RollingSeries::new(capacity))
                .append(now, mean);
            means.insert(key.to_string(), mean);
        }

        self.aggregate.metrics = means;
        self.aggregate.updated_at = Some(now);
        &self.aggregate
    }

    /// Serialize the aggregate.
    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            online: self.aggregate.status.is_online(),
            status_text: self.aggregate.status.to_string(),
            active_count: self.aggregate.status.active_count(),
            updated_at: self.aggregate.updated_at,
            metrics: self.aggregate.metrics.clone(),
            series: self
                .aggregate
                .series
                .iter()
                .map(|(k, s)| (k.clone(), s.snapshot()))
                .collect(),
        }
    }

    /// Replace the aggregate with a persisted one.
    ///
    /// The status is rebuilt from `online` and `activeCount`; the stored text
    /// is informational only. The next recompute supersedes it.
    pub fn restore(&mut self, snapshot: AggregateSnapshot) {
        let status = if snapshot.online && snapshot.active_count > 0 {
            AggregateStatus::Averaging {
                active: snapshot.active_count,
            }
        } else if snapshot.updated_at.is_some() {
            AggregateStatus::NoActiveSources
        } else {
            AggregateStatus::NoSourcesSeen
        };

        let capacity = self.capacity;
        self.aggregate = Aggregate {
            status,
            metrics: snapshot.metrics,
            series: snapshot
                .series
                .into_iter()
                .map(|(key, points)| {
                    let mut series = RollingSeries::new(capacity);
                    series.restore(points);
                    (key, series)
                })
                .collect(),
            updated_at: snapshot.updated_at,
        };
    }

    /// Forget every average and series.
    pub fn clear(&mut self) {
        self.aggregate = Aggregate::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::metric::{normalize, SourceRole, PROXIMITY_KEY};
    use serde_json::{json, Value};

    const TIMEOUT: Duration = Duration::from_millis(3_000);

    fn registry() -> NodeRegistry {
        NodeRegistry::new(TIMEOUT, 100).with_battery_monitor("source1")
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(TIMEOUT, 300).with_exclusions(["source1"])
    }

    fn feed(reg: &mut NodeRegistry, id: &str, payload: Value, now: u64) {
        let role = reg.role_of(id);
        reg.ingest(id, normalize(payload.as_object().unwrap(), role), false, now);
    }

    #[test]
    fn test_mean_skips_sources_missing_the_field() {
        let mut reg = registry();
        feed(&mut reg, "source2", json!({"temp_air": 20}), 0);
        feed(&mut reg, "source3", json!({"temp_air": 22}), 0);
        feed(&mut reg, "source4", json!({"lux": 300}), 0);

        let mut agg = aggregator();
        let result = agg.recompute(&reg, 100);
        assert_eq!(result.status, AggregateStatus::Averaging { active: 3 });
        assert_eq!(result.metrics["temp_air"], 21.0);
        assert_eq!(result.metrics["lux"], 300.0);
    }

    #[test]
    fn test_inconsistent_height_excluded_from_mean() {
        let mut reg = registry();
        feed(&mut reg, "source2", json!({"prox1": true, "prox2": true, "prox3": false}), 0);
        feed(&mut reg, "source3", json!({"prox1": false, "prox2": false, "prox3": false}), 0);
        feed(&mut reg, "source4", json!({"prox1": true, "prox2": false, "prox3": true}), 0);

        let mut agg = aggregator();
        let result = agg.recompute(&reg, 0);
        assert_eq!(result.metrics[PROXIMITY_KEY], 5.0);
        assert_eq!(result.status.active_count(), 3);
    }

    #[test]
    fn test_excluded_source_never_contributes() {
        let mut reg = registry();
        feed(&mut reg, "source1", json!({"lux": 1000, "voltage": 12.0}), 0);
        feed(&mut reg, "source2", json!({"lux": 10}), 0);

        let mut agg = aggregator();
        let result = agg.recompute(&reg, 0);
        assert_eq!(result.status, AggregateStatus::Averaging { active: 1 });
        assert_eq!(result.metrics["lux"], 10.0);
        assert!(!result.metrics.contains_key("voltage"));
    }

    #[test]
    fn test_only_excluded_sources_means_none_seen() {
        let mut reg = registry();
        feed(&mut reg, "source1", json!({"lux": 1000}), 0);

        let mut agg = aggregator();
        assert_eq!(agg.recompute(&reg, 0).status, AggregateStatus::NoSourcesSeen);
        assert_eq!(agg.recompute(&reg, 0).status.to_string(), "no sources seen yet");
    }

    #[test]
    fn test_decay_when_sources_go_silent() {
        let mut reg = registry();
        feed(&mut reg, "source2", json!({"lux": 10}), 0);
        feed(&mut reg, "source3", json!({"lux": 30}), 2_000);

        let mut agg = aggregator();
        assert_eq!(agg.recompute(&reg, 2_000).metrics["lux"], 20.0);

        // source2 lapses without any new message
        let result = agg.recompute(&reg, 3_500);
        assert_eq!(result.status, AggregateStatus::Averaging { active: 1 });
        assert_eq!(result.metrics["lux"], 30.0);
        assert_eq!(result.series["lux"].len(), 2);
    }

    #[test]
    fn test_no_active_sources_retains_previous_values() {
        let mut reg = registry();
        feed(&mut reg, "source2", json!({"lux": 10}), 0);

        let mut agg = aggregator();
        agg.recompute(&reg, 0);
        let result = agg.recompute(&reg, 10_000);
        assert_eq!(result.status, AggregateStatus::NoActiveSources);
        assert_eq!(result.status.to_string(), "no active sources");
        assert_eq!(result.metrics["lux"], 10.0);
        assert_eq!(result.series["lux"].len(), 1);
        assert_eq!(result.updated_at, Some(0));
    }

    #[test]
    fn test_stale_but_not_yet_swept_source_is_inactive() {
        let mut reg = registry();
        feed(&mut reg, "source2", json!({"lux": 10}), 0);
        assert!(reg.get("source2").unwrap().liveness.online);

        let mut agg = aggregator();
        assert_eq!(agg.recompute(&reg, 3_000).status, AggregateStatus::NoActiveSources);
    }

    #[test]
    fn test_replayed_source_not_averaged() {
        let mut reg = registry();
        let m = normalize(json!({"lux": 99}).as_object().unwrap(), SourceRole::Sensor);
        reg.ingest("source2", m, true, 0);

        let mut agg = aggregator();
        assert_eq!(agg.recompute(&reg, 10).status, AggregateStatus::NoActiveSources);
    }

    #[test]
    fn test_status_text_pluralization() {
        assert_eq!(
            AggregateStatus::Averaging { active: 1 }.to_string(),
            "average of 1 active source"
        );
        assert_eq!(
            AggregateStatus::Averaging { active: 4 }.to_string(),
            "average of 4 active sources"
        );
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let mut reg = registry();
        feed(&mut reg, "source2", json!({"lux": 10, "hum_sol": 40}), 0);
        feed(&mut reg, "source3", json!({"lux": 20}), 0);

        let mut agg = aggregator();
        agg.recompute(&reg, 0);
        agg.recompute(&reg, 1_000);

        let snapshot = agg.snapshot();
        assert_eq!(snapshot.status_text, "average of 2 active sources");
        assert_eq!(snapshot.active_count, 2);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["statusText"], "average of 2 active sources");
        assert_eq!(json["activeCount"], 2);

        let mut restored = aggregator();
        restored.restore(serde_json::from_value(json).unwrap());
        assert_eq!(restored.aggregate(), agg.aggregate());
    }
}
