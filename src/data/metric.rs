//! Metric normalization for decoded telemetry payloads.
//!
//! A payload is a flat JSON object of field name to value. Normalization
//! turns it into a [`NormalizedMetrics`] map of explicitly tagged values so
//! that nothing downstream has to probe runtime types:
//!
//! ```text
//! {"lux": 120, "temp_air": 21.4, "prox1": true, "prox2": false, "prox3": false}
//!        │
//!        ▼  normalize(payload, SourceRole::Sensor)
//! lux        → Numeric(120.0)
//! temp_air   → Numeric(21.4)
//! proximity  → Numeric(5.0)          (fused from prox1..prox3)
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::proximity::{self, HeightReading, SensorFault};

/// Key of the derived plant height metric (or, for the battery monitor, the raw flag text).
pub const PROXIMITY_KEY: &str = "proximity";
/// Key of the derived battery charge state text.
pub const BATTERY_STATUS_KEY: &str = "battery_status";
/// Reserved textual timestamp field carried by devices; never a metric.
pub const TIMESTAMP_FIELD: &str = "datetime_str";

/// Prefix shared by all raw proximity flag fields.
const FLAG_PREFIX: &str = "prox";
/// The three fused flags, bottom sensor first.
const FLAG_KEYS: [&str; 3] = ["prox1", "prox2", "prox3"];
/// Field holding the battery current draw.
const CURRENT_KEY: &str = "current";
/// Current draw (A) above which the battery is considered charging.
const CHARGING_THRESHOLD: f64 = 1.0;

/// Role of a source, which selects the metric set it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceRole {
    /// An ordinary environmental sensor node.
    #[default]
    Sensor,
    /// The distinguished battery monitor node.
    BatteryMonitor,
}

/// Whether a metric is charted or only displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Numeric,
    Text,
}

/// A single normalized metric value.
///
/// Serialized with an explicit `kind` tag so restored snapshots never have
/// to guess whether a metric was numeric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    /// A numeric reading; charted and eligible for averaging.
    Numeric(f64),
    /// A textual reading; displayed only.
    Text(String),
    /// A numeric metric whose value was withheld because its inputs disagree.
    Inconsistent(SensorFault),
}

impl MetricValue {
    /// The display kind of this value. Withheld numeric values stay numeric.
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Numeric(_) | MetricValue::Inconsistent(_) => MetricKind::Numeric,
            MetricValue::Text(_) => MetricKind::Text,
        }
    }

    /// The numeric value, if one was observed.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Numeric(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    /// The sensor fault, if the value was withheld.
    pub fn fault(&self) -> Option<SensorFault> {
        match self {
            MetricValue::Inconsistent(fault) => Some(*fault),
            _ => None,
        }
    }
}

/// A normalized metric with its display label.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMetric {
    pub value: MetricValue,
    pub label: String,
}

impl NormalizedMetric {
    /// Build a metric, deriving its label from the key and source role.
    pub fn new(key: &str, value: MetricValue, role: SourceRole) -> Self {
        Self {
            value,
            label: label_for(key, role),
        }
    }
}

/// Normalized metric set keyed by metric name.
pub type NormalizedMetrics = BTreeMap<String, NormalizedMetric>;

/// Normalize one decoded payload for a source with the given role.
///
/// Unknown fields pass through with their raw key as label; `null` fields
/// are dropped.
pub fn normalize(payload: &Map<String, Value>, role: SourceRole) -> NormalizedMetrics {
    let mut metrics = NormalizedMetrics::new();

    for (key, raw) in payload {
        if key == TIMESTAMP_FIELD || key.starts_with(FLAG_PREFIX) {
            continue;
        }
        let value = match raw {
            Value::Null => continue,
            Value::Number(n) => match n.as_f64() {
                Some(v) => MetricValue::Numeric(v),
                None => MetricValue::Text(n.to_string()),
            },
            Value::String(s) => MetricValue::Text(s.clone()),
            Value::Bool(b) => MetricValue::Text(b.to_string()),
            other => MetricValue::Text(other.to_string()),
        };
        metrics.insert(key.clone(), NormalizedMetric::new(key, value, role));
    }

    match role {
        SourceRole::Sensor => {
            if let Some(reading) = fuse_flags(payload) {
                let value = match reading {
                    HeightReading::Consistent(h) => MetricValue::Numeric(h),
                    HeightReading::Inconsistent(fault) => MetricValue::Inconsistent(fault),
                };
                metrics.insert(
                    PROXIMITY_KEY.to_string(),
                    NormalizedMetric::new(PROXIMITY_KEY, value, role),
                );
            }
        }
        SourceRole::BatteryMonitor => {
            let joined: Vec<String> = FLAG_KEYS
                .iter()
                .filter_map(|k| payload.get(*k))
                .filter(|v| !v.is_null())
                .map(raw_text)
                .collect();
            if !joined.is_empty() {
                metrics.insert(
                    PROXIMITY_KEY.to_string(),
                    NormalizedMetric::new(PROXIMITY_KEY, MetricValue::Text(joined.join(" / ")), role),
                );
            }

            if let Some(current) = payload.get(CURRENT_KEY).and_then(Value::as_f64) {
                let status = if current > CHARGING_THRESHOLD {
                    "charging"
                } else {
                    "in use"
                };
                metrics.insert(
                    BATTERY_STATUS_KEY.to_string(),
                    NormalizedMetric::new(BATTERY_STATUS_KEY, MetricValue::Text(status.into()), role),
                );
            }
        }
    }

    metrics
}

/// Fuse the proximity flags of a payload, if it carries any.
///
/// A flag missing from a payload that carries at least one flag reads as
/// inactive. Flags from earlier payloads of the same source are not merged.
fn fuse_flags(payload: &Map<String, Value>) -> Option<HeightReading> {
    let flags: Vec<Option<bool>> = FLAG_KEYS
        .iter()
        .map(|k| payload.get(*k).filter(|v| !v.is_null()).map(flag_is_set))
        .collect();

    if flags.iter().all(Option::is_none) {
        return None;
    }

    let set = |i: usize| flags[i].unwrap_or(false);
    Some(proximity::fuse(set(0), set(1), set(2)))
}

/// Interpret a raw flag value. Accepts booleans, "true"/"false" and 0/1.
fn flag_is_set(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

fn raw_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Display label for a metric key.
pub fn label_for(key: &str, role: SourceRole) -> String {
    let label = match (key, role) {
        (PROXIMITY_KEY, SourceRole::BatteryMonitor) => "Proximity 1/2/3",
        (PROXIMITY_KEY, SourceRole::Sensor) => "Plant height (cm)",
        ("voltage", _) => "Voltage (V)",
        ("current", _) => "Current (A)",
        ("lux", _) => "Illuminance (lx)",
        ("temp_air", _) => "Air temp (°C)",
        ("hum_air", _) => "Air humidity (%)",
        ("hum_sol", _) => "Soil humidity (%)",
        (BATTERY_STATUS_KEY, _) => "Battery",
        _ => key,
    };
    label.to_string()
}

/// Decimal places used when displaying a numeric metric.
fn decimals(key: &str) -> usize {
    match key {
        "voltage" | "current" => 2,
        "temp_air" => 1,
        _ => 0,
    }
}

/// Format a metric value for display.
pub fn format_value(key: &str, value: &MetricValue) -> String {
    match value {
        MetricValue::Numeric(v) if key == PROXIMITY_KEY => proximity::format_height(*v),
        MetricValue::Numeric(v) => format_number(key, *v),
        MetricValue::Text(s) => s.clone(),
        MetricValue::Inconsistent(_) => "inconsistent".to_string(),
    }
}

/// Format a bare number for a metric key.
pub fn format_number(key: &str, value: f64) -> String {
    if key == PROXIMITY_KEY {
        return proximity::format_height(value);
    }
    format!("{:.*}", decimals(key), value)
}

/// Display rank of a metric key: well-known environment metrics first.
pub fn display_rank(key: &str) -> usize {
    const ORDER: [&str; 8] = [
        "lux",
        "temp_air",
        "hum_air",
        "hum_sol",
        PROXIMITY_KEY,
        "voltage",
        "current",
        BATTERY_STATUS_KEY,
    ];
    ORDER.iter().position(|k| *k == key).unwrap_or(ORDER.len())
}

/// Sort metric keys by display rank, then alphabetically.
pub fn sort_keys<'a>(keys: impl IntoIterator<Item = &'a String>) -> Vec<&'a String> {
    let mut keys: Vec<&String> = keys.into_iter().collect();
    keys.sort_by(|a, b| display_rank(a).cmp(&display_rank(b)).then_with(|| a.cmp(b)));
    keys
}
