use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{Local, TimeZone};
use serde::{Deserialize, Deserializer};

/// Suffix to milliseconds multiplier (order matters: longer suffixes first)
const UNITS: &[(&str, f64)] = &[
    ("ms", 1.0),
    ("min", 60_000.0),
    ("s", 1_000.0),
    ("m", 60_000.0),
    ("h", 3_600_000.0),
];

/// Parse duration strings like "3s", "1000ms", "1.5s", "2min"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    for (suffix, multiplier) in UNITS {
        if let Some(val_str) = s.strip_suffix(suffix) {
            let val: f64 = val_str.trim().parse()?;
            if !val.is_finite() || val < 0.0 {
                bail!("Duration must be a non-negative number: {}", s);
            }
            return Ok(Duration::from_micros((val * multiplier * 1_000.0) as u64));
        }
    }

    bail!("Unknown duration format: {}", s)
}

/// Serde adapter so config files can spell durations as strings.
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Format an elapsed span in milliseconds, e.g. "2min 5s", "0s"
pub fn format_elapsed(ms: u64) -> String {
    let secs = ms / 1_000;
    let (h, m, s) = (secs / 3_600, (secs / 60) % 60, secs % 60);
    if h > 0 {
        format!("{}h {}min", h, m)
    } else if m > 0 && s > 0 {
        format!("{}min {}s", m, s)
    } else if m > 0 {
        format!("{}min", m)
    } else {
        format!("{}s", s)
    }
}

/// Format a unix timestamp (milliseconds) as local wall-clock time "HH:MM:SS".
pub fn format_clock(timestamp_ms: u64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms as i64).single() {
        Some(t) => t.format("%H:%M:%S").to_string(),
        None => "--:--:--".to_string(),
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
