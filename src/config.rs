//! Dashboard configuration.
//!
//! Settings come from an optional file (TOML, JSON or YAML, picked by
//! extension) layered under `NODEWATCH_*` environment variables. Nested keys
//! use a double underscore:
//!
//! ```toml
//! battery_monitor = "source1"
//!
//! [liveness]
//! timeout = "3s"
//! sweep_every = "1s"
//!
//! [aggregate]
//! exclude = ["source1"]
//!
//! [broker]
//! host = "broker.local"
//! port = 1883
//! ```
//!
//! ```bash
//! NODEWATCH_LIVENESS__TIMEOUT=5s NODEWATCH_BROKER__HOST=10.0.0.2 nodewatch
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::warn;

use crate::data::aggregate::DEFAULT_AGGREGATE_CAPACITY;
use crate::data::duration::deserialize_duration;
use crate::data::series::DEFAULT_SERIES_CAPACITY;

/// Prefix of the environment variables read by [`DashboardConfig::load`].
pub const ENV_PREFIX: &str = "NODEWATCH";

/// Top-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Topics are `<topic_prefix><digits>/telemetry`.
    pub topic_prefix: String,
    /// Source reporting with the battery monitor metric set.
    pub battery_monitor: Option<String>,
    pub liveness: LivenessConfig,
    pub series: SeriesConfig,
    pub aggregate: AggregateConfig,
    pub persistence: PersistenceConfig,
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub sweep_every: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub capacity: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub recompute_every: Duration,
    /// Source ids never averaged.
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// State directory. Persistence is disabled when unset.
    pub dir: Option<PathBuf>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub flush_every: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_filter: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub keep_alive: Duration,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "source".to_string(),
            battery_monitor: Some("source1".to_string()),
            liveness: LivenessConfig::default(),
            series: SeriesConfig::default(),
            aggregate: AggregateConfig::default(),
            persistence: PersistenceConfig::default(),
            broker: BrokerConfig::default(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            sweep_every: Duration::from_secs(1),
        }
    }
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SERIES_CAPACITY,
        }
    }
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_AGGREGATE_CAPACITY,
            recompute_every: Duration::from_secs(1),
            exclude: vec!["source1".to_string()],
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            dir: None,
            flush_every: Duration::from_secs(3),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: format!("nodewatch-{}", std::process::id()),
            username: None,
            password: None,
            topic_filter: "#".to_string(),
            keep_alive: Duration::from_secs(30),
        }
    }
}

impl DashboardConfig {
    /// Load from an optional file plus the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("aggregate.exclude")
                    .try_parsing(true),
            )
            .build()?;

        let config: DashboardConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unusable values and warn about slow detection.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.topic_prefix.is_empty(), "topic_prefix must not be empty");
        ensure!(self.series.capacity >= 1, "series.capacity must be at least 1");
        ensure!(self.aggregate.capacity >= 1, "aggregate.capacity must be at least 1");
        ensure!(!self.liveness.timeout.is_zero(), "liveness.timeout must be positive");
        ensure!(
            !self.liveness.sweep_every.is_zero(),
            "liveness.sweep_every must be positive"
        );
        ensure!(
            !self.aggregate.recompute_every.is_zero(),
            "aggregate.recompute_every must be positive"
        );
        ensure!(
            !self.persistence.flush_every.is_zero(),
            "persistence.flush_every must be positive"
        );

        if self.liveness.sweep_every > self.liveness.timeout / 2 {
            warn!(
                sweep_every = ?self.liveness.sweep_every,
                timeout = ?self.liveness.timeout,
                "sweep period exceeds half the liveness timeout; offline detection will lag"
            );
        }
        Ok(())
    }

    /// Broker address as `host:port`.
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker.host, self.broker.port)
    }
}
