//! Data models and processing for node telemetry.
//!
//! This module turns decoded feed payloads into per-node state and the
//! cross-node aggregate suitable for display.
//!
//! ## Submodules
//!
//! - [`duration`]: Parsing and formatting of duration strings (e.g., "1s", "500ms")
//! - [`proximity`]: Plant height fusion from the three proximity flags
//! - [`metric`]: Payload normalization into tagged [`MetricValue`]s
//! - [`series`]: Bounded [`RollingSeries`] for charts
//! - [`liveness`]: Online/offline state machine per source
//! - [`registry`]: The [`NodeRegistry`] of every known source
//! - [`aggregate`]: Running averages over active sources ([`Aggregator`])
//!
//! ## Data Flow
//!
//! ```text
//! payload (JSON object)
//!        │
//!        ▼
//! normalize()
//!        │
//!        ▼
//! NodeRegistry::ingest() ──▶ Liveness::observe() + RollingSeries::append()
//!        │
//!        ▼
//! Aggregator::recompute() (per live delivery and on the scheduler tick)
//! ```

pub mod aggregate;
pub mod duration;
pub mod liveness;
pub mod metric;
pub mod proximity;
pub mod registry;
pub mod series;

pub use aggregate::{Aggregate, AggregateSnapshot, AggregateStatus, Aggregator};
pub use liveness::{Liveness, LivenessStatus, Transition};
pub use metric::{normalize, MetricKind, MetricValue, NormalizedMetric, NormalizedMetrics, SourceRole};
pub use proximity::{HeightReading, SensorFault};
pub use registry::{IngestOutcome, NodeRegistry, Source, SourceSnapshot};
pub use series::{RollingSeries, SeriesPoint};
