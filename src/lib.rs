//! # nodewatch
//!
//! A live telemetry dashboard core for a fleet of sensor nodes.
//!
//! Nodes publish JSON payloads on `<prefix><digits>/telemetry` topics. The
//! crate turns that feed into per-node liveness, rolling metric histories
//! and a running cross-node average, and renders them in a terminal UI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Application                            │
//! │  ┌─────────┐    ┌───────────────────────────┐    ┌─────────┐     │
//! │  │   app   │───▶│ session::Dashboard        │───▶│   ui    │     │
//! │  │ (state) │    │  registry │ aggregator    │    │(render) │     │
//! │  └────┬────┘    │  scheduler │ store        │    └─────────┘     │
//! │       │         └───────────────────────────┘                    │
//! │       ▼                                                          │
//! │  ┌─────────┐                                                     │
//! │  │ source  │◀── StreamSource | ChannelSource | subscribe (MQTT)  │
//! │  │ (input) │                                                     │
//! │  └─────────┘                                                     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`source`]**: feed abstraction ([`FeedSource`] trait) with channel and
//!   newline-delimited stream implementations
//! - **[`data`]**: normalization, rolling series, liveness, the node registry
//!   and the aggregator
//! - **[`session`]**: [`Dashboard`], the one owned context tying data, timers
//!   and persistence together
//! - **[`store`]**: snapshot persistence behind the [`SnapshotStore`] trait
//! - **[`ui`]**: ratatui rendering of the node table, averages and overlays
//!
//! ## Usage
//!
//! ### As a CLI tool
//!
//! ```bash
//! # Subscribe to a broker
//! nodewatch --broker localhost:1883
//!
//! # Replay a recorded feed and export the resulting state
//! nodewatch --replay feed.jsonl --export state.json
//! ```
//!
//! ### As a library with a channel source
//!
//! ```
//! use nodewatch::{ChannelSource, Dashboard, DashboardConfig, FeedEvent, FeedMessage};
//!
//! let (tx, mut source) = ChannelSource::create("bridge");
//! let mut dashboard = Dashboard::new(DashboardConfig::default());
//! dashboard.start(0);
//!
//! let payload = br#"{"lux": 420, "temp_air": 21.5}"#.to_vec();
//! tx.send(FeedEvent::Message(FeedMessage::new("source2/telemetry", payload, false)))
//!     .unwrap();
//! dashboard.drain(&mut source, 1_000);
//!
//! let node = dashboard.registry().get("source2").unwrap();
//! assert!(node.status().is_online());
//! assert_eq!(dashboard.aggregate().metrics["lux"], 420.0);
//! ```
//!
//! ### As a library with a stream source (TCP, files)
//!
//! ```no_run
//! use std::io::Cursor;
//! use nodewatch::StreamSource;
//!
//! # tokio_test::block_on(async {
//! let data = br#"{"topic": "source2/telemetry", "payload": {"lux": 1}}"#;
//! let stream = Cursor::new(data.to_vec());
//! let source = StreamSource::spawn(stream, "example");
//! # });
//! ```

pub mod app;
pub mod config;
pub mod data;
pub mod events;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod store;
pub mod ui;

// MQTT transport (requires "subscribe" feature)
#[cfg(feature = "subscribe")]
pub mod subscribe;

// Re-export main types for convenience
pub use app::App;
pub use config::DashboardConfig;
pub use data::{
    Aggregate, AggregateStatus, Aggregator, LivenessStatus, MetricValue, NodeRegistry,
    RollingSeries, Source,
};
pub use session::{Dashboard, TransportStatus};
pub use source::{ChannelSource, FeedError, FeedEvent, FeedMessage, FeedSource, StreamSource};
pub use store::{FileStore, MemoryStore, SnapshotStore, StoreError};
