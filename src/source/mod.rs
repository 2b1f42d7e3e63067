//! Feed source abstraction for receiving telemetry deliveries.
//!
//! This module provides a trait-based abstraction for receiving feed events
//! from various transports (MQTT, replay files, network streams, in-memory
//! channels).

mod channel;
mod feed;
mod stream;

pub use channel::ChannelSource;
pub use feed::{decode_payload, parse_topic, FeedError, FeedEvent, FeedMessage, FeedRecord};
pub use stream::StreamSource;

use std::fmt::Debug;

/// Trait for receiving feed events from various transports.
///
/// # Example
///
/// ```
/// use nodewatch::{ChannelSource, FeedEvent, FeedSource};
///
/// let (tx, mut source) = ChannelSource::create("test");
/// tx.send(FeedEvent::Connected).unwrap();
/// assert_eq!(source.poll(), Some(FeedEvent::Connected));
/// ```
pub trait FeedSource: Send + Debug {
    /// Poll for the next pending event.
    ///
    /// Returns `None` when nothing is pending. This method must not block.
    fn poll(&mut self) -> Option<FeedEvent>;

    /// Returns a human-readable description of the source.
    ///
    /// Used for display in the TUI status bar.
    fn description(&self) -> &str;
}
