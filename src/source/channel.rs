//! Channel-based feed source.
//!
//! Receives feed events via a tokio mpsc channel. The MQTT subscriber and
//! tests push events; the dashboard drains them on each tick.

use tokio::sync::mpsc;

use super::{FeedEvent, FeedSource};

/// A feed source that receives events via a channel.
///
/// # Example
///
/// ```
/// use nodewatch::ChannelSource;
///
/// let (tx, source) = ChannelSource::create("mqtt://localhost:1883");
/// ```
#[derive(Debug)]
pub struct ChannelSource {
    receiver: mpsc::UnboundedReceiver<FeedEvent>,
    description: String,
    /// Set once the `Closed` event for a dropped sender has been returned.
    closed: bool,
}

impl ChannelSource {
    /// Create a new channel source.
    ///
    /// # Arguments
    ///
    /// * `receiver` - The receiving end of an unbounded channel
    /// * `source_description` - Where the events come from (e.g. "mqtt://broker:1883")
    pub fn new(receiver: mpsc::UnboundedReceiver<FeedEvent>, source_description: &str) -> Self {
        Self {
            receiver,
            description: format!("channel: {}", source_description),
            closed: false,
        }
    }

    /// Create a channel pair for sending events to a ChannelSource.
    pub fn create(source_description: &str) -> (mpsc::UnboundedSender<FeedEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx, source_description))
    }
}

impl FeedSource for ChannelSource {
    fn poll(&mut self) -> Option<FeedEvent> {
        match self.receiver.try_recv() {
            Ok(event) => {
                if event == FeedEvent::Closed {
                    self.closed = true;
                }
                Some(event)
            }
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                if self.closed {
                    None
                } else {
                    self.closed = true;
                    Some(FeedEvent::Closed)
                }
            }
        }
    }

    fn description(&self) -> &str {
        &self.description
    }
}
