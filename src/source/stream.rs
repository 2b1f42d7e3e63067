//! Stream-based feed source.
//!
//! Receives feed records from an async byte stream. This is used for replay
//! files and for TCP bridges that forward broker traffic line by line.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use super::{FeedEvent, FeedRecord, FeedSource};

/// A feed source that reads newline-delimited [`FeedRecord`]s.
///
/// This source spawns a background task that reads from the provided async
/// reader and makes events available via `poll()`. The stream reports
/// `Connected` before its first record and `Closed` at end of input. A line
/// that is not a valid record is reported as `Malformed` and skipped.
///
/// # Example with a byte stream
///
/// ```
/// use std::io::Cursor;
/// use nodewatch::StreamSource;
///
/// # tokio_test::block_on(async {
/// let data = b"{\"topic\":\"source2/telemetry\",\"payload\":{\"lux\":5}}\n";
/// let stream = Cursor::new(data.to_vec());
/// let source = StreamSource::spawn(stream, "example");
/// # });
/// ```
#[derive(Debug)]
pub struct StreamSource {
    receiver: mpsc::Receiver<FeedEvent>,
    description: String,
    closed: bool,
}

impl StreamSource {
    /// Spawn a background task that reads from the given async reader.
    pub fn spawn<R>(reader: R, description: &str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            if tx.send(FeedEvent::Connected).await.is_err() {
                return;
            }
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();

            loop {
                line.clear();
                let event = match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => {
                        let _ = tx.send(FeedEvent::Closed).await;
                        break;
                    }
                    Ok(_) => match line_event(&line) {
                        Some(event) => event,
                        None => continue,
                    },
                    Err(e) => {
                        let _ = tx.send(FeedEvent::Error(format!("Read error: {}", e))).await;
                        let _ = tx.send(FeedEvent::Closed).await;
                        break;
                    }
                };
                if tx.send(event).await.is_err() {
                    // Receiver dropped
                    break;
                }
            }
        });

        Self {
            receiver: rx,
            description: format!("stream: {}", description),
            closed: false,
        }
    }

    /// Create a StreamSource from a raw bytes channel.
    ///
    /// Each item is one encoded [`FeedRecord`]. This is useful for bridging
    /// from another bus without an `AsyncRead`.
    pub fn from_bytes_channel(mut rx: mpsc::Receiver<Vec<u8>>, description: &str) -> Self {
        let (tx, event_rx) = mpsc::channel(256);

        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                let Some(event) = line_event(&bytes) else {
                    continue;
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(FeedEvent::Closed).await;
        });

        Self {
            receiver: event_rx,
            description: format!("stream: {}", description),
            closed: false,
        }
    }
}

/// Decode one raw line. Blank lines yield `None`.
fn line_event(bytes: &[u8]) -> Option<FeedEvent> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.trim(),
        Err(e) => {
            warn!(error = %e, "skipping feed record");
            return Some(FeedEvent::Malformed(format!("Parse error: {}", e)));
        }
    };
    if text.is_empty() {
        return None;
    }
    Some(match FeedRecord::parse(text) {
        Ok(record) => FeedEvent::Message(record.into_message()),
        Err(e) => {
            warn!(error = %e, "skipping feed record");
            FeedEvent::Malformed(format!("Parse error: {}", e))
        }
    })
}

impl FeedSource for StreamSource {
    fn poll(&mut self) -> Option<FeedEvent> {
        // Try to receive without blocking
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
