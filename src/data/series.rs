//! Bounded rolling time series for charting.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default capacity of a per-source series.
pub const DEFAULT_SERIES_CAPACITY: usize = 3600;

/// One charted point: unix timestamp in milliseconds and value.
///
/// Field names follow the chart convention (`x`, `y`) so persisted series can
/// be handed to a plotting layer unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub x: u64,
    pub y: f64,
}

impl SeriesPoint {
    pub fn new(x: u64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Insertion-ordered series holding at most `capacity` points.
///
/// Appends go to the tail; overflow evicts from the head, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingSeries {
    points: VecDeque<SeriesPoint>,
    capacity: usize,
}

impl RollingSeries {
    /// Create an empty series. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a point, evicting the oldest one if the series is full.
    pub fn append(&mut self, timestamp: u64, value: f64) {
        self.points.push_back(SeriesPoint::new(timestamp, value));
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    /// Copy out the full ordered sequence.
    pub fn snapshot(&self) -> Vec<SeriesPoint> {
        self.points.iter().copied().collect()
    }

    /// Replace the contents wholesale, keeping only the newest `capacity` points.
    pub fn restore(&mut self, points: Vec<SeriesPoint>) {
        let skip = points.len().saturating_sub(self.capacity);
        self.points = points.into_iter().skip(skip).collect();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent point.
    pub fn latest(&self) -> Option<&SeriesPoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeriesPoint> {
        self.points.iter()
    }

    /// The last `width` values scaled to 0-7 for 8-level sparkline display.
    ///
    /// Returns an empty Vec if there's not enough history.
    pub fn sparkline(&self, width: usize) -> Vec<u8> {
        if self.points.len() < 2 || width == 0 {
            return Vec::new();
        }

        let skip = self.points.len().saturating_sub(width);
        let values: Vec<f64> = self.points.iter().skip(skip).map(|p| p.y).collect();

        let max = values.iter().copied().fold(f64::MIN, f64::max);
        let min = values.iter().copied().fold(f64::MAX, f64::min);
        let range = max - min;

        values
            .iter()
            .map(|&v| {
                if range <= f64::EPSILON {
                    return 3;
                }
                let normalized = ((v - min) / range * 7.0) as u8;
                normalized.min(7)
            })
            .collect()
    }
}
