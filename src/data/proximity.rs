//! Plant height fusion from the three stacked proximity sensors.
//!
//! The sensors are mounted at increasing heights, so a healthy reading
//! always activates them bottom-up. Only the four monotonic patterns yield a
//! height; every other pattern is reported as a fault on the lowest sensor
//! tier that contradicts the stacking order. Counting active flags is wrong:
//! `(false, true, false)` would read as 5 cm instead of a sensor fault.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Height reported when all three sensors are active (the plant is at least this tall).
pub const MAX_HEIGHT_CM: f64 = 15.0;

/// Which sensor tier is implicated by an inconsistent pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorFault {
    /// The lowest sensor is silent while a higher one is active.
    HeightSensor1,
    /// The middle sensor is silent while the top one is active.
    HeightSensor2,
}

impl SensorFault {
    /// Human-readable fault description.
    pub fn description(&self) -> &'static str {
        match self {
            SensorFault::HeightSensor1 => "height sensor #1 malfunction",
            SensorFault::HeightSensor2 => "height sensor #2 malfunction",
        }
    }
}

impl fmt::Display for SensorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Outcome of fusing three proximity flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeightReading {
    /// A monotonic pattern with its height category in centimetres.
    Consistent(f64),
    /// A non-monotonic pattern; no height is emitted.
    Inconsistent(SensorFault),
}

impl HeightReading {
    /// The height in centimetres, if the reading was consistent.
    pub fn height(&self) -> Option<f64> {
        match self {
            HeightReading::Consistent(h) => Some(*h),
            HeightReading::Inconsistent(_) => None,
        }
    }
}

/// Fuse three proximity flags (bottom, middle, top) into a height reading.
pub fn fuse(p1: bool, p2: bool, p3: bool) -> HeightReading {
    match (p1, p2, p3) {
        (false, false, false) => HeightReading::Consistent(0.0),
        (true, false, false) => HeightReading::Consistent(5.0),
        (true, true, false) => HeightReading::Consistent(10.0),
        (true, true, true) => HeightReading::Consistent(MAX_HEIGHT_CM),
        (false, true, _) | (false, false, true) => {
            HeightReading::Inconsistent(SensorFault::HeightSensor1)
        }
        (true, false, true) => HeightReading::Inconsistent(SensorFault::HeightSensor2),
    }
}

/// Format a height in centimetres for display.
pub fn format_height(height: f64) -> String {
    if height >= MAX_HEIGHT_CM {
        format!(">{} cm", MAX_HEIGHT_CM as u32)
    } else {
        format!("{:.0} cm", height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_patterns_yield_heights() {
        assert_eq!(fuse(false, false, false), HeightReading::Consistent(0.0));
        assert_eq!(fuse(true, false, false), HeightReading::Consistent(5.0));
        assert_eq!(fuse(true, true, false), HeightReading::Consistent(10.0));
        assert_eq!(fuse(true, true, true), HeightReading::Consistent(15.0));
    }

    #[test]
    fn test_sensor_one_faults() {
        for (p2, p3) in [(true, false), (true, true), (false, true)] {
            assert_eq!(
                fuse(false, p2, p3),
                HeightReading::Inconsistent(SensorFault::HeightSensor1)
            );
        }
    }

    #[test]
    fn test_sensor_two_fault() {
        assert_eq!(
            fuse(true, false, true),
            HeightReading::Inconsistent(SensorFault::HeightSensor2)
        );
    }

    #[test]
    fn test_exactly_four_combinations_are_consistent() {
        let mut consistent = 0;
        for bits in 0u8..8 {
            let reading = fuse(bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            if reading.height().is_some() {
                consistent += 1;
            }
        }
        assert_eq!(consistent, 4);
    }

    #[test]
    fn test_format_height() {
        assert_eq!(format_height(0.0), "0 cm");
        assert_eq!(format_height(10.0), "10 cm");
        assert_eq!(format_height(15.0), ">15 cm");
        assert_eq!(format_height(7.6), "8 cm");
    }
}
