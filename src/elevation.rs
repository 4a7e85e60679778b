//! Smoothed elevation gain and loss over a polyline.
//!
//! Elevations are averaged inside fixed-length distance windows and only the
//! differences between consecutive window averages count, which keeps GPS
//! altitude jitter out of the totals.

use crate::geodesy::round_half_up;
use crate::gpx_types::{NO_TIME, WptPt};

/// Window used when the track carries no timestamps, in metres.
pub const CALCULATED_GPX_WINDOW_LENGTH: f64 = 10.0;

const UP_ROUNDING_BIAS: f64 = 0.3;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ElevationDiffs {
    pub up: f64,
    pub down: f64,
}

/// Points are read through their cumulative `distance`, `ele` and `time`.
pub struct ElevationDiffsCalculator<'a> {
    points: &'a [WptPt],
    window_length: f64,
    up: f64,
    down: f64,
    avg: f64,
}

impl<'a> ElevationDiffsCalculator<'a> {
    /// Window follows point density: [`CALCULATED_GPX_WINDOW_LENGTH`] when the
    /// last point is untimed, otherwise `max(20, length / count * 4)`.
    pub fn new(points: &'a [WptPt]) -> Self {
        let window_length = match points.last() {
            Some(last) if last.time != NO_TIME => (last.distance / points.len() as f64 * 4.0).max(20.0),
            _ => CALCULATED_GPX_WINDOW_LENGTH,
        };
        Self::with_window(points, window_length)
    }

    pub fn with_window(points: &'a [WptPt], window_length: f64) -> Self {
        Self {
            points,
            window_length,
            up: 0.0,
            down: 0.0,
            avg: f64::NAN,
        }
    }

    pub fn window_length(&self) -> f64 {
        self.window_length
    }

    pub fn calculate(mut self) -> ElevationDiffs {
        let Some(first) = self.points.first() else {
            return ElevationDiffs::default();
        };
        let mut sum = first.ele;
        let mut prev_ele = first.ele;
        let mut count = usize::from(!sum.is_nan());
        let mut next_window = first.distance + self.window_length;

        for point in &self.points[1..] {
            if point.distance > next_window {
                self.close_window(sum, count);
                if !point.ele.is_nan() {
                    sum = point.ele;
                    prev_ele = point.ele;
                    count = 1;
                } else if !prev_ele.is_nan() {
                    sum = prev_ele;
                    count = 1;
                } else {
                    sum = f64::NAN;
                    count = 0;
                }
                if self.window_length > 0.0 {
                    let steps = ((point.distance - next_window) / self.window_length).ceil();
                    next_window += steps * self.window_length;
                } else {
                    next_window = point.distance;
                }
            } else if !point.ele.is_nan() {
                sum += point.ele;
                prev_ele = point.ele;
                count += 1;
            } else if !prev_ele.is_nan() {
                sum += prev_ele;
                count += 1;
            }
        }
        if count > 0 {
            self.close_window(sum, count);
        }
        ElevationDiffs {
            up: round_half_up(self.up + UP_ROUNDING_BIAS),
            down: self.down,
        }
    }

    fn close_window(&mut self, sum: f64, count: usize) {
        if sum.is_nan() || count == 0 {
            self.avg = f64::NAN;
            return;
        }
        let avg = sum / count as f64;
        if !self.avg.is_nan() {
            let diff = avg - self.avg;
            if diff > 0.0 {
                self.up += diff;
            } else {
                self.down -= diff;
            }
        }
        self.avg = avg;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(distance: f64, ele: f64, time: i64) -> WptPt {
        WptPt {
            distance,
            ele,
            time,
            ..WptPt::default()
        }
    }

    #[test]
    fn test_window_length_policy() {
        let untimed = vec![point(0.0, 1.0, 0), point(1000.0, 1.0, 0)];
        assert_eq!(ElevationDiffsCalculator::new(&untimed).window_length(), 10.0);

        let short = vec![point(0.0, 1.0, 1), point(10.0, 1.0, 2)];
        assert_eq!(ElevationDiffsCalculator::new(&short).window_length(), 20.0);

        let long = vec![point(0.0, 1.0, 1), point(1000.0, 1.0, 2)];
        assert_eq!(ElevationDiffsCalculator::new(&long).window_length(), 2000.0);
    }

    #[test]
    fn test_three_windows() {
        let points = vec![point(0.0, 0.0, 0), point(111_000.0, 10.0, 0), point(222_000.0, 5.0, 0)];
        let diffs = ElevationDiffsCalculator::with_window(&points, 1.0).calculate();
        assert_eq!(diffs.up, 10.0);
        assert!((diffs.down - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_averages_smooth_jitter() {
        let points: Vec<_> = (0..10)
            .map(|i| point(i as f64, if i % 2 == 0 { 100.0 } else { 101.0 }, 0))
            .collect();
        let diffs = ElevationDiffsCalculator::new(&points).calculate();
        assert_eq!(diffs.up, 0.0);
        assert_eq!(diffs.down, 0.0);
    }

    #[test]
    fn test_missing_elevation_carried_forward() {
        let points = vec![
            point(0.0, 10.0, 0),
            point(20.0, f64::NAN, 0),
            point(40.0, 20.0, 0),
        ];
        let diffs = ElevationDiffsCalculator::with_window(&points, 10.0).calculate();
        assert_eq!(diffs.up, 10.0);
        assert_eq!(diffs.down, 0.0);
    }

    #[test]
    fn test_no_elevation() {
        let points = vec![point(0.0, f64::NAN, 0), point(50.0, f64::NAN, 0)];
        let diffs = ElevationDiffsCalculator::new(&points).calculate();
        assert_eq!(diffs, ElevationDiffs::default());
        assert_eq!(ElevationDiffsCalculator::new(&[]).calculate(), ElevationDiffs::default());
    }
}
