//! Inserts synthetic points where a polyline crosses the antimeridian so that no
//! consecutive pair spans 180 degrees of longitude.

use crate::document::GpxFile;
use crate::geodesy::{projection, projection_coefficient};
use crate::gpx_types::{PRIME_MERIDIAN, WptPt};

impl GpxFile {
    /// Splits every track segment, or every route when no segment has points.
    pub fn split_antimeridian(&mut self) {
        if self.tracks.iter().flat_map(|t| t.segments.iter()).any(|s| !s.points.is_empty()) {
            for segment in self.tracks.iter_mut().flat_map(|t| t.segments.iter_mut()) {
                split_points(&mut segment.points);
            }
            self.invalidate_general_track();
        } else {
            for route in &mut self.routes {
                split_points(&mut route.points);
            }
        }
    }
}

/// For every consecutive pair with `|Δlon| >= 180` inserts the crossing point at
/// ±[`PRIME_MERIDIAN`] on the approach side, then its mirror.
pub fn split_points(points: &mut Vec<WptPt>) {
    let mut i = 1;
    while i < points.len() {
        let prev = &points[i - 1];
        let next = &points[i];
        if (next.lon - prev.lon).abs() >= 180.0 {
            let crossing = crossing_point(prev, next);
            let mut mirror = crossing.clone();
            mirror.lon = -crossing.lon;
            points.splice(i..i, [crossing, mirror]);
            i += 2;
        }
        i += 1;
    }
}

fn crossing_point(prev: &WptPt, next: &WptPt) -> WptPt {
    let cf = projection_coefficient(0.0, 0.0, prev.lat, prev.lon, next.lat, next.lon);
    let (_, (lat, _)) = projection(0.0, 0.0, prev.lat, prev.lon, next.lat, next.lon);
    let lon = if prev.lon < 0.0 { -PRIME_MERIDIAN } else { PRIME_MERIDIAN };
    let time = prev.time + ((next.time - prev.time) as f64 * cf) as i64;
    let ele = if prev.ele.is_nan() || next.ele.is_nan() {
        f64::NAN
    } else {
        prev.ele + (next.ele - prev.ele) * cf
    };
    let speed = prev.speed + (next.speed - prev.speed) * cf;
    WptPt::with_values(lat, lon, time, ele, speed, f64::NAN)
}
