//! Partitioning of a track segment into pieces bounded by a distance or time
//! limit. Piece boundaries fall between points and are represented by an
//! index plus an interpolation coefficient.

use std::borrow::Cow;

use crate::analysis::GpxTrackAnalysis;
use crate::geodesy;
use crate::gpx_types::{NO_COORDINATE, NO_TIME, TrkSegment, WptPt};
use crate::options::{SplitOptions, SplitType};

/// A view on a contiguous run of a segment's points.
///
/// The first point sits `start_coeff` of the way from `start_point_ind` to the
/// next point; the last sits `end_coeff` of the way from the point before
/// `end_point_ind + 1` to it.
#[derive(Debug, Clone)]
pub struct SplitSegment<'a> {
    pub segment: &'a TrkSegment,
    pub start_point_ind: usize,
    pub start_coeff: f64,
    pub end_point_ind: isize,
    pub end_coeff: f64,
    pub metric_end: f64,
    pub secondary_metric_end: f64,
}

impl<'a> SplitSegment<'a> {
    /// Covers the whole segment.
    pub fn new(segment: &'a TrkSegment) -> Self {
        Self {
            segment,
            start_point_ind: 0,
            start_coeff: 0.0,
            end_point_ind: segment.points.len() as isize - 2,
            end_coeff: 1.0,
            metric_end: 0.0,
            secondary_metric_end: 0.0,
        }
    }

    /// Points `start..end`, `end` excluded.
    pub fn with_range(segment: &'a TrkSegment, start: usize, end: usize) -> Self {
        Self {
            start_point_ind: start,
            end_point_ind: end as isize - 2,
            ..Self::new(segment)
        }
    }

    fn open(segment: &'a TrkSegment, point_ind: usize, coeff: f64) -> Self {
        Self {
            segment,
            start_point_ind: point_ind,
            start_coeff: coeff,
            end_point_ind: 0,
            end_coeff: 0.0,
            metric_end: 0.0,
            secondary_metric_end: 0.0,
        }
    }

    fn set_last_point(&mut self, point_ind: isize, coeff: f64) {
        self.end_point_ind = point_ind;
        self.end_coeff = coeff;
    }

    pub fn number_of_points(&self) -> usize {
        (self.end_point_ind - self.start_point_ind as isize + 2).max(0) as usize
    }

    /// Point `j` of the view; the two ends may be interpolated.
    pub fn get(&self, j: usize) -> Cow<'a, WptPt> {
        let points = &self.segment.points;
        let ind = j + self.start_point_ind;
        if j == 0 {
            if self.start_coeff == 0.0 {
                return Cow::Borrowed(&points[ind]);
            }
            return Cow::Owned(approx(&points[ind], &points[ind + 1], self.start_coeff));
        }
        if j + 1 == self.number_of_points() {
            if self.end_coeff == 1.0 {
                return Cow::Borrowed(&points[ind]);
            }
            return Cow::Owned(approx(&points[ind - 1], &points[ind], self.end_coeff));
        }
        Cow::Borrowed(&points[ind])
    }

    pub fn points(&self) -> impl Iterator<Item = Cow<'a, WptPt>> + '_ {
        (0..self.number_of_points()).map(|j| self.get(j))
    }
}

/// Interpolates between two points; an unspecified operand yields the other one.
fn approx(w1: &WptPt, w2: &WptPt, cf: f64) -> WptPt {
    let time = if w1.time == NO_TIME {
        w2.time
    } else if w2.time == NO_TIME {
        w1.time
    } else {
        w1.time + (cf * (w2.time - w1.time) as f64) as i64
    };
    WptPt::with_values(
        value(w1.lat, w2.lat, NO_COORDINATE, cf),
        value(w1.lon, w2.lon, NO_COORDINATE, cf),
        time,
        value(w1.ele, w2.ele, 0.0, cf),
        value(w1.speed, w2.speed, 0.0, cf),
        value(w1.hdop, w2.hdop, 0.0, cf),
    )
}

fn value(v1: f64, v2: f64, none: f64, cf: f64) -> f64 {
    if v1 == none || v1.is_nan() {
        v2
    } else if v2 == none || v2.is_nan() {
        v1
    } else {
        v1 + cf * (v2 - v1)
    }
}

/// Measure accumulated along a segment.
pub trait SplitMetric {
    fn metric(&self, p1: &WptPt, p2: &WptPt) -> f64;
}

/// Ellipsoidal distance in metres.
pub struct DistanceMetric;

impl SplitMetric for DistanceMetric {
    fn metric(&self, p1: &WptPt, p2: &WptPt) -> f64 {
        geodesy::distance(p1.lat, p1.lon, p2.lat, p2.lon)
    }
}

/// Whole seconds between two timed points, 0 when either is untimed.
pub struct TimeMetric;

impl SplitMetric for TimeMetric {
    fn metric(&self, p1: &WptPt, p2: &WptPt) -> f64 {
        if p1.time == NO_TIME || p2.time == NO_TIME {
            return 0.0;
        }
        ((p2.time - p1.time) / 1000).abs() as f64
    }
}

/// Cuts `segment` every `metric_limit` units of `metric`.
///
/// Metric ends are cumulative. On a general segment that is not joined, each
/// `first_point` closes the running piece and restarts the count, so gaps
/// between the original segments never contribute.
pub fn split_segment<'a>(
    metric: &dyn SplitMetric,
    secondary_metric: &dyn SplitMetric,
    metric_limit: f64,
    segment: &'a TrkSegment,
    join_segments: bool,
) -> Vec<SplitSegment<'a>> {
    let mut splits = Vec::new();
    let points = &segment.points;
    if points.is_empty() || metric_limit <= 0.0 {
        return splits;
    }
    let restart_at_boundaries = segment.general_segment && !join_segments;
    let mut current_metric_end = metric_limit;
    let mut secondary_metric_end = 0.0;
    let mut total = 0.0;
    let mut sp = SplitSegment::open(segment, 0, 0.0);

    for k in 1..points.len() {
        let (prev, point) = (&points[k - 1], &points[k]);
        if restart_at_boundaries && point.first_point {
            if total > current_metric_end - metric_limit {
                sp.set_last_point(k as isize - 2, 1.0);
                sp.metric_end = total;
                sp.secondary_metric_end = secondary_metric_end;
                splits.push(sp);
            }
            sp = SplitSegment::open(segment, k, 0.0);
            current_metric_end = metric_limit;
            secondary_metric_end = 0.0;
            total = 0.0;
            continue;
        }
        let step = metric.metric(prev, point);
        secondary_metric_end += secondary_metric.metric(prev, point);
        while total + step > current_metric_end {
            let cf = (current_metric_end - total) / step;
            sp.set_last_point(k as isize - 1, cf);
            sp.metric_end = current_metric_end;
            sp.secondary_metric_end = secondary_metric_end;
            splits.push(sp);

            sp = SplitSegment::open(segment, k - 1, cf);
            current_metric_end += metric_limit;
        }
        total += step;
    }
    if sp.start_point_ind + 1 < points.len() || splits.is_empty() {
        sp.metric_end = total;
        sp.secondary_metric_end = secondary_metric_end;
        sp.set_last_point(points.len() as isize - 2, 1.0);
        splits.push(sp);
    }
    splits
}

impl TrkSegment {
    pub fn split_by_distance(&self, meters: f64, join_segments: bool) -> Vec<GpxTrackAnalysis> {
        analyze_splits(split_segment(&DistanceMetric, &TimeMetric, meters, self, join_segments))
    }

    pub fn split_by_time(&self, seconds: u32, join_segments: bool) -> Vec<GpxTrackAnalysis> {
        analyze_splits(split_segment(
            &TimeMetric,
            &DistanceMetric,
            f64::from(seconds),
            self,
            join_segments,
        ))
    }

    pub fn split(&self, options: &SplitOptions) -> Vec<GpxTrackAnalysis> {
        match options.split_type {
            SplitType::Distance => self.split_by_distance(options.interval, options.join_segments),
            SplitType::Time => self.split_by_time(options.interval.max(0.0) as u32, options.join_segments),
        }
    }
}

fn analyze_splits(splits: Vec<SplitSegment<'_>>) -> Vec<GpxTrackAnalysis> {
    splits
        .iter()
        .map(|s| {
            let mut analysis = GpxTrackAnalysis::default();
            analysis.prepare_information(0, std::slice::from_ref(s));
            analysis
        })
        .collect()
}
