//! Track statistics: distances, times, speeds, elevation and bounds.

use std::borrow::Cow;

use serde::{Serialize, Serializer};

use crate::document::GpxFile;
use crate::elevation::ElevationDiffsCalculator;
use crate::error::GpxError;
use crate::geodesy;
use crate::gpx_types::{ColorizationType, NO_TIME, TrkSegment, WptPt};
use crate::options::AnalysisOptions;
use crate::progress::{NoProgress, Progress};
use crate::split::SplitSegment;

const NO_ELEVATION_MIN: f64 = 99999.0;
const NO_ELEVATION_MAX: f64 = -100.0;

/// Elevation chart entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Elevation {
    /// Step length from the previous point, metres
    pub distance: f64,
    /// Step duration from the previous point, seconds
    pub time: i64,
    pub elevation: f64,
    pub first_point: bool,
    pub last_point: bool,
}

/// Speed chart entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Speed {
    pub distance: f64,
    pub time: i64,
    pub speed: f64,
    pub first_point: bool,
    pub last_point: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpxTrackAnalysis {
    pub name: Option<String>,

    pub total_distance: f64,
    pub total_distance_without_gaps: f64,
    pub total_tracks: usize,
    pub start_time: i64,
    pub end_time: i64,
    pub time_span: i64,
    pub time_span_without_gaps: i64,
    pub time_moving: i64,
    pub time_moving_without_gaps: i64,
    pub total_distance_moving: f64,
    pub total_distance_moving_without_gaps: f64,

    pub diff_elevation_up: f64,
    pub diff_elevation_down: f64,
    pub avg_elevation: f64,
    pub min_elevation: f64,
    pub max_elevation: f64,

    pub min_speed: f64,
    pub max_speed: f64,
    pub avg_speed: f64,

    pub min_hdop: f64,
    pub max_hdop: f64,

    pub points: usize,
    pub wpt_points: usize,
    pub wpt_category_names: Vec<String>,

    pub metric_end: f64,
    pub secondary_metric_end: f64,
    #[serde(serialize_with = "serialize_location")]
    pub location_start: Option<WptPt>,
    #[serde(serialize_with = "serialize_location")]
    pub location_end: Option<WptPt>,

    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,

    pub elevation_data: Vec<Elevation>,
    pub speed_data: Vec<Speed>,
    pub has_elevation_data: bool,
    pub has_speed_data: bool,
    pub has_speed_in_track: bool,

    /// Set when the analysis stopped early
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_error")]
    pub error: Option<GpxError>,
}

impl Default for GpxTrackAnalysis {
    fn default() -> Self {
        Self {
            name: None,
            total_distance: 0.0,
            total_distance_without_gaps: 0.0,
            total_tracks: 0,
            start_time: i64::MAX,
            end_time: i64::MIN,
            time_span: 0,
            time_span_without_gaps: 0,
            time_moving: 0,
            time_moving_without_gaps: 0,
            total_distance_moving: 0.0,
            total_distance_moving_without_gaps: 0.0,
            diff_elevation_up: 0.0,
            diff_elevation_down: 0.0,
            avg_elevation: 0.0,
            min_elevation: NO_ELEVATION_MIN,
            max_elevation: NO_ELEVATION_MAX,
            min_speed: f64::MAX,
            max_speed: 0.0,
            avg_speed: 0.0,
            min_hdop: f64::NAN,
            max_hdop: f64::NAN,
            points: 0,
            wpt_points: 0,
            wpt_category_names: Vec::new(),
            metric_end: 0.0,
            secondary_metric_end: 0.0,
            location_start: None,
            location_end: None,
            left: 0.0,
            right: 0.0,
            top: 0.0,
            bottom: 0.0,
            elevation_data: Vec::new(),
            speed_data: Vec::new(),
            has_elevation_data: false,
            has_speed_data: false,
            has_speed_in_track: false,
            error: None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Location {
    lat: f64,
    lon: f64,
    time: i64,
    ele: f64,
}

fn serialize_location<S: Serializer>(point: &Option<WptPt>, serializer: S) -> Result<S::Ok, S::Error> {
    point
        .as_ref()
        .map(|p| Location {
            lat: p.lat,
            lon: p.lon,
            time: p.time,
            ele: p.ele,
        })
        .serialize(serializer)
}

fn serialize_error<S: Serializer>(error: &Option<GpxError>, serializer: S) -> Result<S::Ok, S::Error> {
    error.as_ref().map(ToString::to_string).serialize(serializer)
}

/// Accumulators for the "without gaps" totals of a general segment.
#[derive(Default)]
struct SingleSegment {
    start_time: i64,
    end_time: i64,
    distance: f64,
    distance_moving: f64,
    time_moving: i64,
}

impl GpxTrackAnalysis {
    pub fn is_time_specified(&self) -> bool {
        self.start_time != i64::MAX && self.start_time != NO_TIME
    }

    pub fn is_time_moving(&self) -> bool {
        self.time_moving != 0
    }

    pub fn is_elevation_specified(&self) -> bool {
        self.max_elevation != NO_ELEVATION_MAX
    }

    pub fn is_speed_specified(&self) -> bool {
        self.avg_speed > 0.0
    }

    pub fn is_hdop_specified(&self) -> bool {
        self.min_hdop > 0.0
    }

    pub fn is_bounds_calculated(&self) -> bool {
        self.left != 0.0 && self.right != 0.0 && self.top != 0.0 && self.bottom != 0.0
    }

    pub fn is_colorization_type_available(&self, kind: ColorizationType) -> bool {
        match kind {
            ColorizationType::Speed => self.is_speed_specified(),
            ColorizationType::Elevation | ColorizationType::Slope => self.is_elevation_specified(),
            ColorizationType::None => true,
        }
    }

    /// Analysis of one whole segment.
    pub fn segment(filestamp: i64, segment: &TrkSegment) -> Self {
        let mut analysis = Self::default();
        analysis.prepare_information(filestamp, &[SplitSegment::new(segment)]);
        analysis
    }

    pub fn prepare_information(&mut self, filestamp: i64, splits: &[SplitSegment<'_>]) {
        self.prepare_information_with(filestamp, splits, &mut NoProgress);
    }

    /// Accumulates statistics over `splits`. Without any timestamp the start and
    /// end times fall back to `filestamp`. Stops early with
    /// [`GpxError::Cancelled`] in `error` when `progress` is interrupted.
    pub fn prepare_information_with(
        &mut self,
        filestamp: i64,
        splits: &[SplitSegment<'_>],
        progress: &mut dyn Progress,
    ) {
        let mut total_elevation = 0.0;
        let mut elevation_points = 0usize;
        let mut speed_count = 0usize;
        let mut total_speed_sum = 0.0;
        let mut time_diff = 0i64;
        let mut single = SingleSegment::default();

        self.points = 0;
        self.elevation_data.clear();
        self.speed_data.clear();
        progress.start_work(splits.iter().map(SplitSegment::number_of_points).sum());

        for s in splits {
            let n = s.number_of_points();
            if n == 0 {
                continue;
            }
            let general = s.segment.general_segment;
            self.metric_end += s.metric_end;
            self.secondary_metric_end += s.secondary_metric_end;
            self.points += n;

            let mut samples: Vec<WptPt> = Vec::with_capacity(n);
            let mut segment_distance = 0.0;
            let mut prev: Option<Cow<'_, WptPt>> = None;
            for j in 0..n {
                if progress.is_interrupted() {
                    tracing::debug!("Track analysis cancelled after {} points", self.points);
                    self.error = Some(GpxError::Cancelled);
                    return;
                }
                progress.progress(1);

                let point = s.get(j);
                if j == 0 && self.location_start.is_none() {
                    self.location_start = Some(point.clone().into_owned());
                }
                if j == n - 1 {
                    self.location_end = Some(point.clone().into_owned());
                }

                let time = point.time;
                if time != NO_TIME {
                    if s.metric_end == 0.0 && general {
                        if point.first_point {
                            single.start_time = time;
                        } else if point.last_point {
                            single.end_time = time;
                        }
                        if single.start_time != NO_TIME && single.end_time != NO_TIME {
                            self.time_span_without_gaps += single.end_time - single.start_time;
                            single.start_time = NO_TIME;
                            single.end_time = NO_TIME;
                        }
                    }
                    self.start_time = self.start_time.min(time);
                    self.end_time = self.end_time.max(time);
                }

                self.update_bounds(&point);

                let mut elevation = Elevation {
                    elevation: f64::NAN,
                    ..Elevation::default()
                };
                if !point.ele.is_nan() {
                    total_elevation += point.ele;
                    elevation_points += 1;
                    self.min_elevation = self.min_elevation.min(point.ele);
                    self.max_elevation = self.max_elevation.max(point.ele);
                    elevation.elevation = point.ele;
                }

                let mut speed = point.speed;
                if speed > 0.0 {
                    self.has_speed_in_track = true;
                }

                if point.hdop > 0.0 {
                    if self.min_hdop.is_nan() || point.hdop < self.min_hdop {
                        self.min_hdop = point.hdop;
                    }
                    if self.max_hdop.is_nan() || point.hdop > self.max_hdop {
                        self.max_hdop = point.hdop;
                    }
                }

                let mut step = 0.0;
                if let Some(prev) = &prev {
                    step = geodesy::distance(prev.lat, prev.lon, point.lat, point.lon);
                    self.total_distance += step;
                    segment_distance += step;

                    // Reversed points make the time go backwards.
                    let time_diff_millis = (point.time - prev.time).max(0);
                    time_diff = time_diff_millis / 1000;

                    if !self.has_speed_in_track && speed == 0.0 && time_diff > 0 {
                        speed = step / time_diff as f64;
                    }

                    let time_specified = point.time != NO_TIME && prev.time != NO_TIME;
                    if speed > 0.0 && time_specified && step > time_diff_millis as f64 / 10000.0 {
                        self.time_moving += time_diff_millis;
                        self.total_distance_moving += step;
                        if general && !point.first_point {
                            single.time_moving += time_diff_millis;
                            single.distance_moving += step;
                        }
                    }
                }

                elevation.time = time_diff;
                elevation.distance = step;
                if !self.has_elevation_data && !elevation.elevation.is_nan() && self.total_distance > 0.0 {
                    self.has_elevation_data = true;
                }

                self.min_speed = self.min_speed.min(speed);
                if speed > 0.0 {
                    total_speed_sum += speed;
                    self.max_speed = self.max_speed.max(speed);
                    speed_count += 1;
                }

                let mut speed_entry = Speed {
                    distance: step,
                    time: time_diff,
                    speed,
                    ..Speed::default()
                };
                if !self.has_speed_data && speed > 0.0 && self.total_distance > 0.0 {
                    self.has_speed_data = true;
                }

                if general {
                    single.distance += step;
                    if point.first_point {
                        single.distance = 0.0;
                        single.time_moving = 0;
                        single.distance_moving = 0.0;
                        if j > 0 {
                            elevation.first_point = true;
                            speed_entry.first_point = true;
                        }
                    }
                    if point.last_point {
                        self.total_distance_without_gaps += single.distance;
                        self.time_moving_without_gaps += single.time_moving;
                        self.total_distance_moving_without_gaps += single.distance_moving;
                        if j < n - 1 {
                            elevation.last_point = true;
                            speed_entry.last_point = true;
                        }
                    }
                }
                self.elevation_data.push(elevation);
                self.speed_data.push(speed_entry);

                let mut sample = WptPt::with_values(point.lat, point.lon, point.time, point.ele, speed, f64::NAN);
                sample.distance = segment_distance;
                samples.push(sample);
                prev = Some(point);
            }

            let diffs = ElevationDiffsCalculator::new(&samples).calculate();
            self.diff_elevation_up += diffs.up;
            self.diff_elevation_down += diffs.down;
        }

        if !self.is_time_specified() {
            self.start_time = filestamp;
            self.end_time = filestamp;
        }
        if self.time_span == 0 {
            self.time_span = self.end_time - self.start_time;
        }
        if elevation_points > 0 {
            self.avg_elevation = total_elevation / elevation_points as f64;
        }
        self.avg_speed = if speed_count == 0 {
            -1.0
        } else if self.time_moving > 0 {
            self.total_distance_moving / self.time_moving as f64 * 1000.0
        } else {
            total_speed_sum / speed_count as f64
        };
    }

    fn update_bounds(&mut self, point: &WptPt) {
        if self.left == 0.0 && self.right == 0.0 {
            self.left = point.lon;
            self.right = point.lon;
            self.top = point.lat;
            self.bottom = point.lat;
        } else {
            self.left = self.left.min(point.lon);
            self.right = self.right.max(point.lon);
            self.top = self.top.max(point.lat);
            self.bottom = self.bottom.min(point.lat);
        }
    }

    /// Without a general segment the gap-free totals equal the plain ones.
    fn fill_without_gaps(&mut self, general: Option<&GpxTrackAnalysis>) {
        match general {
            Some(g) => {
                self.total_distance_without_gaps = g.total_distance_without_gaps;
                self.time_span_without_gaps = g.time_span_without_gaps;
                self.time_moving_without_gaps = g.time_moving_without_gaps;
                self.total_distance_moving_without_gaps = g.total_distance_moving_without_gaps;
            }
            None => {
                self.total_distance_without_gaps = self.total_distance;
                self.time_span_without_gaps = self.time_span;
                self.time_moving_without_gaps = self.time_moving;
                self.total_distance_moving_without_gaps = self.total_distance_moving;
            }
        }
    }
}

/// Whole-document analysis plus the optional per-piece split analyses.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub analysis: GpxTrackAnalysis,
    pub splits: Vec<GpxTrackAnalysis>,
}

impl GpxFile {
    pub fn analysis(&self, filestamp: i64) -> GpxTrackAnalysis {
        self.analysis_in_range(filestamp, None, None)
    }

    /// Analysis of every real segment, restricted to the points nearest to
    /// the given cumulative distances when both are set.
    pub fn analysis_in_range(
        &self,
        filestamp: i64,
        from_distance: Option<f64>,
        to_distance: Option<f64>,
    ) -> GpxTrackAnalysis {
        let options = AnalysisOptions {
            filestamp,
            from_distance,
            to_distance,
            ..AnalysisOptions::default()
        };
        self.analysis_with(&options, &mut NoProgress)
    }

    pub fn analysis_with(&self, options: &AnalysisOptions, progress: &mut dyn Progress) -> GpxTrackAnalysis {
        let mut analysis = GpxTrackAnalysis {
            name: (!self.path.is_empty()).then(|| self.path.clone()),
            wpt_points: self.points().len(),
            wpt_category_names: self.waypoint_categories(),
            ..GpxTrackAnalysis::default()
        };
        let range = options.distance_range();

        let mut segments: Vec<Cow<'_, TrkSegment>> = Vec::new();
        for segment in self.tracks().iter().flat_map(|t| t.segments.iter()) {
            if segment.general_segment {
                continue;
            }
            analysis.total_tracks += 1;
            if segment.points.len() > 1 {
                segments.push(match range {
                    Some(_) => {
                        let mut copy = segment.clone();
                        copy.update_distances();
                        Cow::Owned(copy)
                    }
                    None => Cow::Borrowed(segment),
                });
            }
        }
        let splits: Vec<SplitSegment<'_>> = segments
            .iter()
            .map(|segment| match range {
                Some((from, to)) => SplitSegment::with_range(
                    segment,
                    GpxFile::point_index_by_distance(&segment.points, from),
                    GpxFile::point_index_by_distance(&segment.points, to),
                ),
                None => SplitSegment::new(segment),
            })
            .collect();
        analysis.prepare_information_with(options.filestamp, &splits, progress);
        if analysis.error.is_some() {
            return analysis;
        }

        let general = match (range, self.general_segment()) {
            (None, Some(segment)) => Some(GpxTrackAnalysis::segment(options.filestamp, segment)),
            _ => None,
        };
        analysis.fill_without_gaps(general.as_ref());
        if !options.include_series {
            analysis.elevation_data.clear();
            analysis.speed_data.clear();
        }
        analysis
    }

    /// Runs [`GpxFile::analysis_with`] and, when requested, splits the general
    /// segment (or the only non-empty segment) into pieces.
    pub fn analyze(&self, options: &AnalysisOptions, progress: &mut dyn Progress) -> AnalysisReport {
        let analysis = self.analysis_with(options, progress);
        let mut splits = Vec::new();
        let split = options.split.clone().or_else(|| self.split_options());
        if analysis.error.is_none()
            && let Some(split) = &split
        {
            let segment = self
                .general_segment()
                .or_else(|| self.non_empty_trk_segments(false).into_iter().next());
            if let Some(segment) = segment {
                splits = segment.split(split);
            }
            if !options.include_series {
                for s in &mut splits {
                    s.elevation_data.clear();
                    s.speed_data.clear();
                }
            }
        }
        AnalysisReport { analysis, splits }
    }
}
