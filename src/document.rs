//! The in-memory GPX document and its mutation helpers.
//!
//! Free waypoints live in one arena (`points`); points-groups refer to them by
//! index. Every helper that adds, removes or moves a waypoint keeps each free
//! waypoint in exactly one group: the one named after its category, or the
//! empty-name group when it has none.

use std::cell::OnceCell;

use crate::error::GpxError;
use crate::extensions::{Extensions, HasExtensions};
use crate::gpx_time::now_millis;
use crate::gpx_types::*;
use crate::impl_has_extensions;
use crate::options::{SplitOptions, SplitType};

/// Axis-aligned rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl QuadRect {
    fn empty() -> Self {
        Self {
            left: f64::INFINITY,
            top: f64::NEG_INFINITY,
            right: f64::NEG_INFINITY,
            bottom: f64::INFINITY,
        }
    }

    fn include(&mut self, p: &WptPt) {
        self.left = self.left.min(p.lon);
        self.right = self.right.max(p.lon);
        self.top = self.top.max(p.lat);
        self.bottom = self.bottom.min(p.lat);
    }
}

/// Attributes written by [`GpxFile::update_point`].
#[derive(Debug, Clone, Default)]
pub struct PointUpdate {
    pub lat: f64,
    pub lon: f64,
    pub desc: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub color: Option<u32>,
    pub icon_name: Option<String>,
    pub background_type: Option<String>,
}

/// A parsed (or caller-built) GPX document.
#[derive(Debug, Clone, PartialEq)]
pub struct GpxFile {
    /// `creator` attribute of the root element.
    pub author: Option<String>,
    pub metadata: Metadata,
    pub(crate) tracks: Vec<Track>,
    pub routes: Vec<Route>,
    pub(crate) points: Vec<WptPt>,
    pub(crate) points_groups: Vec<PointsGroup>,
    pub extensions: Extensions,
    /// Fatal reader error; the rest of the document holds what was recovered.
    pub error: Option<GpxError>,
    pub path: String,
    pub modified_time: i64,
    pub points_modified_time: i64,
    pub(crate) pending_route_segments: Vec<RouteSegment>,
    pub(crate) pending_route_types: Vec<RouteType>,
    general_track: OnceCell<Option<Track>>,
}

impl_has_extensions!(GpxFile);

impl Default for GpxFile {
    fn default() -> Self {
        Self::new(None)
    }
}

impl GpxFile {
    pub fn new(author: Option<String>) -> Self {
        Self {
            author,
            metadata: Metadata {
                time: now_millis(),
                ..Metadata::default()
            },
            tracks: Vec::new(),
            routes: Vec::new(),
            points: Vec::new(),
            points_groups: Vec::new(),
            extensions: Extensions::new(),
            error: None,
            path: String::new(),
            modified_time: 0,
            points_modified_time: 0,
            pending_route_segments: Vec::new(),
            pending_route_types: Vec::new(),
            general_track: OnceCell::new(),
        }
    }

    /// Travel-article document: title, language and description go to the
    /// metadata extensions.
    pub fn with_article(title: Option<&str>, lang: Option<&str>, description: Option<&str>) -> Self {
        let mut file = Self::new(None);
        let ext = &mut file.metadata.extensions;
        if let Some(desc) = description {
            ext.put("desc", desc);
        }
        if let Some(lang) = lang {
            ext.put("article_lang", lang);
        }
        if let Some(title) = title {
            ext.put("article_title", title);
        }
        file
    }

    fn touch(&mut self) {
        self.modified_time = now_millis().max(self.modified_time);
    }

    fn touch_points(&mut self) {
        self.touch();
        self.points_modified_time = self.modified_time;
    }

    pub(crate) fn invalidate_general_track(&mut self) {
        self.general_track.take();
    }

    // ---- tracks ----

    /// Real tracks, never including the synthetic general track.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Mutable access to the real tracks. Drops the cached general track.
    pub fn tracks_mut(&mut self) -> &mut Vec<Track> {
        self.invalidate_general_track();
        self.touch();
        &mut self.tracks
    }

    /// Synthetic track wrapping [`GpxFile::general_segment`], built on first use.
    pub fn general_track(&self) -> Option<&Track> {
        self.general_track
            .get_or_init(|| build_general_track(&self.tracks))
            .as_ref()
    }

    /// Concatenation of every non-empty segment, present when there are at
    /// least two of them.
    pub fn general_segment(&self) -> Option<&TrkSegment> {
        self.general_track().and_then(|t| t.segments.first())
    }

    pub fn has_general_track(&self) -> bool {
        self.general_track().is_some()
    }

    pub fn add_track_segment(&mut self, points: Vec<WptPt>) {
        let tracks = self.tracks_mut();
        if tracks.is_empty() {
            tracks.push(Track::default());
        }
        if let Some(last) = tracks.last_mut() {
            last.segments.push(TrkSegment::new(points));
        }
    }

    pub fn replace_segment(&mut self, track: usize, segment: usize, new_segment: TrkSegment) -> bool {
        let Some(slot) = self
            .tracks
            .get_mut(track)
            .and_then(|t| t.segments.get_mut(segment))
        else {
            return false;
        };
        *slot = new_segment;
        self.invalidate_general_track();
        self.touch();
        true
    }

    pub fn remove_track_segment(&mut self, track: usize, segment: usize) -> Option<TrkSegment> {
        let t = self.tracks.get_mut(track)?;
        if segment >= t.segments.len() {
            return None;
        }
        let removed = t.segments.remove(segment);
        self.invalidate_general_track();
        self.touch();
        Some(removed)
    }

    /// Route decoration read outside of any `<trkseg>`.
    pub fn pending_route(&self) -> (&[RouteSegment], &[RouteType]) {
        (&self.pending_route_segments, &self.pending_route_types)
    }

    /// Moves the pending route decoration onto the first real segment.
    ///
    /// Only happens when both lists are non-empty; returns whether it moved.
    pub fn adopt_pending_route(&mut self) -> bool {
        if self.pending_route_segments.is_empty() || self.pending_route_types.is_empty() {
            return false;
        }
        let Some(first) = self.tracks.iter_mut().flat_map(|t| t.segments.iter_mut()).next() else {
            return false;
        };
        first.route_segments = std::mem::take(&mut self.pending_route_segments);
        first.route_types = std::mem::take(&mut self.pending_route_types);
        true
    }

    // ---- routes ----

    /// Appends to the last route, creating one when there is none or `new_route` is set.
    pub fn add_route_points(&mut self, points: Vec<WptPt>, new_route: bool) {
        if self.routes.is_empty() || new_route {
            self.routes.push(Route::default());
        }
        if let Some(route) = self.routes.last_mut() {
            route.points.extend(points);
        }
        self.touch_points();
    }

    pub fn replace_route_points(&mut self, points: Vec<WptPt>) {
        self.routes.clear();
        self.routes.push(Route {
            points,
            ..Route::default()
        });
        self.touch_points();
    }

    pub fn delete_route_point(&mut self, route: usize, index: usize) -> Option<WptPt> {
        let r = self.routes.get_mut(route)?;
        let removed = (index < r.points.len()).then(|| r.points.remove(index))?;
        self.touch_points();
        Some(removed)
    }

    pub fn route_points(&self) -> Vec<&WptPt> {
        self.routes.iter().flat_map(|r| r.points.iter()).collect()
    }

    /// True when every route point carries a routing profile.
    pub fn is_attached_to_roads(&self) -> bool {
        let points = self.route_points();
        !points.is_empty() && points.iter().all(|p| p.profile_type().is_some_and(|t| !t.is_empty()))
    }

    // ---- free waypoints and groups ----

    pub fn points(&self) -> &[WptPt] {
        &self.points
    }

    pub fn points_groups(&self) -> &[PointsGroup] {
        &self.points_groups
    }

    pub fn points_group(&self, name: &str) -> Option<&PointsGroup> {
        self.points_groups.iter().find(|g| g.name == name)
    }

    pub fn group_points<'a>(&'a self, group: &'a PointsGroup) -> impl Iterator<Item = &'a WptPt> + 'a {
        group.points.iter().filter_map(|&i| self.points.get(i))
    }

    pub fn waypoint_categories(&self) -> Vec<String> {
        self.points_groups.iter().map(|g| g.name.clone()).collect()
    }

    fn group_position(&self, name: &str) -> Option<usize> {
        self.points_groups.iter().position(|g| g.name == name)
    }

    /// Index of the group `point` belongs to, creating it from the point's
    /// appearance when missing.
    fn group_for(&mut self, index: usize) -> usize {
        let point = &self.points[index];
        let name = point.category.as_deref().unwrap_or_default();
        match self.group_position(name) {
            Some(pos) => pos,
            None => {
                self.points_groups.push(PointsGroup::from_point(point));
                self.points_groups.len() - 1
            }
        }
    }

    fn detach_from_group(&mut self, index: usize) {
        let name = self.points[index].category.clone().unwrap_or_default();
        if let Some(pos) = self.group_position(&name) {
            let group = &mut self.points_groups[pos];
            group.points.retain(|&i| i != index);
            if group.points.is_empty() {
                self.points_groups.remove(pos);
            }
        }
    }

    pub fn add_point(&mut self, point: WptPt) -> usize {
        self.points.push(point);
        let index = self.points.len() - 1;
        let group = self.group_for(index);
        self.points_groups[group].points.push(index);
        self.touch_points();
        index
    }

    pub fn insert_point(&mut self, position: usize, point: WptPt) -> usize {
        let position = position.min(self.points.len());
        for group in &mut self.points_groups {
            for i in &mut group.points {
                if *i >= position {
                    *i += 1;
                }
            }
        }
        self.points.insert(position, point);
        let group = self.group_for(position);
        self.points_groups[group].points.push(position);
        self.touch_points();
        position
    }

    pub fn add_points(&mut self, points: impl IntoIterator<Item = WptPt>) {
        for point in points {
            self.add_point(point);
        }
    }

    /// Adds a group and its waypoints. The waypoints take the group's name as
    /// their category; an existing group of that name absorbs them.
    pub fn add_points_group(&mut self, mut group: PointsGroup, points: Vec<WptPt>) {
        let category = (!group.name.is_empty()).then(|| group.name.clone());
        let start = self.points.len();
        self.points.extend(points.into_iter().map(|mut p| {
            p.category = category.clone();
            p
        }));
        let indices = start..self.points.len();
        match self.group_position(&group.name) {
            Some(pos) => self.points_groups[pos].points.extend(indices),
            None => {
                group.points = indices.collect();
                self.points_groups.push(group);
            }
        }
        self.touch_points();
    }

    pub fn delete_point(&mut self, index: usize) -> Option<WptPt> {
        if index >= self.points.len() {
            return None;
        }
        self.detach_from_group(index);
        let removed = self.points.remove(index);
        for group in &mut self.points_groups {
            for i in &mut group.points {
                if *i > index {
                    *i -= 1;
                }
            }
        }
        self.touch_points();
        Some(removed)
    }

    /// Rewrites a waypoint and moves it to the group of its new category.
    ///
    /// Coordinates are rounded to the written precision and the time is reset
    /// to now.
    pub fn update_point(&mut self, index: usize, update: PointUpdate) -> bool {
        if index >= self.points.len() {
            return false;
        }
        self.detach_from_group(index);
        let point = &mut self.points[index];
        point.lat = round_coordinate(update.lat);
        point.lon = round_coordinate(update.lon);
        point.time = now_millis();
        point.desc = update.desc;
        point.name = update.name;
        point.category = update.category.filter(|c| !c.is_empty());
        if let Some(color) = update.color.filter(|&c| c != 0) {
            point.set_color(color);
        }
        if let Some(icon) = update.icon_name {
            point.set_icon_name(icon);
        }
        if let Some(background) = update.background_type {
            point.set_background_type(background);
        }
        let group = self.group_for(index);
        self.points_groups[group].points.push(index);
        self.touch_points();
        true
    }

    /// Replaces the group named `prev_name` with `group`'s name and appearance.
    /// Members follow the rename.
    pub fn update_points_group(&mut self, prev_name: &str, group: PointsGroup) -> bool {
        let Some(pos) = self.group_position(prev_name) else {
            return false;
        };
        let members = std::mem::take(&mut self.points_groups[pos].points);
        let category = (!group.name.is_empty()).then(|| group.name.clone());
        for &i in &members {
            self.points[i].category = category.clone();
        }
        let existing = self
            .group_position(&group.name)
            .filter(|&other| other != pos);
        match existing {
            Some(other) => {
                self.points_groups[other].points.extend(members);
                self.points_groups.remove(pos);
            }
            None => {
                self.points_groups[pos] = PointsGroup {
                    points: members,
                    ..group
                };
            }
        }
        self.touch();
        true
    }

    pub fn clear_points(&mut self) {
        self.points.clear();
        self.points_groups.clear();
        self.touch_points();
    }

    /// Appends the waypoints, tracks and routes of `other`.
    pub fn merge_from(&mut self, other: GpxFile) {
        let GpxFile {
            tracks,
            routes,
            points,
            error,
            ..
        } = other;
        self.add_points(points);
        if !tracks.is_empty() {
            self.tracks_mut().extend(tracks);
        }
        self.routes.extend(routes);
        if error.is_some() {
            self.error = error;
        }
    }

    // ---- queries ----

    pub fn has_route(&self) -> bool {
        !self.non_empty_trk_segments(true).is_empty()
    }

    pub fn non_empty_trk_segments(&self, routes_only: bool) -> Vec<&TrkSegment> {
        self.tracks
            .iter()
            .flat_map(|t| t.segments.iter())
            .filter(|s| !s.general_segment && !s.points.is_empty() && (!routes_only || s.has_route()))
            .collect()
    }

    pub fn non_empty_segments_count(&self) -> usize {
        self.tracks
            .iter()
            .flat_map(|t| t.segments.iter())
            .filter(|s| !s.points.is_empty())
            .count()
    }

    pub fn tracks_count(&self) -> usize {
        self.tracks.iter().filter(|t| !t.general_track).count()
    }

    pub fn non_empty_tracks_count(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.segments.iter().any(|s| !s.points.is_empty()))
            .count()
    }

    pub fn all_segments_points(&self) -> Vec<&WptPt> {
        self.tracks
            .iter()
            .filter(|t| !t.general_track)
            .flat_map(|t| t.segments.iter())
            .filter(|s| !s.general_segment)
            .flat_map(|s| s.points.iter())
            .collect()
    }

    pub fn has_trk_pt(&self) -> bool {
        self.non_empty_segments_count() > 0
    }

    pub fn has_rte_pt(&self) -> bool {
        self.routes.iter().any(|r| !r.points.is_empty())
    }

    pub fn has_wpt_pt(&self) -> bool {
        !self.points.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_trk_pt() && self.points.is_empty() && self.routes.is_empty()
    }

    pub fn last_point(&self) -> Option<&WptPt> {
        self.tracks.last()?.segments.last()?.points.last()
    }

    /// First track point, else first route point, else first waypoint.
    pub fn find_point_to_show(&self) -> Option<&WptPt> {
        self.tracks
            .iter()
            .flat_map(|t| t.segments.iter())
            .find_map(|s| s.points.first())
            .or_else(|| self.routes.iter().find_map(|r| r.points.first()))
            .or_else(|| self.points.first())
    }

    /// Bounds of every track point, waypoint and route point; all zero when empty.
    pub fn rect(&self) -> QuadRect {
        let mut rect: Option<QuadRect> = None;
        let all = self
            .tracks
            .iter()
            .flat_map(|t| t.segments.iter())
            .flat_map(|s| s.points.iter())
            .chain(self.points.iter())
            .chain(self.routes.iter().flat_map(|r| r.points.iter()));
        for p in all {
            rect.get_or_insert_with(QuadRect::empty).include(p);
        }
        rect.unwrap_or(QuadRect {
            left: 0.0,
            top: 0.0,
            right: 0.0,
            bottom: 0.0,
        })
    }

    /// Index of the point whose cumulative distance is closest to `distance`.
    pub fn point_index_by_distance(points: &[WptPt], distance: f64) -> usize {
        let mut index = 0;
        let mut min_change = f64::MAX;
        for (i, p) in points.iter().enumerate() {
            let change = (p.distance - distance).abs();
            if change < min_change {
                min_change = change;
                index = i;
            }
        }
        index
    }

    /// One segment per non-empty route, colored with the route color or the
    /// document color.
    pub fn process_route_points(&self) -> Vec<TrkSegment> {
        let default_color = self.color_or(0);
        self.routes
            .iter()
            .filter(|r| !r.points.is_empty())
            .map(|r| {
                let mut segment = TrkSegment::new(r.points.clone());
                segment.set_color(r.color_or(default_color));
                segment
            })
            .collect()
    }

    /// One segment per non-empty real segment, colored with its track color or
    /// the document color.
    pub fn process_points(&self) -> Vec<TrkSegment> {
        let default_color = self.color_or(0);
        let mut result = Vec::new();
        for track in &self.tracks {
            let color = track.color_or(default_color);
            for s in track.segments.iter().filter(|s| !s.general_segment && !s.points.is_empty()) {
                let mut segment = TrkSegment::new(s.points.clone());
                segment.set_color(color);
                result.push(segment);
            }
        }
        result
    }

    // ---- document-level extensions ----

    pub fn coloring_type(&self) -> Option<&str> {
        self.extensions.get("coloring_type")
    }

    pub fn set_coloring_type(&mut self, coloring: &str) {
        self.extensions.put("coloring_type", coloring);
    }

    pub fn gradient_scale_type(&self) -> Option<&str> {
        self.extensions.get("gradient_scale_type")
    }

    pub fn remove_gradient_scale_type(&mut self) {
        self.extensions.remove("gradient_scale_type");
    }

    pub fn split_type(&self) -> Option<&str> {
        self.extensions.get("split_type")
    }

    pub fn set_split_type(&mut self, split_type: &str) {
        self.extensions.put("split_type", split_type);
    }

    /// 0 when absent or not a number.
    pub fn split_interval(&self) -> f64 {
        match self.extensions.get("split_interval") {
            Some(v) if !v.is_empty() => v.parse().unwrap_or_else(|e| {
                tracing::error!("Error reading split_interval '{v}': {e}");
                0.0
            }),
            _ => 0.0,
        }
    }

    pub fn set_split_interval(&mut self, interval: f64) {
        self.extensions.put("split_interval", interval.to_string());
    }

    /// Split settings stored in the document, if it asks for a split.
    pub fn split_options(&self) -> Option<SplitOptions> {
        let split_type = match self.split_type()? {
            "distance" => SplitType::Distance,
            "time" => SplitType::Time,
            _ => return None,
        };
        let interval = self.split_interval();
        (interval > 0.0).then_some(SplitOptions {
            split_type,
            interval,
            join_segments: false,
        })
    }

    pub fn width<'a>(&'a self, default: &'a str) -> &'a str {
        self.extensions.get_or("width", default)
    }

    pub fn set_width(&mut self, width: &str) {
        self.extensions.put("width", width);
    }

    pub fn is_show_arrows(&self) -> bool {
        self.extensions.get("show_arrows") == Some("true")
    }

    pub fn set_show_arrows(&mut self, show: bool) {
        self.extensions.put("show_arrows", show.to_string());
    }

    /// Defaults to true when the extension is absent.
    pub fn is_show_start_finish(&self) -> bool {
        self.extensions
            .get("show_start_finish")
            .is_none_or(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn set_show_start_finish(&mut self, show: bool) {
        self.extensions.put("show_start_finish", show.to_string());
    }

    pub fn reference(&self) -> Option<&str> {
        self.extensions.get("ref")
    }

    pub fn set_reference(&mut self, reference: &str) {
        self.extensions.put("ref", reference);
    }

    pub fn article_title(&self) -> Option<&str> {
        self.metadata.article_title()
    }
}

/// Concatenates copies of every non-empty real segment into one general
/// segment, marking where each source segment starts and ends.
///
/// Returns `None` unless there are at least two such segments.
pub(crate) fn build_general_track(tracks: &[Track]) -> Option<Track> {
    let sources: Vec<&TrkSegment> = tracks
        .iter()
        .filter(|t| !t.general_track)
        .flat_map(|t| t.segments.iter())
        .filter(|s| !s.general_segment && !s.points.is_empty())
        .collect();
    if sources.len() <= 1 {
        return None;
    }
    let mut general = TrkSegment {
        general_segment: true,
        ..TrkSegment::default()
    };
    for segment in sources {
        let start = general.points.len();
        general.points.extend(segment.points.iter().cloned());
        general.points[start].first_point = true;
        if let Some(last) = general.points.last_mut() {
            last.last_point = true;
        }
    }
    tracing::debug!("Built general segment with {} points", general.points.len());
    Some(Track {
        segments: vec![general],
        general_track: true,
        ..Track::default()
    })
}

/// Rounds to the seven fractional digits the writer keeps for coordinates.
pub(crate) fn round_coordinate(value: f64) -> f64 {
    (value * 1e7).round() / 1e7
}

pub fn calculate_bounds(points: &[WptPt]) -> QuadRect {
    let mut rect = QuadRect::empty();
    for p in points {
        rect.include(p);
    }
    rect
}

pub fn calculate_track_bounds(segments: &[TrkSegment]) -> QuadRect {
    let mut rect = QuadRect::empty();
    for p in segments.iter().flat_map(|s| s.points.iter()) {
        rect.include(p);
    }
    rect
}

pub fn calculate_track_points(segments: &[TrkSegment]) -> usize {
    segments.iter().map(|s| s.points.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wpt(lat: f64, lon: f64, category: Option<&str>) -> WptPt {
        let mut p = WptPt::new(lat, lon);
        p.category = category.map(str::to_string);
        p
    }

    fn assert_group_invariant(file: &GpxFile) {
        for (i, p) in file.points().iter().enumerate() {
            let name = p.category.as_deref().unwrap_or("");
            let group = file.points_group(name).expect("group exists");
            assert_eq!(group.points.iter().filter(|&&m| m == i).count(), 1);
            let elsewhere = file
                .points_groups()
                .iter()
                .filter(|g| g.name != name)
                .any(|g| g.points.contains(&i));
            assert!(!elsewhere);
        }
    }

    #[test]
    fn test_add_point_creates_group() {
        let mut file = GpxFile::new(None);
        file.add_point(wpt(1.0, 1.0, Some("Food")));
        file.add_point(wpt(2.0, 2.0, None));
        file.add_point(wpt(3.0, 3.0, Some("Food")));
        assert_eq!(file.waypoint_categories(), vec!["Food", ""]);
        assert_eq!(file.points_group("Food").unwrap().points, vec![0, 2]);
        assert!(file.points_modified_time > 0);
        assert_group_invariant(&file);
    }

    #[test]
    fn test_insert_point_shifts_indices() {
        let mut file = GpxFile::new(None);
        file.add_point(wpt(1.0, 1.0, Some("A")));
        file.add_point(wpt(2.0, 2.0, Some("B")));
        file.insert_point(0, wpt(0.5, 0.5, Some("B")));
        assert_eq!(file.points_group("A").unwrap().points, vec![1]);
        assert_eq!(file.points_group("B").unwrap().points, vec![2, 0]);
        assert_group_invariant(&file);
    }

    #[test]
    fn test_delete_point_drops_empty_group() {
        let mut file = GpxFile::new(None);
        file.add_point(wpt(1.0, 1.0, Some("A")));
        file.add_point(wpt(2.0, 2.0, Some("B")));
        file.add_point(wpt(3.0, 3.0, Some("B")));
        let removed = file.delete_point(0).unwrap();
        assert_eq!(removed.lat, 1.0);
        assert!(file.points_group("A").is_none());
        assert_eq!(file.points_group("B").unwrap().points, vec![0, 1]);
        assert!(file.delete_point(10).is_none());
        assert_group_invariant(&file);
    }

    #[test]
    fn test_update_point_moves_group() {
        let mut file = GpxFile::new(None);
        file.add_point(wpt(1.0, 1.0, Some("A")));
        file.add_point(wpt(2.0, 2.0, Some("A")));
        let updated = file.update_point(
            1,
            PointUpdate {
                lat: 2.123456789,
                lon: 3.0,
                category: Some("C".to_string()),
                icon_name: Some("cafe".to_string()),
                ..PointUpdate::default()
            },
        );
        assert!(updated);
        let p = &file.points()[1];
        assert_eq!(p.lat, 2.1234568);
        assert_eq!(p.icon_name(), Some("cafe"));
        assert_eq!(file.points_group("A").unwrap().points, vec![0]);
        assert_eq!(file.points_group("C").unwrap().points, vec![1]);
        assert_eq!(file.points_group("C").unwrap().icon_name.as_deref(), Some("cafe"));
        assert_group_invariant(&file);
    }

    #[test]
    fn test_update_points_group_renames_members() {
        let mut file = GpxFile::new(None);
        file.add_point(wpt(1.0, 1.0, Some("A")));
        file.add_point(wpt(2.0, 2.0, Some("B")));
        let renamed = PointsGroup {
            color: Some(0xFF00_00FF),
            ..PointsGroup::new("Z")
        };
        assert!(file.update_points_group("A", renamed));
        assert_eq!(file.points()[0].category.as_deref(), Some("Z"));
        assert_eq!(file.points_group("Z").unwrap().color, Some(0xFF00_00FF));
        assert!(!file.update_points_group("missing", PointsGroup::new("Q")));
        assert_group_invariant(&file);
    }

    #[test]
    fn test_add_points_group_assigns_category() {
        let mut file = GpxFile::new(None);
        file.add_points_group(
            PointsGroup::new("Camp"),
            vec![wpt(1.0, 1.0, None), wpt(2.0, 2.0, Some("Other"))],
        );
        assert_eq!(file.points_group("Camp").unwrap().points, vec![0, 1]);
        assert!(file.points().iter().all(|p| p.category.as_deref() == Some("Camp")));
        assert_group_invariant(&file);
    }

    #[test]
    fn test_general_track_is_invalidated_by_track_mutation() {
        let mut file = GpxFile::new(None);
        file.add_track_segment(vec![WptPt::new(0.0, 0.0), WptPt::new(0.0, 0.1)]);
        assert!(file.general_track().is_none());
        file.add_track_segment(vec![WptPt::new(1.0, 0.0), WptPt::new(1.0, 0.1)]);
        let general = file.general_segment().unwrap();
        assert_eq!(general.points.len(), 4);
        file.remove_track_segment(0, 1);
        assert!(file.general_track().is_none());
        assert_eq!(file.tracks()[0].segments.len(), 1);
    }

    #[test]
    fn test_adopt_pending_route_needs_both_lists() {
        let mut file = GpxFile::new(None);
        file.add_track_segment(vec![WptPt::new(0.0, 0.0)]);
        file.pending_route_segments.push(RouteSegment::default());
        assert!(!file.adopt_pending_route());
        file.pending_route_types.push(RouteType::default());
        assert!(file.adopt_pending_route());
        assert!(file.tracks()[0].segments[0].has_route());
        assert!(file.pending_route().0.is_empty());
    }

    #[test]
    fn test_route_points_helpers() {
        let mut file = GpxFile::new(None);
        file.add_route_points(vec![WptPt::new(1.0, 1.0)], false);
        file.add_route_points(vec![WptPt::new(2.0, 2.0)], false);
        file.add_route_points(vec![WptPt::new(3.0, 3.0)], true);
        assert_eq!(file.routes.len(), 2);
        assert_eq!(file.route_points().len(), 3);
        assert!(file.delete_route_point(0, 1).is_some());
        assert!(file.delete_route_point(5, 0).is_none());
        file.replace_route_points(vec![WptPt::new(9.0, 9.0)]);
        assert_eq!(file.routes.len(), 1);
        assert!(!file.is_attached_to_roads());
    }

    #[test]
    fn test_failed_route_point_delete_keeps_timestamps() {
        let mut file = GpxFile::new(None);
        file.add_route_points(vec![WptPt::new(1.0, 1.0)], false);
        file.modified_time = 0;
        file.points_modified_time = 0;
        assert!(file.delete_route_point(0, 3).is_none());
        assert!(file.delete_route_point(2, 0).is_none());
        assert_eq!((file.modified_time, file.points_modified_time), (0, 0));
        assert!(file.delete_route_point(0, 0).is_some());
        assert!(file.points_modified_time > 0);
    }

    #[test]
    fn test_rect_and_point_to_show() {
        let mut file = GpxFile::new(None);
        assert_eq!(file.rect().left, 0.0);
        assert!(file.find_point_to_show().is_none());
        file.add_point(wpt(10.0, 20.0, None));
        file.add_route_points(vec![WptPt::new(-5.0, 30.0)], false);
        let rect = file.rect();
        assert_eq!((rect.left, rect.right, rect.top, rect.bottom), (20.0, 30.0, 10.0, -5.0));
        assert_eq!(file.find_point_to_show().unwrap().lat, -5.0);
    }

    #[test]
    fn test_document_extension_accessors() {
        let mut file = GpxFile::new(None);
        assert!(file.is_show_start_finish());
        assert!(!file.is_show_arrows());
        assert_eq!(file.split_interval(), 0.0);
        assert_eq!(file.width("thin"), "thin");
        file.set_show_start_finish(false);
        file.set_show_arrows(true);
        file.set_split_type("time");
        file.set_split_interval(60.0);
        assert!(!file.is_show_start_finish());
        assert!(file.is_show_arrows());
        let split = file.split_options().unwrap();
        assert_eq!(split.split_type, SplitType::Time);
        assert_eq!(split.interval, 60.0);
        file.extensions.put("split_interval", "abc");
        assert_eq!(file.split_interval(), 0.0);
        assert!(file.split_options().is_none());
    }

    #[test]
    fn test_process_points_uses_fallback_color() {
        let mut file = GpxFile::new(None);
        file.set_color(0xFF11_2233);
        file.add_track_segment(vec![WptPt::new(0.0, 0.0)]);
        file.tracks_mut()[0].set_color(0xFFFF_0000);
        file.add_route_points(vec![WptPt::new(1.0, 1.0)], false);
        assert_eq!(file.process_points()[0].color(), Some(0xFFFF_0000));
        assert_eq!(file.process_route_points()[0].color(), Some(0xFF11_2233));
    }

    #[test]
    fn test_merge_from() {
        let mut a = GpxFile::new(None);
        a.add_point(wpt(1.0, 1.0, Some("A")));
        let mut b = GpxFile::new(None);
        b.add_point(wpt(2.0, 2.0, Some("B")));
        b.add_track_segment(vec![WptPt::new(0.0, 0.0)]);
        b.error = Some(GpxError::Cancelled);
        a.merge_from(b);
        assert_eq!(a.points().len(), 2);
        assert_eq!(a.tracks().len(), 1);
        assert_eq!(a.error, Some(GpxError::Cancelled));
        assert_group_invariant(&a);
    }

    #[test]
    fn test_general_segment_marks_boundaries() {
        let mut file = GpxFile::new(None);
        file.add_track_segment(vec![WptPt::new(0.0, 0.0), WptPt::new(0.0, 0.1)]);
        file.add_track_segment(Vec::new());
        file.add_track_segment(vec![WptPt::new(1.0, 0.0), WptPt::new(1.0, 0.1), WptPt::new(1.0, 0.2)]);
        let general = file.general_segment().unwrap();
        assert!(general.general_segment);
        assert!(file.general_track().unwrap().general_track);
        let flags: Vec<_> = general.points.iter().map(|p| (p.first_point, p.last_point)).collect();
        assert_eq!(
            flags,
            vec![(true, false), (false, true), (true, false), (false, false), (false, true)]
        );
        // source points stay untouched
        assert!(!file.tracks()[0].segments[0].points[0].first_point);
    }

    #[test]
    fn test_calculate_bounds() {
        let rect = calculate_bounds(&[WptPt::new(1.0, 2.0), WptPt::new(-1.0, 5.0)]);
        assert_eq!((rect.left, rect.top, rect.right, rect.bottom), (2.0, 1.0, 5.0, -1.0));
        let seg = TrkSegment::new(vec![WptPt::new(1.0, 2.0)]);
        assert_eq!(calculate_track_points(std::slice::from_ref(&seg)), 1);
        assert_eq!(calculate_track_bounds(&[seg]).left, 2.0);
    }
}
