use serde::Serialize;

use crate::extensions::{
    Extensions, HasExtensions, ADDRESS_EXTENSION, AMENITY_ORIGIN_EXTENSION,
    BACKGROUND_TYPE_EXTENSION, GAP_PROFILE_TYPE, ICON_NAME_EXTENSION, PROFILE_TYPE_EXTENSION,
    TRKPT_INDEX_EXTENSION,
};
use crate::impl_has_extensions;

/// Longitude given to the synthetic points inserted where a polyline crosses the
/// antimeridian. The writer never emits points sitting exactly on it.
pub const PRIME_MERIDIAN: f64 = 179.999991234;

/// "Unknown" latitude/longitude used by point interpolation.
pub const NO_COORDINATE: f64 = -360.0;

/// "Unknown" timestamp.
pub const NO_TIME: i64 = 0;

pub const DEFAULT_ICON_NAME: &str = "special_star";

/// Attribute driving a track colorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorizationType {
    Speed,
    Elevation,
    Slope,
    None,
}

/// A single GPX point (used for wpt, rtept, trkpt).
#[derive(Debug, Clone, PartialEq)]
pub struct WptPt {
    pub lat: f64,
    pub lon: f64,
    pub name: Option<String>,
    pub link: Option<String>,
    /// Waypoint type; older files spell it `category`.
    pub category: Option<String>,
    pub desc: Option<String>,
    pub comment: Option<String>,
    /// Milliseconds since the Unix epoch, `NO_TIME` when unspecified.
    pub time: i64,
    /// Metres, NaN when unknown.
    pub ele: f64,
    /// Metres per second, 0 when unspecified.
    pub speed: f64,
    pub hdop: f64,
    /// Degrees, NaN when unknown.
    pub heading: f64,
    pub first_point: bool,
    pub last_point: bool,
    /// Cumulative distance inside its segment; only meaningful right after
    /// [`TrkSegment::update_distances`].
    pub distance: f64,
    pub speed_color: u32,
    pub altitude_color: u32,
    pub slope_color: u32,
    pub extensions: Extensions,
}

impl Default for WptPt {
    fn default() -> Self {
        Self {
            lat: 0.0,
            lon: 0.0,
            name: None,
            link: None,
            category: None,
            desc: None,
            comment: None,
            time: NO_TIME,
            ele: f64::NAN,
            speed: 0.0,
            hdop: f64::NAN,
            heading: f64::NAN,
            first_point: false,
            last_point: false,
            distance: 0.0,
            speed_color: 0,
            altitude_color: 0,
            slope_color: 0,
            extensions: Extensions::new(),
        }
    }
}

impl WptPt {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            ..Self::default()
        }
    }

    pub fn with_values(lat: f64, lon: f64, time: i64, ele: f64, speed: f64, hdop: f64) -> Self {
        Self {
            lat,
            lon,
            time,
            ele,
            speed,
            hdop,
            ..Self::default()
        }
    }

    pub fn has_location(&self) -> bool {
        self.lat != 0.0 && self.lon != 0.0
    }

    pub fn icon_name(&self) -> Option<&str> {
        self.extensions.get(ICON_NAME_EXTENSION)
    }

    pub fn icon_name_or_default(&self) -> &str {
        self.icon_name().unwrap_or(DEFAULT_ICON_NAME)
    }

    pub fn set_icon_name(&mut self, icon: impl Into<String>) {
        self.extensions.put(ICON_NAME_EXTENSION, icon);
    }

    pub fn background_type(&self) -> Option<&str> {
        self.extensions.get(BACKGROUND_TYPE_EXTENSION)
    }

    pub fn set_background_type(&mut self, background: impl Into<String>) {
        self.extensions.put(BACKGROUND_TYPE_EXTENSION, background);
    }

    pub fn amenity_origin_name(&self) -> Option<&str> {
        self.extensions.get(AMENITY_ORIGIN_EXTENSION)
    }

    pub fn set_amenity_origin_name(&mut self, origin: impl Into<String>) {
        self.extensions.put(AMENITY_ORIGIN_EXTENSION, origin);
    }

    pub fn address(&self) -> Option<&str> {
        self.extensions.get(ADDRESS_EXTENSION)
    }

    /// A blank address removes the extension.
    pub fn set_address(&mut self, address: &str) {
        if address.trim().is_empty() {
            self.extensions.remove(ADDRESS_EXTENSION);
        } else {
            self.extensions.put(ADDRESS_EXTENSION, address);
        }
    }

    pub fn profile_type(&self) -> Option<&str> {
        self.extensions.get(PROFILE_TYPE_EXTENSION)
    }

    pub fn set_profile_type(&mut self, profile: impl Into<String>) {
        self.extensions.put(PROFILE_TYPE_EXTENSION, profile);
    }

    pub fn remove_profile_type(&mut self) {
        self.extensions.remove(PROFILE_TYPE_EXTENSION);
    }

    pub fn has_profile(&self) -> bool {
        self.profile_type().is_some_and(|p| p != GAP_PROFILE_TYPE)
    }

    pub fn is_gap(&self) -> bool {
        self.profile_type() == Some(GAP_PROFILE_TYPE)
    }

    pub fn set_gap(&mut self) {
        self.set_profile_type(GAP_PROFILE_TYPE);
    }

    /// Index into the owning track, `-1` when absent or not a number.
    pub fn trkpt_index(&self) -> i32 {
        self.extensions
            .get(TRKPT_INDEX_EXTENSION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(-1)
    }

    pub fn set_trkpt_index(&mut self, index: i32) {
        self.extensions.put(TRKPT_INDEX_EXTENSION, index.to_string());
    }

    pub fn colorization_color(&self, kind: ColorizationType) -> u32 {
        match kind {
            ColorizationType::Speed => self.speed_color,
            ColorizationType::Elevation => self.altitude_color,
            _ => self.slope_color,
        }
    }

    pub fn set_colorization_color(&mut self, kind: ColorizationType, color: u32) {
        match kind {
            ColorizationType::Speed => self.speed_color = color,
            ColorizationType::Elevation => self.altitude_color = color,
            ColorizationType::Slope => self.slope_color = color,
            ColorizationType::None => {}
        }
    }

    pub fn is_time_specified(&self) -> bool {
        self.time != NO_TIME
    }

    pub fn is_elevation_specified(&self) -> bool {
        !self.ele.is_nan()
    }

    /// Synthetic antimeridian points sit exactly on `±PRIME_MERIDIAN`.
    pub fn is_artificial(&self) -> bool {
        self.lon.abs() == PRIME_MERIDIAN
    }
}

/// One record of the OsmAnd route decoration stored under a segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteSegment {
    pub id: Option<String>,
    pub length: Option<String>,
    pub segment_time: Option<String>,
    pub speed: Option<String>,
    pub turn_type: Option<String>,
    pub turn_angle: Option<String>,
    pub skip_turn: Option<String>,
    pub types: Option<String>,
    pub point_types: Option<String>,
    pub names: Option<String>,
}

impl RouteSegment {
    /// XML attribute names paired with their values, in write order.
    pub fn attributes(&self) -> [(&'static str, Option<&str>); 10] {
        [
            ("id", self.id.as_deref()),
            ("length", self.length.as_deref()),
            ("segmentTime", self.segment_time.as_deref()),
            ("speed", self.speed.as_deref()),
            ("turnType", self.turn_type.as_deref()),
            ("turnAngle", self.turn_angle.as_deref()),
            ("skipTurn", self.skip_turn.as_deref()),
            ("types", self.types.as_deref()),
            ("pointTypes", self.point_types.as_deref()),
            ("names", self.names.as_deref()),
        ]
    }

    pub fn set_attribute(&mut self, name: &str, value: String) {
        let slot = match name {
            "id" => &mut self.id,
            "length" => &mut self.length,
            "segmentTime" => &mut self.segment_time,
            "speed" => &mut self.speed,
            "turnType" => &mut self.turn_type,
            "turnAngle" => &mut self.turn_angle,
            "skipTurn" => &mut self.skip_turn,
            "types" => &mut self.types,
            "pointTypes" => &mut self.point_types,
            "names" => &mut self.names,
            _ => return,
        };
        *slot = Some(value);
    }
}

/// Tag/value pair referenced by [`RouteSegment::types`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteType {
    pub tag: Option<String>,
    pub value: Option<String>,
}

/// A GPX track segment (<trkseg>).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrkSegment {
    pub name: Option<String>,
    /// Set only on the synthetic concatenation of all segments.
    pub general_segment: bool,
    pub points: Vec<WptPt>,
    pub route_segments: Vec<RouteSegment>,
    pub route_types: Vec<RouteType>,
    pub extensions: Extensions,
}

impl TrkSegment {
    pub fn new(points: Vec<WptPt>) -> Self {
        Self {
            points,
            ..Self::default()
        }
    }

    pub fn has_route(&self) -> bool {
        !self.route_segments.is_empty() && !self.route_types.is_empty()
    }

    /// Recomputes the cumulative distance stored on every point.
    pub fn update_distances(&mut self) {
        let mut total = 0.0;
        let mut prev: Option<(f64, f64)> = None;
        for p in &mut self.points {
            if let Some((lat, lon)) = prev {
                total += crate::geodesy::distance(lat, lon, p.lat, p.lon);
            }
            p.distance = total;
            prev = Some((p.lat, p.lon));
        }
    }
}

/// A GPX track (<trk>).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    pub name: Option<String>,
    pub desc: Option<String>,
    pub segments: Vec<TrkSegment>,
    /// Set only on the synthetic track wrapping the general segment.
    pub general_track: bool,
    pub extensions: Extensions,
}

/// A GPX route (<rte>).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Route {
    pub name: Option<String>,
    pub desc: Option<String>,
    pub points: Vec<WptPt>,
    pub extensions: Extensions,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Author {
    pub name: Option<String>,
    pub email: Option<String>,
    pub link: Option<String>,
    pub extensions: Extensions,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Copyright {
    pub author: Option<String>,
    pub year: Option<String>,
    pub license: Option<String>,
    pub extensions: Extensions,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bounds {
    pub minlat: f64,
    pub minlon: f64,
    pub maxlat: f64,
    pub maxlon: f64,
    pub extensions: Extensions,
}

/// Document metadata (<metadata>).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub name: Option<String>,
    pub desc: Option<String>,
    pub link: Option<String>,
    pub keywords: Option<String>,
    /// Creation time in epoch milliseconds, 0 when unknown.
    pub time: i64,
    pub author: Option<Author>,
    pub copyright: Option<Copyright>,
    pub bounds: Option<Bounds>,
    pub extensions: Extensions,
}

impl Metadata {
    pub fn article_title(&self) -> Option<&str> {
        self.extensions.get("article_title")
    }

    pub fn article_lang(&self) -> Option<&str> {
        self.extensions.get("article_lang")
    }

    pub fn description(&self) -> Option<&str> {
        self.extensions.get("desc")
    }
}

/// Named bucket of free waypoints. Members are indices into the document's
/// waypoint list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointsGroup {
    pub name: String,
    pub icon_name: Option<String>,
    pub background_type: Option<String>,
    pub color: Option<u32>,
    pub points: Vec<usize>,
}

impl PointsGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Group prototype seeded from a waypoint's category and appearance.
    pub fn from_point(point: &WptPt) -> Self {
        Self {
            name: point.category.clone().unwrap_or_default(),
            icon_name: point.icon_name().map(str::to_string),
            background_type: point.background_type().map(str::to_string),
            color: point.color(),
            points: Vec::new(),
        }
    }
}

impl_has_extensions!(WptPt, TrkSegment, Track, Route, Author, Copyright, Bounds, Metadata);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_point_has_unknown_values() {
        let p = WptPt::new(1.0, 2.0);
        assert!(p.ele.is_nan());
        assert!(p.hdop.is_nan());
        assert!(p.heading.is_nan());
        assert_eq!(p.time, NO_TIME);
        assert!(!p.is_elevation_specified());
        assert!(p.has_location());
    }

    #[test]
    fn test_profile_and_gap() {
        let mut p = WptPt::new(1.0, 2.0);
        assert!(!p.has_profile());
        p.set_profile_type("car");
        assert!(p.has_profile());
        p.set_gap();
        assert!(p.is_gap());
        assert!(!p.has_profile());
        p.remove_profile_type();
        assert_eq!(p.profile_type(), None);
    }

    #[test]
    fn test_trkpt_index() {
        let mut p = WptPt::new(1.0, 2.0);
        assert_eq!(p.trkpt_index(), -1);
        p.set_trkpt_index(42);
        assert_eq!(p.trkpt_index(), 42);
        p.extensions.put(TRKPT_INDEX_EXTENSION, "x");
        assert_eq!(p.trkpt_index(), -1);
    }

    #[test]
    fn test_blank_address_removes_extension() {
        let mut p = WptPt::new(1.0, 2.0);
        p.set_address("Main street 1");
        assert_eq!(p.address(), Some("Main street 1"));
        p.set_address("  ");
        assert_eq!(p.address(), None);
    }

    #[test]
    fn test_group_from_point() {
        let mut p = WptPt::new(1.0, 2.0);
        p.category = Some("Food".to_string());
        p.set_icon_name("restaurant");
        p.set_color(0xFFFF_0000);
        let g = PointsGroup::from_point(&p);
        assert_eq!(g.name, "Food");
        assert_eq!(g.icon_name.as_deref(), Some("restaurant"));
        assert_eq!(g.color, Some(0xFFFF_0000));
        assert_eq!(g.background_type, None);
    }

    #[test]
    fn test_update_distances() {
        let mut seg = TrkSegment::new(vec![
            WptPt::new(0.0, 0.0),
            WptPt::new(0.0, 0.01),
            WptPt::new(0.0, 0.02),
        ]);
        seg.update_distances();
        assert_eq!(seg.points[0].distance, 0.0);
        assert!((seg.points[2].distance - 2.0 * seg.points[1].distance).abs() < 1e-6);
    }

    #[test]
    fn test_route_segment_attributes() {
        let mut s = RouteSegment::default();
        s.set_attribute("segmentTime", "12".to_string());
        s.set_attribute("unknown", "x".to_string());
        assert_eq!(s.segment_time.as_deref(), Some("12"));
        let written: Vec<_> = s.attributes().into_iter().filter(|(_, v)| v.is_some()).collect();
        assert_eq!(written, vec![("segmentTime", Some("12"))]);
    }
}
