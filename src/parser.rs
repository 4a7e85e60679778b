//! Streaming GPX reader.
//!
//! Entities under construction sit on a state stack; the top entry decides how
//! a start tag is handled. Parsing never fails outright: a fatal error is stored
//! on the returned document next to whatever was read before it.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

use quick_xml::Reader;
use quick_xml::events::{BytesRef, BytesStart, Event};

use crate::document::GpxFile;
use crate::error::{GpxError, Result};
use crate::extensions::{Extensions, parse_color};
use crate::gpx_time::parse_time;
use crate::gpx_types::*;
use crate::groups::merge_points_groups;
use crate::progress::{NoProgress, Progress};

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Hook consulted for every extension element that is not one of the OsmAnd
/// structural containers.
pub trait ExtensionsReader {
    /// `tag` is the element's local name; `values` its flattened text content.
    /// Return `true` when the element was handled and must not be stored as
    /// flat extension pairs.
    fn read_extension(
        &mut self,
        file: &mut GpxFile,
        tag: &str,
        attributes: &[(String, String)],
        values: &[(String, String)],
    ) -> bool;
}

/// Parse a GPX document from a byte stream.
pub fn parse_gpx<R: Read>(input: R) -> GpxFile {
    parse_gpx_with(input, None, &mut NoProgress)
}

/// Parse a GPX document held in memory.
pub fn parse_gpx_str(xml: &str) -> GpxFile {
    parse_gpx(xml.as_bytes())
}

/// Parse a GPX file. The document's `path` is the absolute file path and both
/// modification times are the file's mtime.
pub fn parse_gpx_file(path: impl AsRef<Path>) -> GpxFile {
    let path = path.as_ref();
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let (mut file, modified) = match File::open(path) {
        Ok(f) => {
            let modified = f
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_millis() as i64);
            (parse_gpx(f), modified)
        }
        Err(e) => {
            tracing::error!("Error reading gpx {}: {e}", absolute.display());
            let mut file = GpxFile::new(None);
            file.error = Some(e.into());
            (file, 0)
        }
    };
    file.path = absolute.to_string_lossy().into_owned();
    file.modified_time = modified;
    file.points_modified_time = modified;
    file
}

/// Parse with an optional extensions hook and a progress sink. The sink gets
/// one unit per waypoint and can cancel the read.
pub fn parse_gpx_with<R: Read>(
    input: R,
    extensions_reader: Option<&mut dyn ExtensionsReader>,
    progress: &mut dyn Progress,
) -> GpxFile {
    let mut input = BufReader::new(input);
    let mut parser = GpxReader::new(extensions_reader, progress);
    if let Err(e) = skip_bom(&mut input).and_then(|()| parser.run(input)) {
        tracing::error!("Error reading gpx: {e}");
        parser.file.error = Some(e);
    }
    parser.finish()
}

fn skip_bom<R: BufRead>(input: &mut R) -> Result<()> {
    let head = input.fill_buf()?;
    if head.starts_with(&UTF8_BOM) {
        input.consume(UTF8_BOM.len());
    }
    Ok(())
}

/// quick-xml reader whose end tags are checked against the open tags
/// ignoring ASCII case.
struct XmlSource<R> {
    reader: Reader<R>,
    open: Vec<Vec<u8>>,
}

impl<R: BufRead> XmlSource<R> {
    fn new(input: R) -> Self {
        let mut reader = Reader::from_reader(input);
        reader.config_mut().check_end_names = false;
        Self {
            reader,
            open: Vec::new(),
        }
    }

    fn next<'b>(&mut self, buf: &'b mut Vec<u8>) -> Result<Event<'b>> {
        let event = self.reader.read_event_into(buf)?;
        match &event {
            Event::Start(e) => self.open.push(e.name().as_ref().to_vec()),
            Event::End(e) => {
                let found = e.name();
                match self.open.pop() {
                    Some(expected) if expected.eq_ignore_ascii_case(found.as_ref()) => {}
                    expected => {
                        return Err(GpxError::MalformedXml(format!(
                            "expected </{}>, but </{}> was found",
                            String::from_utf8_lossy(expected.as_deref().unwrap_or_default()),
                            String::from_utf8_lossy(found.as_ref()),
                        )));
                    }
                }
            }
            Event::Eof => {
                if let Some(open) = self.open.last() {
                    return Err(GpxError::MalformedXml(format!(
                        "unexpected end of document inside <{}>",
                        String::from_utf8_lossy(open)
                    )));
                }
            }
            _ => {}
        }
        Ok(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PointRef {
    Free(usize),
    Route(usize, usize),
    Track(usize, usize, usize),
    RouteTrack(usize),
}

/// Entity currently open on the state stack.
#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Document,
    Metadata,
    Author,
    Copyright,
    Bounds,
    Track(usize),
    Segment(usize, usize),
    Route(usize),
    Point(PointRef),
}

#[derive(Debug, Default)]
struct ExtensionMode {
    active: bool,
    route_point: bool,
    route: bool,
    types: bool,
    points_groups: bool,
}

struct GpxReader<'r, 'p> {
    file: GpxFile,
    stack: Vec<State>,
    mode: ExtensionMode,
    buf: Vec<u8>,
    route_track: Vec<WptPt>,
    route_segments: Vec<RouteSegment>,
    route_types: Vec<RouteType>,
    groups: Vec<PointsGroup>,
    extensions_reader: Option<&'r mut dyn ExtensionsReader>,
    progress: &'p mut dyn Progress,
}

impl<'r, 'p> GpxReader<'r, 'p> {
    fn new(extensions_reader: Option<&'r mut dyn ExtensionsReader>, progress: &'p mut dyn Progress) -> Self {
        Self {
            file: GpxFile::new(None),
            stack: vec![State::Document],
            mode: ExtensionMode::default(),
            buf: Vec::new(),
            route_track: Vec::new(),
            route_segments: Vec::new(),
            route_types: Vec::new(),
            groups: Vec::new(),
            extensions_reader,
            progress,
        }
    }

    fn run<R: BufRead>(&mut self, input: R) -> Result<()> {
        let mut reader = XmlSource::new(input);
        loop {
            let event = reader.next(&mut self.buf)?.into_owned();
            self.buf.clear();
            match event {
                Event::Start(e) => self.start(&mut reader, &e, false)?,
                Event::Empty(e) => {
                    self.start(&mut reader, &e, true)?;
                    self.end(&tag_name(e.local_name().as_ref()));
                }
                Event::End(e) => self.end(&tag_name(e.local_name().as_ref())),
                Event::Eof => return Ok(()),
                _ => {}
            }
        }
    }

    /// Post-pass: route-point track, pending route decoration, points-groups
    /// and antimeridian points.
    fn finish(self) -> GpxFile {
        let mut file = self.file;
        file.pending_route_segments = self.route_segments;
        file.pending_route_types = self.route_types;
        file.adopt_pending_route();
        if !self.route_track.is_empty() {
            file.tracks.push(Track {
                segments: vec![TrkSegment::new(self.route_track)],
                ..Track::default()
            });
        }
        if !self.groups.is_empty() || !file.points.is_empty() {
            file.points_groups = merge_points_groups(self.groups, &file.points);
        }
        file.split_antimeridian();
        file
    }

    fn top(&self) -> State {
        self.stack.last().copied().unwrap_or(State::Document)
    }

    fn start<R: BufRead>(&mut self, reader: &mut XmlSource<R>, e: &BytesStart<'_>, empty: bool) -> Result<()> {
        let tag = tag_name(e.local_name().as_ref());
        let top = self.top();
        if self.mode.active && !self.mode.route_point {
            return self.start_extension(reader, e, &tag, empty, top);
        }
        if tag == "extensions" {
            self.mode.active = true;
            return Ok(());
        }
        if self.mode.route_point {
            if tag == "rpt" {
                let point = point_from_attributes(e)?;
                self.route_track.push(point);
                self.push_point(PointRef::RouteTrack(self.route_track.len() - 1))?;
            }
            return Ok(());
        }
        match top {
            State::Document => match tag.as_str() {
                "gpx" => self.file.author = attribute(e, "creator")?,
                "metadata" => {
                    self.file.metadata = Metadata::default();
                    self.stack.push(State::Metadata);
                }
                "trk" => {
                    self.file.tracks.push(Track::default());
                    self.stack.push(State::Track(self.file.tracks.len() - 1));
                }
                "rte" => {
                    self.file.routes.push(Route::default());
                    self.stack.push(State::Route(self.file.routes.len() - 1));
                }
                "wpt" => {
                    self.file.points.push(point_from_attributes(e)?);
                    self.push_point(PointRef::Free(self.file.points.len() - 1))?;
                }
                _ => {}
            },
            State::Metadata => match tag.as_str() {
                "name" => self.file.metadata.name = read_text(reader, &mut self.buf, e, empty)?,
                "desc" => self.file.metadata.desc = read_text(reader, &mut self.buf, e, empty)?,
                "keywords" => self.file.metadata.keywords = read_text(reader, &mut self.buf, e, empty)?,
                "time" => {
                    let text = read_text(reader, &mut self.buf, e, empty)?;
                    self.file.metadata.time = text.as_deref().map_or(NO_TIME, parse_time);
                }
                "link" => self.file.metadata.link = read_link(reader, &mut self.buf, e, empty)?,
                "author" => {
                    self.file.metadata.author = Some(Author::default());
                    self.stack.push(State::Author);
                }
                "copyright" => {
                    self.file.metadata.copyright = Some(Copyright {
                        author: attribute(e, "author")?,
                        ..Copyright::default()
                    });
                    self.stack.push(State::Copyright);
                }
                "bounds" => {
                    self.file.metadata.bounds = Some(bounds_from_attributes(e)?);
                    self.stack.push(State::Bounds);
                }
                _ => {}
            },
            State::Author => {
                let Some(author) = self.file.metadata.author.as_mut() else {
                    return Ok(());
                };
                match tag.as_str() {
                    "name" => author.name = read_text(reader, &mut self.buf, e, empty)?,
                    "email" => {
                        let id = attribute(e, "id")?.filter(|s| !s.is_empty());
                        let domain = attribute(e, "domain")?.filter(|s| !s.is_empty());
                        if let (Some(id), Some(domain)) = (id, domain) {
                            author.email = Some(format!("{id}@{domain}"));
                        }
                    }
                    "link" => author.link = read_link(reader, &mut self.buf, e, empty)?,
                    _ => {}
                }
            }
            State::Copyright => {
                let Some(copyright) = self.file.metadata.copyright.as_mut() else {
                    return Ok(());
                };
                match tag.as_str() {
                    "year" => copyright.year = read_text(reader, &mut self.buf, e, empty)?,
                    "license" => copyright.license = read_text(reader, &mut self.buf, e, empty)?,
                    _ => {}
                }
            }
            State::Bounds => {}
            State::Route(r) => match tag.as_str() {
                "name" => self.file.routes[r].name = read_text(reader, &mut self.buf, e, empty)?,
                "desc" => self.file.routes[r].desc = read_text(reader, &mut self.buf, e, empty)?,
                "rtept" => {
                    let route = &mut self.file.routes[r];
                    route.points.push(point_from_attributes(e)?);
                    let index = route.points.len() - 1;
                    self.push_point(PointRef::Route(r, index))?;
                }
                _ => {}
            },
            State::Track(t) => match tag.as_str() {
                "name" => self.file.tracks[t].name = read_text(reader, &mut self.buf, e, empty)?,
                "desc" => self.file.tracks[t].desc = read_text(reader, &mut self.buf, e, empty)?,
                "trkseg" => {
                    let track = &mut self.file.tracks[t];
                    track.segments.push(TrkSegment::default());
                    self.stack.push(State::Segment(t, track.segments.len() - 1));
                }
                "trkpt" | "rpt" => {
                    let track = &mut self.file.tracks[t];
                    if track.segments.is_empty() {
                        track.segments.push(TrkSegment::default());
                    }
                    let s = track.segments.len() - 1;
                    let points = &mut track.segments[s].points;
                    points.push(point_from_attributes(e)?);
                    let index = points.len() - 1;
                    self.push_point(PointRef::Track(t, s, index))?;
                }
                _ => {}
            },
            State::Segment(t, s) => match tag.as_str() {
                "name" => {
                    self.file.tracks[t].segments[s].name = read_text(reader, &mut self.buf, e, empty)?;
                }
                "trkpt" | "rpt" => {
                    let points = &mut self.file.tracks[t].segments[s].points;
                    points.push(point_from_attributes(e)?);
                    let index = points.len() - 1;
                    self.push_point(PointRef::Track(t, s, index))?;
                }
                "csvattributes" => {
                    let text = read_text(reader, &mut self.buf, e, empty)?.unwrap_or_default();
                    self.file.tracks[t].segments[s]
                        .points
                        .extend(text.lines().filter_map(csv_point));
                }
                _ => {}
            },
            State::Point(p) => self.start_point_field(reader, e, &tag, empty, p)?,
        }
        Ok(())
    }

    fn start_point_field<R: BufRead>(
        &mut self,
        reader: &mut XmlSource<R>,
        e: &BytesStart<'_>,
        tag: &str,
        empty: bool,
        p: PointRef,
    ) -> Result<()> {
        match tag {
            "name" | "desc" | "cmt" | "category" | "type" => {
                let text = read_text(reader, &mut self.buf, e, empty)?;
                let Some(point) = self.point_mut(p) else {
                    return Ok(());
                };
                match tag {
                    "name" => point.name = text,
                    "desc" => point.desc = text,
                    "cmt" => point.comment = text,
                    "category" => point.category = text,
                    _ => {
                        if point.category.is_none() {
                            point.category = text;
                        }
                    }
                }
            }
            "link" => {
                let href = read_link(reader, &mut self.buf, e, empty)?;
                if let Some(point) = self.point_mut(p) {
                    point.link = href;
                }
            }
            "ele" | "hdop" | "speed" => {
                let text = read_text(reader, &mut self.buf, e, empty)?.filter(|t| !t.trim().is_empty());
                let (Some(text), Some(point)) = (text, self.point_mut(p)) else {
                    return Ok(());
                };
                if let Some(value) = parse_number(tag, &text) {
                    match tag {
                        "ele" => point.ele = value,
                        "hdop" => point.hdop = value,
                        _ => {
                            point.speed = value;
                            point.extensions.put("speed", text);
                        }
                    }
                }
            }
            "time" => {
                let text = read_text(reader, &mut self.buf, e, empty)?;
                if let Some(point) = self.point_mut(p) {
                    point.time = text.as_deref().map_or(NO_TIME, parse_time);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn start_extension<R: BufRead>(
        &mut self,
        reader: &mut XmlSource<R>,
        e: &BytesStart<'_>,
        tag: &str,
        empty: bool,
        top: State,
    ) -> Result<()> {
        if self.mode.route && tag == "segment" {
            let mut segment = RouteSegment::default();
            for (name, value) in attributes(e)? {
                segment.set_attribute(&name, value);
            }
            self.route_segments.push(segment);
        } else if self.mode.types && tag == "type" {
            let attrs = attributes(e)?;
            self.route_types.push(RouteType {
                tag: lookup(&attrs, "t"),
                value: lookup(&attrs, "v"),
            });
        } else if self.mode.points_groups && tag == "group" {
            self.groups.push(points_group_from_attributes(&attributes(e)?));
        }
        match tag {
            "routepointextension" => {
                self.mode.route_point = true;
                let offset = self.route_track.len();
                if let State::Point(p) = top
                    && let Some(point) = self.point_mut(p)
                {
                    point.extensions.put("offset", offset.to_string());
                }
            }
            "route" => self.mode.route = true,
            "types" => self.mode.types = true,
            "points_groups" => self.mode.points_groups = true,
            _ => {
                let values = if empty {
                    Vec::new()
                } else {
                    read_text_map(reader, &mut self.buf, e)?
                };
                if let Some(hook) = self.extensions_reader.as_deref_mut() {
                    let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if hook.read_extension(&mut self.file, &local, &attributes(e)?, &values) {
                        return Ok(());
                    }
                }
                self.store_extension_values(top, values);
            }
        }
        Ok(())
    }

    /// Flat extension pairs go to the open entity; `speed` and `heading` are
    /// mirrored into waypoint fields.
    fn store_extension_values(&mut self, top: State, values: Vec<(String, String)>) {
        if values.is_empty() {
            return;
        }
        let mut speed = None;
        let mut heading = None;
        if let Some(ext) = self.extensions_of(top) {
            for (key, value) in values {
                match key.as_str() {
                    "speed" => speed = Some(value.clone()),
                    "heading" => heading = Some(value.clone()),
                    _ => {}
                }
                ext.put(key, value);
            }
        }
        if let State::Point(p) = top
            && let Some(point) = self.point_mut(p)
        {
            if let Some(v) = speed.and_then(|v| parse_number("speed", &v)) {
                point.speed = v;
            }
            if let Some(v) = heading.and_then(|v| parse_number("heading", &v)) {
                point.heading = v;
            }
        }
    }

    fn end(&mut self, tag: &str) {
        match tag {
            "routepointextension" => {
                self.mode.route_point = false;
                return;
            }
            "extensions" => {
                self.mode.active = false;
                return;
            }
            _ => {}
        }
        if self.mode.active {
            match tag {
                "route" => self.mode.route = false,
                "types" => self.mode.types = false,
                "points_groups" => self.mode.points_groups = false,
                "rpt" => self.pop_if(|s| matches!(s, State::Point(PointRef::RouteTrack(_)))),
                _ => {}
            }
            return;
        }
        match tag {
            "metadata" => self.pop_if(|s| s == State::Metadata),
            "author" => self.pop_if(|s| s == State::Author),
            "copyright" => self.pop_if(|s| s == State::Copyright),
            "bounds" => self.pop_if(|s| s == State::Bounds),
            "wpt" | "trkpt" | "rtept" | "rpt" => self.pop_if(|s| matches!(s, State::Point(_))),
            "trk" => self.pop_if(|s| matches!(s, State::Track(_))),
            "rte" => self.pop_if(|s| matches!(s, State::Route(_))),
            "trkseg" => {
                if let State::Segment(t, s) = self.top() {
                    self.stack.pop();
                    let segment = &mut self.file.tracks[t].segments[s];
                    segment.route_segments = std::mem::take(&mut self.route_segments);
                    segment.route_types = std::mem::take(&mut self.route_types);
                }
            }
            _ => {}
        }
    }

    fn pop_if(&mut self, matches: impl Fn(State) -> bool) {
        if matches(self.top()) {
            self.stack.pop();
        }
    }

    fn push_point(&mut self, p: PointRef) -> Result<()> {
        if self.progress.is_interrupted() {
            return Err(GpxError::Cancelled);
        }
        self.progress.progress(1);
        self.stack.push(State::Point(p));
        Ok(())
    }

    fn point_mut(&mut self, p: PointRef) -> Option<&mut WptPt> {
        match p {
            PointRef::Free(i) => self.file.points.get_mut(i),
            PointRef::Route(r, i) => self.file.routes.get_mut(r)?.points.get_mut(i),
            PointRef::Track(t, s, i) => self
                .file
                .tracks
                .get_mut(t)?
                .segments
                .get_mut(s)?
                .points
                .get_mut(i),
            PointRef::RouteTrack(i) => self.route_track.get_mut(i),
        }
    }

    fn extensions_of(&mut self, state: State) -> Option<&mut Extensions> {
        match state {
            State::Document => Some(&mut self.file.extensions),
            State::Metadata => Some(&mut self.file.metadata.extensions),
            State::Author => self.file.metadata.author.as_mut().map(|a| &mut a.extensions),
            State::Copyright => self.file.metadata.copyright.as_mut().map(|c| &mut c.extensions),
            State::Bounds => self.file.metadata.bounds.as_mut().map(|b| &mut b.extensions),
            State::Track(t) => self.file.tracks.get_mut(t).map(|t| &mut t.extensions),
            State::Segment(t, s) => self
                .file
                .tracks
                .get_mut(t)?
                .segments
                .get_mut(s)
                .map(|s| &mut s.extensions),
            State::Route(r) => self.file.routes.get_mut(r).map(|r| &mut r.extensions),
            State::Point(p) => self.point_mut(p).map(|p| &mut p.extensions),
        }
    }
}

/// Lowercased local name.
fn tag_name(local: &[u8]) -> String {
    String::from_utf8_lossy(local).to_ascii_lowercase()
}

/// Attributes by local name, values unescaped.
fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut result = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.local_name().as_ref())?.to_string();
        let raw = std::str::from_utf8(&attr.value)?;
        let value = quick_xml::escape::unescape(raw)
            .map_err(|e| GpxError::MalformedXml(e.to_string()))?
            .into_owned();
        result.push((key, value));
    }
    Ok(result)
}

fn lookup(attrs: &[(String, String)], name: &str) -> Option<String> {
    attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    Ok(lookup(&attributes(e)?, name))
}

/// Logs and drops unparseable numbers.
fn parse_number(field: &str, text: &str) -> Option<f64> {
    match text.trim().parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            let err = GpxError::BadNumber {
                field: field.to_string(),
                value: text.to_string(),
            };
            tracing::debug!("{err}");
            None
        }
    }
}

/// Point with `lat`/`lon`; unparseable coordinates stay 0.
fn point_from_attributes(e: &BytesStart<'_>) -> Result<WptPt> {
    let mut point = WptPt::default();
    for (key, value) in attributes(e)? {
        match key.as_str() {
            "lat" => point.lat = parse_number("lat", &value).unwrap_or(point.lat),
            "lon" => point.lon = parse_number("lon", &value).unwrap_or(point.lon),
            _ => {}
        }
    }
    Ok(point)
}

fn bounds_from_attributes(e: &BytesStart<'_>) -> Result<Bounds> {
    let attrs = attributes(e)?;
    let value = |lower: &str, camel: &str| {
        lookup(&attrs, lower)
            .or_else(|| lookup(&attrs, camel))
            .and_then(|v| parse_number(lower, &v))
            .unwrap_or(0.0)
    };
    Ok(Bounds {
        minlat: value("minlat", "minLat"),
        minlon: value("minlon", "minLon"),
        maxlat: value("maxlat", "maxLat"),
        maxlon: value("maxlon", "maxLon"),
        extensions: Extensions::new(),
    })
}

fn points_group_from_attributes(attrs: &[(String, String)]) -> PointsGroup {
    PointsGroup {
        name: lookup(attrs, "name").unwrap_or_default(),
        icon_name: lookup(attrs, "icon"),
        background_type: lookup(attrs, "background"),
        color: lookup(attrs, "color").and_then(|c| parse_color(&c)),
        points: Vec::new(),
    }
}

/// `lon,lat[,ele]`
fn csv_point(line: &str) -> Option<WptPt> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut fields = line.split(',');
    let lon = parse_number("csvattributes", fields.next()?)?;
    let lat = parse_number("csvattributes", fields.next()?)?;
    let mut point = WptPt::new(lat, lon);
    if let Some(ele) = fields.next() {
        point.ele = parse_number("csvattributes", ele)?;
    }
    Some(point)
}

fn push_text(text: &mut Option<String>, chunk: &str) {
    text.get_or_insert_with(String::new).push_str(chunk);
}

/// Character references and the predefined XML entities; unknown entities are dropped.
fn push_reference(text: &mut Option<String>, r: &BytesRef<'_>) {
    if let Ok(Some(ch)) = r.resolve_char_ref() {
        text.get_or_insert_with(String::new).push(ch);
        return;
    }
    let resolved = match std::str::from_utf8(r.as_ref()).unwrap_or_default() {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        other => {
            tracing::debug!("Unknown entity &{other};");
            return;
        }
    };
    text.get_or_insert_with(String::new).push(resolved);
}

/// Text content up to the matching end tag; `None` when there was none.
fn read_text<R: BufRead>(
    reader: &mut XmlSource<R>,
    buf: &mut Vec<u8>,
    start: &BytesStart<'_>,
    empty: bool,
) -> Result<Option<String>> {
    if empty {
        return Ok(None);
    }
    let end_name = start.name().as_ref().to_vec();
    let mut text = None;
    loop {
        let done = match reader.next(buf)? {
            Event::Text(e) => {
                push_text(&mut text, std::str::from_utf8(e.as_ref())?);
                false
            }
            Event::CData(e) => {
                push_text(&mut text, std::str::from_utf8(e.as_ref())?);
                false
            }
            Event::GeneralRef(e) => {
                push_reference(&mut text, &e);
                false
            }
            Event::End(e) => e.name().as_ref().eq_ignore_ascii_case(&end_name),
            Event::Eof => true,
            _ => false,
        };
        buf.clear();
        if done {
            return Ok(text);
        }
    }
}

/// Flattens an extension subtree: each innermost element with non-blank text
/// yields a `(lowercased local name, text)` pair.
fn read_text_map<R: BufRead>(
    reader: &mut XmlSource<R>,
    buf: &mut Vec<u8>,
    start: &BytesStart<'_>,
) -> Result<Vec<(String, String)>> {
    let end_name = start.name().as_ref().to_vec();
    let mut text = None;
    let mut values: Vec<(String, String)> = Vec::new();
    loop {
        let done = match reader.next(buf)? {
            Event::Start(_) | Event::Empty(_) => {
                text = None;
                false
            }
            Event::Text(e) => {
                push_text(&mut text, std::str::from_utf8(e.as_ref())?);
                false
            }
            Event::CData(e) => {
                push_text(&mut text, std::str::from_utf8(e.as_ref())?);
                false
            }
            Event::GeneralRef(e) => {
                push_reference(&mut text, &e);
                false
            }
            Event::End(e) => {
                if let Some(value) = text.take().filter(|t: &String| !t.trim().is_empty()) {
                    let key = tag_name(e.local_name().as_ref());
                    match values.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, v)) => *v = value,
                        None => values.push((key, value)),
                    }
                }
                e.name().as_ref().eq_ignore_ascii_case(&end_name)
            }
            Event::Eof => true,
            _ => false,
        };
        buf.clear();
        if done {
            return Ok(values);
        }
    }
}

/// `href` of a link element; its children are skipped.
fn read_link<R: BufRead>(
    reader: &mut XmlSource<R>,
    buf: &mut Vec<u8>,
    start: &BytesStart<'_>,
    empty: bool,
) -> Result<Option<String>> {
    let href = attribute(start, "href")?;
    if !empty {
        skip_element(reader, buf, start)?;
    }
    Ok(href)
}

/// Consumes everything up to the end tag matching `start`, ignoring case.
fn skip_element<R: BufRead>(reader: &mut XmlSource<R>, buf: &mut Vec<u8>, start: &BytesStart<'_>) -> Result<()> {
    let name = start.name().as_ref().to_vec();
    let mut depth = 0usize;
    loop {
        let done = match reader.next(buf)? {
            Event::Start(e) if e.name().as_ref().eq_ignore_ascii_case(&name) => {
                depth += 1;
                false
            }
            Event::End(e) if e.name().as_ref().eq_ignore_ascii_case(&name) => {
                if depth == 0 {
                    true
                } else {
                    depth -= 1;
                    false
                }
            }
            Event::Eof => true,
            _ => false,
        };
        buf.clear();
        if done {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::HasExtensions;
    use crate::progress::ProgressCounter;

    #[test]
    fn test_minimal_waypoint() {
        let xml = r#"<?xml version="1.0"?>
<gpx version="1.1">
  <wpt lat="35.6762" lon="139.6503"/>
</gpx>"#;
        let file = parse_gpx_str(xml);
        assert!(file.error.is_none());
        assert_eq!(file.points().len(), 1);
        assert!((file.points()[0].lat - 35.6762).abs() < 1e-10);
        assert!((file.points()[0].lon - 139.6503).abs() < 1e-10);
        assert_eq!(file.points_groups().len(), 1);
        assert_eq!(file.points_groups()[0].name, "");
    }

    #[test]
    fn test_waypoint_with_children() {
        let xml = r#"<gpx version="1.1" creator="tester">
  <wpt lat="35.6762" lon="139.6503">
    <ele>40.5</ele>
    <time>2020-01-01T00:00:00Z</time>
    <name>Tokyo &amp; Tower</name>
    <desc><![CDATA[A <famous> landmark]]></desc>
    <cmt>Comment</cmt>
    <hdop>2.5</hdop>
    <speed>3.5</speed>
    <type>POI</type>
    <link href="https://example.com"><text>ignored</text><type>ignored</type></link>
  </wpt>
</gpx>"#;
        let file = parse_gpx_str(xml);
        assert_eq!(file.author.as_deref(), Some("tester"));
        let pt = &file.points()[0];
        assert_eq!(pt.ele, 40.5);
        assert_eq!(pt.time, 1_577_836_800_000);
        assert_eq!(pt.name.as_deref(), Some("Tokyo & Tower"));
        assert_eq!(pt.desc.as_deref(), Some("A <famous> landmark"));
        assert_eq!(pt.comment.as_deref(), Some("Comment"));
        assert_eq!(pt.hdop, 2.5);
        assert_eq!(pt.speed, 3.5);
        assert_eq!(pt.extensions.get("speed"), Some("3.5"));
        assert_eq!(pt.category.as_deref(), Some("POI"));
        assert_eq!(pt.link.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_legacy_category_wins_over_type() {
        let xml = r#"<gpx><wpt lat="1" lon="2"><category>Old</category><type>New</type></wpt></gpx>"#;
        let file = parse_gpx_str(xml);
        assert_eq!(file.points()[0].category.as_deref(), Some("Old"));
        assert!(file.points_group("Old").is_some());
    }

    #[test]
    fn test_bad_numbers_are_tolerated() {
        let xml = r#"<gpx><wpt lat="x" lon="2"><ele>high</ele><hdop></hdop></wpt></gpx>"#;
        let file = parse_gpx_str(xml);
        assert!(file.error.is_none());
        let pt = &file.points()[0];
        assert_eq!(pt.lat, 0.0);
        assert_eq!(pt.lon, 2.0);
        assert!(pt.ele.is_nan());
        assert!(pt.hdop.is_nan());
    }

    #[test]
    fn test_metadata() {
        let xml = r#"<gpx>
  <metadata>
    <name>Trip</name>
    <desc>Desc</desc>
    <author><name>Ann</name><email id="ann" domain="example.com"/><link href="https://ann.example.com"/></author>
    <copyright author="Ann"><year>2020</year><license>CC-BY</license></copyright>
    <link href="https://trip.example.com"/>
    <time>2020-01-01T00:00:00.500Z</time>
    <keywords>a,b</keywords>
    <bounds minLat="1.5" minlon="2.5" maxlat="3.5" maxLon="4.5"/>
    <extensions><article_title>Title</article_title></extensions>
  </metadata>
</gpx>"#;
        let file = parse_gpx_str(xml);
        let m = &file.metadata;
        assert_eq!(m.name.as_deref(), Some("Trip"));
        assert_eq!(m.desc.as_deref(), Some("Desc"));
        let author = m.author.as_ref().unwrap();
        assert_eq!(author.name.as_deref(), Some("Ann"));
        assert_eq!(author.email.as_deref(), Some("ann@example.com"));
        assert_eq!(author.link.as_deref(), Some("https://ann.example.com"));
        let copyright = m.copyright.as_ref().unwrap();
        assert_eq!(copyright.author.as_deref(), Some("Ann"));
        assert_eq!(copyright.year.as_deref(), Some("2020"));
        assert_eq!(copyright.license.as_deref(), Some("CC-BY"));
        assert_eq!(m.link.as_deref(), Some("https://trip.example.com"));
        assert_eq!(m.time, 1_577_836_800_500);
        assert_eq!(m.keywords.as_deref(), Some("a,b"));
        let b = m.bounds.as_ref().unwrap();
        assert_eq!((b.minlat, b.minlon, b.maxlat, b.maxlon), (1.5, 2.5, 3.5, 4.5));
        assert_eq!(m.article_title(), Some("Title"));
    }

    #[test]
    fn test_tracks_segments_and_routes() {
        let xml = r#"<gpx>
  <trk>
    <name>T</name>
    <trkseg><name>S1</name><trkpt lat="1" lon="1"/><trkpt lat="1" lon="2"/></trkseg>
    <trkseg><rpt lat="2" lon="1"/></trkseg>
  </trk>
  <trk><trkpt lat="5" lon="5"/></trk>
  <rte><name>R</name><desc>D</desc><rtept lat="3" lon="3"/></rte>
</gpx>"#;
        let file = parse_gpx_str(xml);
        assert_eq!(file.tracks().len(), 2);
        let t = &file.tracks()[0];
        assert_eq!(t.name.as_deref(), Some("T"));
        assert_eq!(t.segments.len(), 2);
        assert_eq!(t.segments[0].name.as_deref(), Some("S1"));
        assert_eq!(t.segments[0].points.len(), 2);
        assert_eq!(t.segments[1].points.len(), 1);
        assert_eq!(file.tracks()[1].segments[0].points[0].lat, 5.0);
        assert_eq!(file.routes[0].name.as_deref(), Some("R"));
        assert_eq!(file.routes[0].desc.as_deref(), Some("D"));
        assert_eq!(file.routes[0].points.len(), 1);
    }

    #[test]
    fn test_csv_attributes() {
        let xml = r#"<gpx><trk><trkseg><csvattributes>10.5,50.25,100
11,51
bad,line
</csvattributes></trkseg></trk></gpx>"#;
        let file = parse_gpx_str(xml);
        let points = &file.tracks()[0].segments[0].points;
        assert_eq!(points.len(), 2);
        assert_eq!((points[0].lat, points[0].lon, points[0].ele), (50.25, 10.5, 100.0));
        assert_eq!((points[1].lat, points[1].lon), (51.0, 11.0));
        assert!(points[1].ele.is_nan());
    }

    #[test]
    fn test_osmand_extensions_are_flattened() {
        let xml = r#"<gpx xmlns:osmand="https://osmand.net" xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1">
  <wpt lat="1" lon="2">
    <extensions>
      <osmand:color>#FF0000</osmand:color>
      <osmand:Icon>cafe</osmand:Icon>
      <osmand:heading>45</osmand:heading>
      <gpxtpx:TrackPointExtension><gpxtpx:hr>120</gpxtpx:hr><gpxtpx:cad>80</gpxtpx:cad></gpxtpx:TrackPointExtension>
      <osmand:speed>4.5</osmand:speed>
    </extensions>
  </wpt>
</gpx>"#;
        let file = parse_gpx_str(xml);
        let pt = &file.points()[0];
        let pairs: Vec<_> = pt.extensions.iter().collect();
        assert_eq!(
            pairs,
            vec![
                ("color", "#FF0000"),
                ("icon", "cafe"),
                ("heading", "45"),
                ("hr", "120"),
                ("cad", "80"),
                ("speed", "4.5"),
            ]
        );
        assert_eq!(pt.color(), Some(0xFFFF_0000));
        assert_eq!(pt.heading, 45.0);
        assert_eq!(pt.speed, 4.5);
        assert_eq!(file.points_groups()[0].icon_name.as_deref(), Some("cafe"));
    }

    #[test]
    fn test_document_extensions_and_points_groups() {
        let xml = r##"<gpx xmlns:osmand="https://osmand.net">
  <wpt lat="1" lon="1"><type>Food</type></wpt>
  <wpt lat="2" lon="2"><type>Sights</type></wpt>
  <extensions>
    <osmand:show_arrows>true</osmand:show_arrows>
    <osmand:points_groups>
      <group name="Sights" color="#00ff00" icon="museum" background="circle"/>
      <group name="Empty"/>
    </osmand:points_groups>
  </extensions>
</gpx>"##;
        let file = parse_gpx_str(xml);
        assert!(file.is_show_arrows());
        let names: Vec<_> = file.points_groups().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Sights", "Empty", "Food"]);
        let sights = file.points_group("Sights").unwrap();
        assert_eq!(sights.color, Some(0xFF00_FF00));
        assert_eq!(sights.icon_name.as_deref(), Some("museum"));
        assert_eq!(sights.background_type.as_deref(), Some("circle"));
        assert_eq!(sights.points, vec![1]);
        assert!(file.points_group("Empty").unwrap().points.is_empty());
        assert_eq!(file.extensions.len(), 1);
    }

    #[test]
    fn test_route_decoration_per_segment() {
        let xml = r#"<gpx xmlns:osmand="https://osmand.net"><trk>
  <trkseg>
    <trkpt lat="1" lon="1"/>
    <extensions>
      <osmand:route><osmand:segment id="7" length="3" segmentTime="12.5" turnType="TL"/></osmand:route>
      <osmand:types><osmand:type t="highway" v="residential"/></osmand:types>
    </extensions>
  </trkseg>
  <trkseg><trkpt lat="2" lon="2"/></trkseg>
</trk></gpx>"#;
        let file = parse_gpx_str(xml);
        let segments = &file.tracks()[0].segments;
        assert!(segments[0].has_route());
        let rs = &segments[0].route_segments[0];
        assert_eq!(rs.id.as_deref(), Some("7"));
        assert_eq!(rs.segment_time.as_deref(), Some("12.5"));
        assert_eq!(rs.turn_type.as_deref(), Some("TL"));
        assert_eq!(segments[0].route_types[0].value.as_deref(), Some("residential"));
        assert!(!segments[1].has_route());
        assert!(segments[0].extensions.is_empty());
    }

    #[test]
    fn test_trailing_route_decoration_goes_to_first_segment() {
        let xml = r#"<gpx xmlns:osmand="https://osmand.net">
  <trk><trkseg><trkpt lat="1" lon="1"/></trkseg><trkseg><trkpt lat="2" lon="2"/></trkseg></trk>
  <extensions>
    <osmand:route><osmand:segment id="1"/></osmand:route>
    <osmand:types><osmand:type t="highway" v="primary"/></osmand:types>
  </extensions>
</gpx>"#;
        let file = parse_gpx_str(xml);
        assert!(file.tracks()[0].segments[0].has_route());
        assert!(!file.tracks()[0].segments[1].has_route());
        assert!(file.pending_route().0.is_empty());
    }

    #[test]
    fn test_route_point_extension() {
        let xml = r#"<gpx xmlns:gpxx="http://www.garmin.com/xmlschemas/GpxExtensions/v3">
  <rte>
    <rtept lat="1" lon="1">
      <extensions><gpxx:RoutePointExtension><gpxx:rpt lat="1.1" lon="1.1"/><gpxx:rpt lat="1.2" lon="1.2"/></gpxx:RoutePointExtension></extensions>
    </rtept>
    <rtept lat="2" lon="2">
      <extensions><gpxx:RoutePointExtension><gpxx:rpt lat="2.1" lon="2.1"/></gpxx:RoutePointExtension></extensions>
    </rtept>
  </rte>
</gpx>"#;
        let file = parse_gpx_str(xml);
        let route = &file.routes[0].points;
        assert_eq!(route.len(), 2);
        assert_eq!(route[0].extensions.get("offset"), Some("0"));
        assert_eq!(route[1].extensions.get("offset"), Some("2"));
        assert_eq!(file.tracks().len(), 1);
        let lats: Vec<_> = file.tracks()[0].segments[0].points.iter().map(|p| p.lat).collect();
        assert_eq!(lats, vec![1.1, 1.2, 2.1]);
    }

    #[test]
    fn test_bom_is_skipped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(br#"<gpx creator="bom"><wpt lat="1" lon="1"/></gpx>"#);
        let file = parse_gpx(bytes.as_slice());
        assert!(file.error.is_none());
        assert_eq!(file.author.as_deref(), Some("bom"));
    }

    #[test]
    fn test_malformed_xml_keeps_partial_document() {
        let xml = r#"<gpx><wpt lat="1" lon="1"></wpt><trk><trkseg><trkpt lat="1" lon="1"></trkseg></trk></gpx>"#;
        let file = parse_gpx_str(xml);
        assert!(matches!(file.error, Some(GpxError::MalformedXml(_))));
        assert_eq!(file.points().len(), 1);
        assert_eq!(file.points_groups().len(), 1);
    }

    #[test]
    fn test_cancellation() {
        let xml = r#"<gpx><wpt lat="1" lon="1"/><wpt lat="2" lon="2"/></gpx>"#;
        let mut progress = ProgressCounter {
            cancel: true,
            ..ProgressCounter::default()
        };
        let file = parse_gpx_with(xml.as_bytes(), None, &mut progress);
        assert_eq!(file.error, Some(GpxError::Cancelled));
    }

    struct HeartRate(Vec<String>);

    impl ExtensionsReader for HeartRate {
        fn read_extension(
            &mut self,
            _file: &mut GpxFile,
            tag: &str,
            _attributes: &[(String, String)],
            values: &[(String, String)],
        ) -> bool {
            if tag != "TrackPointExtension" {
                return false;
            }
            self.0.extend(values.iter().map(|(_, v)| v.clone()));
            true
        }
    }

    #[test]
    fn test_extensions_reader_hook() {
        let xml = r#"<gpx><trk><trkseg><trkpt lat="1" lon="1"><extensions>
  <gpxtpx:TrackPointExtension xmlns:gpxtpx="urn:x"><gpxtpx:hr>99</gpxtpx:hr></gpxtpx:TrackPointExtension>
  <note>kept</note>
</extensions></trkpt></trkseg></trk></gpx>"#;
        let mut hook = HeartRate(Vec::new());
        let file = parse_gpx_with(xml.as_bytes(), Some(&mut hook), &mut NoProgress);
        assert_eq!(hook.0, vec!["99"]);
        let ext = &file.tracks()[0].segments[0].points[0].extensions;
        assert_eq!(ext.get("hr"), None);
        assert_eq!(ext.get("note"), Some("kept"));
    }

    #[test]
    fn test_antimeridian_post_pass() {
        let xml = r#"<gpx><trk><trkseg><trkpt lat="0" lon="179"/><trkpt lat="0" lon="-179"/></trkseg></trk></gpx>"#;
        let file = parse_gpx_str(xml);
        let lons: Vec<_> = file.tracks()[0].segments[0].points.iter().map(|p| p.lon).collect();
        assert_eq!(lons, vec![179.0, PRIME_MERIDIAN, -PRIME_MERIDIAN, -179.0]);
        assert_eq!(file.modified_time, 0);
    }

    #[test]
    fn test_uppercase_tags() {
        let xml = r#"<GPX><WPT lat="1" lon="2"><NAME>Up</NAME></WPT></GPX>"#;
        let file = parse_gpx_str(xml);
        assert_eq!(file.points()[0].name.as_deref(), Some("Up"));
    }

    #[test]
    fn test_end_tags_ignore_case() {
        let xml = r#"<GPX><Metadata><Link href="https://a.b"><Text>x</text></link><Name>M</name></metadata>
            <WPT lat="1" lon="2"><NAME>Up</name></wpt></gpx>"#;
        let file = parse_gpx_str(xml);
        assert!(file.error.is_none(), "{:?}", file.error);
        assert_eq!(file.metadata.name.as_deref(), Some("M"));
        assert_eq!(file.points()[0].name.as_deref(), Some("Up"));
    }

    #[test]
    fn test_mismatched_and_unclosed_tags_are_malformed() {
        let file = parse_gpx_str("<gpx><wpt lat=\"1\" lon=\"1\"></trk></gpx>");
        assert!(matches!(file.error, Some(GpxError::MalformedXml(_))));
        let file = parse_gpx_str("<gpx><wpt lat=\"1\" lon=\"1\"/>");
        assert!(matches!(file.error, Some(GpxError::MalformedXml(_))));
        assert_eq!(file.points().len(), 1);
    }
}
