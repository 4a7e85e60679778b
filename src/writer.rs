//! GPX 1.1 serializer.
//!
//! Output is deterministic: children are written in model order and the
//! document is never mutated. Speed and heading are injected into a copy of a
//! waypoint's extensions, and synthetic antimeridian points are skipped.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::document::GpxFile;
use crate::error::{GpxError, Result};
use crate::extensions::{
    AMENITY_PREFIX, EXTENSIONS_WITH_OSMAND_PREFIX, Extensions, GAP_PROFILE_TYPE, OSM_PREFIX,
    OSMAND_EXTENSIONS_PREFIX, PROFILE_TYPE_EXTENSION, TRKPT_INDEX_EXTENSION, color_to_string,
};
use crate::geodesy::round_half_up;
use crate::gpx_time::format_time;
use crate::gpx_types::*;
use crate::progress::{NoProgress, Progress};

/// Sink handed to [`crate::extensions::ExtensionsWriter`] hooks.
pub type XmlWriter<'a> = Writer<&'a mut dyn Write>;

const GPX_NAMESPACE: &str = "http://www.topografix.com/GPX/1/1";
const OSMAND_NAMESPACE: &str = "https://osmand.net";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str =
    "http://www.topografix.com/GPX/1/1 http://www.topografix.com/GPX/1/1/gpx.xsd";

/// Serialize `file` as GPX 1.1 into `output`.
pub fn write_gpx<W: Write>(output: W, file: &GpxFile, progress: &mut dyn Progress) -> Result<()> {
    write_named(output, file, file_stem(&file.path), progress)
}

/// `fallback_name` is written as the metadata name when the document has none.
fn write_named<W: Write>(
    output: W,
    file: &GpxFile,
    fallback_name: Option<&str>,
    progress: &mut dyn Progress,
) -> Result<()> {
    let mut output = output;
    let mut writer: XmlWriter<'_> = Writer::new_with_indent(&mut output as &mut dyn Write, b' ', 2);
    progress.start_work(items_to_write(file));
    let result = write_document(&mut writer, file, fallback_name, progress).and_then(|()| {
        output.flush()?;
        Ok(())
    });
    if let Err(e) = &result {
        tracing::error!("Error saving gpx: {e}");
    }
    result
}

/// Serialize `file` into a UTF-8 string.
pub fn write_to_string(file: &GpxFile) -> Result<String> {
    let mut buffer = Vec::new();
    write_gpx(&mut buffer, file, &mut NoProgress)?;
    String::from_utf8(buffer).map_err(|e| GpxError::Io(e.to_string()))
}

/// Serialize `file` into a newly created file at `path`, creating parent
/// directories as needed. A document without a path or name is named after
/// `path`.
pub fn write_to_file(path: impl AsRef<Path>, file: &GpxFile) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let out = BufWriter::new(File::create(path)?);
    let fallback_name = if file.path.is_empty() {
        path.file_stem().and_then(|s| s.to_str())
    } else {
        file_stem(&file.path)
    };
    write_named(out, file, fallback_name, &mut NoProgress)
}

/// Units of work reported while writing: metadata, every written waypoint and
/// the document extensions.
fn items_to_write(file: &GpxFile) -> usize {
    let written = |points: &[WptPt]| points.iter().filter(|p| !p.is_artificial()).count();
    let track_points: usize = file
        .tracks()
        .iter()
        .filter(|t| !t.general_track)
        .flat_map(|t| t.segments.iter())
        .map(|s| written(&s.points))
        .sum();
    let route_points: usize = file.routes.iter().map(|r| written(&r.points)).sum();
    let extensions = usize::from(has_extensions_block(&file.extensions) || !file.points_groups().is_empty());
    1 + written(file.points()) + route_points + track_points + extensions
}

fn write_document(
    w: &mut XmlWriter<'_>,
    file: &GpxFile,
    fallback_name: Option<&str>,
    progress: &mut dyn Progress,
) -> Result<()> {
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

    let mut gpx = BytesStart::new("gpx");
    gpx.push_attribute(("version", "1.1"));
    if let Some(author) = &file.author {
        gpx.push_attribute(("creator", author.as_str()));
    }
    gpx.push_attribute(("xmlns", GPX_NAMESPACE));
    gpx.push_attribute(("xmlns:osmand", OSMAND_NAMESPACE));
    gpx.push_attribute(("xmlns:xsi", XSI_NAMESPACE));
    gpx.push_attribute(("xsi:schemaLocation", SCHEMA_LOCATION));
    w.write_event(Event::Start(gpx))?;

    write_metadata(w, file, fallback_name, progress)?;
    for p in file.points().iter().filter(|p| !p.is_artificial()) {
        write_wpt(w, "wpt", p, progress)?;
    }
    for route in &file.routes {
        write_route(w, route, progress)?;
    }
    for track in file.tracks().iter().filter(|t| !t.general_track) {
        write_track(w, track, progress)?;
    }
    let groups = file.points_groups();
    if has_extensions_block(&file.extensions) || !groups.is_empty() {
        write_extensions(w, file.extensions.iter(), file.extensions.writer(), |w| {
            write_points_groups(w, groups)
        })?;
        progress.progress(1);
    }

    w.write_event(Event::End(BytesEnd::new("gpx")))?;
    Ok(())
}

fn write_metadata(
    w: &mut XmlWriter<'_>,
    file: &GpxFile,
    fallback_name: Option<&str>,
    progress: &mut dyn Progress,
) -> Result<()> {
    let metadata = &file.metadata;
    start(w, "metadata")?;
    let name = metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .or(fallback_name);
    write_opt_text(w, "name", name)?;
    write_opt_text(w, "desc", metadata.desc.as_deref())?;
    if let Some(author) = &metadata.author {
        start(w, "author")?;
        write_author(w, author)?;
        end(w, "author")?;
    }
    if let Some(copyright) = &metadata.copyright {
        let mut tag = BytesStart::new("copyright");
        if let Some(author) = &copyright.author {
            tag.push_attribute(("author", author.as_str()));
        }
        w.write_event(Event::Start(tag))?;
        write_opt_text(w, "year", copyright.year.as_deref())?;
        write_opt_text(w, "license", copyright.license.as_deref())?;
        end(w, "copyright")?;
    }
    write_link(w, metadata.link.as_deref())?;
    if metadata.time != NO_TIME {
        write_text(w, "time", &format_time(metadata.time))?;
    }
    write_opt_text(w, "keywords", metadata.keywords.as_deref())?;
    if let Some(bounds) = &metadata.bounds {
        let mut tag = BytesStart::new("bounds");
        tag.push_attribute(("minlat", format_lat_lon(bounds.minlat).as_str()));
        tag.push_attribute(("minlon", format_lat_lon(bounds.minlon).as_str()));
        tag.push_attribute(("maxlat", format_lat_lon(bounds.maxlat).as_str()));
        tag.push_attribute(("maxlon", format_lat_lon(bounds.maxlon).as_str()));
        w.write_event(Event::Empty(tag))?;
    }
    write_plain_extensions(w, &metadata.extensions)?;
    progress.progress(1);
    end(w, "metadata")
}

fn write_author(w: &mut XmlWriter<'_>, author: &Author) -> Result<()> {
    write_opt_text(w, "name", author.name.as_deref())?;
    if let Some((id, domain)) = author.email.as_deref().and_then(|e| e.split_once('@'))
        && !id.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
    {
        let mut tag = BytesStart::new("email");
        tag.push_attribute(("id", id));
        tag.push_attribute(("domain", domain));
        w.write_event(Event::Empty(tag))?;
    }
    write_link(w, author.link.as_deref())
}

fn write_route(w: &mut XmlWriter<'_>, route: &Route, progress: &mut dyn Progress) -> Result<()> {
    start(w, "rte")?;
    write_opt_text(w, "name", route.name.as_deref())?;
    write_opt_text(w, "desc", route.desc.as_deref())?;
    for p in route.points.iter().filter(|p| !p.is_artificial()) {
        write_wpt(w, "rtept", p, progress)?;
    }
    write_plain_extensions(w, &route.extensions)?;
    end(w, "rte")
}

fn write_track(w: &mut XmlWriter<'_>, track: &Track, progress: &mut dyn Progress) -> Result<()> {
    start(w, "trk")?;
    write_opt_text(w, "name", track.name.as_deref())?;
    write_opt_text(w, "desc", track.desc.as_deref())?;
    for segment in &track.segments {
        start(w, "trkseg")?;
        write_opt_text(w, "name", segment.name.as_deref())?;
        for p in segment.points.iter().filter(|p| !p.is_artificial()) {
            write_wpt(w, "trkpt", p, progress)?;
        }
        if has_extensions_block(&segment.extensions) || segment.has_route() {
            write_extensions(w, segment.extensions.iter(), segment.extensions.writer(), |w| {
                if segment.has_route() {
                    write_route_decoration(w, segment)?;
                }
                Ok(())
            })?;
        }
        end(w, "trkseg")?;
    }
    write_plain_extensions(w, &track.extensions)?;
    end(w, "trk")
}

fn write_wpt(w: &mut XmlWriter<'_>, tag: &str, p: &WptPt, progress: &mut dyn Progress) -> Result<()> {
    let mut start_tag = BytesStart::new(tag);
    start_tag.push_attribute(("lat", format_lat_lon(p.lat).as_str()));
    start_tag.push_attribute(("lon", format_lat_lon(p.lon).as_str()));
    w.write_event(Event::Start(start_tag))?;

    if !p.ele.is_nan() {
        write_text(w, "ele", &format_decimal(p.ele))?;
    }
    if p.time != NO_TIME {
        write_text(w, "time", &format_time(p.time))?;
    }
    write_opt_text(w, "name", p.name.as_deref())?;
    write_opt_text(w, "desc", p.desc.as_deref())?;
    write_link(w, p.link.as_deref())?;
    write_opt_text(w, "type", p.category.as_deref())?;
    write_opt_text(w, "cmt", p.comment.as_deref())?;
    if !p.hdop.is_nan() {
        write_text(w, "hdop", &format_decimal(p.hdop))?;
    }

    let mut ext = p.extensions.clone();
    if p.speed > 0.0 {
        ext.put("speed", format_decimal(p.speed));
    }
    if !p.heading.is_nan() {
        ext.put("heading", (round_half_up(p.heading) as i64).to_string());
    }
    if tag == "rtept" {
        if ext.get(PROFILE_TYPE_EXTENSION) == Some(GAP_PROFILE_TYPE) {
            ext.remove(PROFILE_TYPE_EXTENSION);
        }
    } else {
        ext.remove(PROFILE_TYPE_EXTENSION);
        ext.remove(TRKPT_INDEX_EXTENSION);
    }
    write_plain_extensions(w, &ext)?;

    progress.progress(1);
    end(w, tag)
}

fn has_extensions_block(ext: &Extensions) -> bool {
    !ext.is_empty() || ext.writer().is_some()
}

fn write_plain_extensions(w: &mut XmlWriter<'_>, ext: &Extensions) -> Result<()> {
    if has_extensions_block(ext) {
        write_extensions(w, ext.iter(), ext.writer(), |_| Ok(()))?;
    }
    Ok(())
}

/// Writes an `<extensions>` block: flat pairs, then the built-in structured
/// content, then the entity's custom hook.
fn write_extensions<'e, F>(
    w: &mut XmlWriter<'_>,
    entries: impl Iterator<Item = (&'e str, &'e str)>,
    hook: Option<&crate::extensions::ExtensionsWriter>,
    structured: F,
) -> Result<()>
where
    F: FnOnce(&mut XmlWriter<'_>) -> Result<()>,
{
    start(w, "extensions")?;
    for (key, value) in entries {
        write_text(w, &extension_tag(key), value)?;
    }
    structured(w)?;
    if let Some(hook) = hook {
        hook.write(w)?;
    }
    end(w, "extensions")
}

/// Tag name an extension key is written under.
pub fn extension_tag(key: &str) -> String {
    let key = key.replace(':', "_-_");
    let prefixed = !key.starts_with(OSMAND_EXTENSIONS_PREFIX)
        && (EXTENSIONS_WITH_OSMAND_PREFIX.contains(&key.as_str())
            || key.starts_with(AMENITY_PREFIX)
            || key.starts_with(OSM_PREFIX));
    if prefixed {
        format!("{OSMAND_EXTENSIONS_PREFIX}{key}")
    } else {
        key
    }
}

fn write_points_groups(w: &mut XmlWriter<'_>, groups: &[PointsGroup]) -> Result<()> {
    if groups.is_empty() {
        return Ok(());
    }
    start(w, "osmand:points_groups")?;
    for group in groups {
        let mut tag = BytesStart::new("osmand:group");
        tag.push_attribute(("name", group.name.as_str()));
        if let Some(color) = group.color {
            tag.push_attribute(("color", color_to_string(color).as_str()));
        }
        if let Some(icon) = &group.icon_name {
            tag.push_attribute(("icon", icon.as_str()));
        }
        if let Some(background) = &group.background_type {
            tag.push_attribute(("background", background.as_str()));
        }
        w.write_event(Event::Empty(tag))?;
    }
    end(w, "osmand:points_groups")
}

fn write_route_decoration(w: &mut XmlWriter<'_>, segment: &TrkSegment) -> Result<()> {
    start(w, "osmand:route")?;
    for rs in &segment.route_segments {
        let mut tag = BytesStart::new("osmand:segment");
        for (name, value) in rs.attributes() {
            if let Some(value) = value {
                tag.push_attribute((name, value));
            }
        }
        w.write_event(Event::Empty(tag))?;
    }
    end(w, "osmand:route")?;
    start(w, "osmand:types")?;
    for rt in &segment.route_types {
        let mut tag = BytesStart::new("osmand:type");
        if let Some(t) = &rt.tag {
            tag.push_attribute(("t", t.as_str()));
        }
        if let Some(v) = &rt.value {
            tag.push_attribute(("v", v.as_str()));
        }
        w.write_event(Event::Empty(tag))?;
    }
    end(w, "osmand:types")
}

fn start(w: &mut XmlWriter<'_>, name: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    Ok(())
}

fn end(w: &mut XmlWriter<'_>, name: &str) -> Result<()> {
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_text(w: &mut XmlWriter<'_>, name: &str, value: &str) -> Result<()> {
    start(w, name)?;
    w.write_event(Event::Text(BytesText::new(value)))?;
    end(w, name)
}

fn write_opt_text(w: &mut XmlWriter<'_>, name: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(v) => write_text(w, name, v),
        None => Ok(()),
    }
}

fn write_link(w: &mut XmlWriter<'_>, href: Option<&str>) -> Result<()> {
    if let Some(href) = href {
        let mut tag = BytesStart::new("link");
        tag.push_attribute(("href", href));
        w.write_event(Event::Empty(tag))?;
    }
    Ok(())
}

fn file_stem(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    let name = match path.rfind('/') {
        Some(i) if i > 0 => &path[i + 1..],
        _ => path,
    };
    let stem = match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    };
    Some(stem)
}

/// Two to seven fractional digits.
pub(crate) fn format_lat_lon(value: f64) -> String {
    let s = format!("{value:.7}");
    let Some((int, frac)) = s.split_once('.') else {
        return s;
    };
    let trimmed = frac.trim_end_matches('0');
    let frac = if trimmed.len() < 2 { &frac[..2] } else { trimmed };
    format!("{int}.{frac}")
}

/// At most one fractional digit, none when it would be zero.
pub(crate) fn format_decimal(value: f64) -> String {
    let s = format!("{value:.1}");
    match s.strip_suffix(".0") {
        Some(int) => int.to_string(),
        None => s,
    }
}
