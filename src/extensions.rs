//! Insertion-ordered extension store shared by every GPX entity.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::writer::XmlWriter;

pub const ICON_NAME_EXTENSION: &str = "icon";
pub const BACKGROUND_TYPE_EXTENSION: &str = "background";
pub const COLOR_NAME_EXTENSION: &str = "color";
pub const PROFILE_TYPE_EXTENSION: &str = "profile";
pub const ADDRESS_EXTENSION: &str = "address";
pub const AMENITY_ORIGIN_EXTENSION: &str = "amenity_origin";
pub const TRKPT_INDEX_EXTENSION: &str = "trkpt_idx";
pub const GAP_PROFILE_TYPE: &str = "gap";

pub const OSMAND_EXTENSIONS_PREFIX: &str = "osmand:";
pub const OSM_PREFIX: &str = "osm_tag_";
pub const AMENITY_PREFIX: &str = "amenity_";

/// Keys that are written with the `osmand:` prefix.
pub const EXTENSIONS_WITH_OSMAND_PREFIX: [&str; 6] = [
    COLOR_NAME_EXTENSION,
    ICON_NAME_EXTENSION,
    BACKGROUND_TYPE_EXTENSION,
    PROFILE_TYPE_EXTENSION,
    ADDRESS_EXTENSION,
    AMENITY_ORIGIN_EXTENSION,
];

const COLOR_KEYS: [&str; 4] = ["color", "colour", "displaycolor", "displaycolour"];

/// Hook that injects a structured sub-document into an `<extensions>` block.
///
/// Called by the writer after the flat key/value pairs have been emitted.
#[derive(Clone)]
pub struct ExtensionsWriter(Arc<dyn Fn(&mut XmlWriter<'_>) -> Result<()> + Send + Sync>);

impl ExtensionsWriter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut XmlWriter<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn write(&self, writer: &mut XmlWriter<'_>) -> Result<()> {
        (self.0)(writer)
    }
}

impl fmt::Debug for ExtensionsWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExtensionsWriter(..)")
    }
}

impl PartialEq for ExtensionsWriter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Insertion-ordered key/value map. Re-putting a key keeps its original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extensions {
    entries: Vec<(String, String)>,
    writer: Option<ExtensionsWriter>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Inserts or replaces `key`, returning the previous value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => Some(std::mem::replace(v, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Copies every pair of `other` into this store.
    pub fn copy_from(&mut self, other: &Extensions) {
        for (k, v) in &other.entries {
            self.put(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn writer(&self) -> Option<&ExtensionsWriter> {
        self.writer.as_ref()
    }

    pub fn set_writer(&mut self, writer: Option<ExtensionsWriter>) {
        self.writer = writer;
    }

    /// First color value found under `color`, `colour`, `displaycolor`, `displaycolour`.
    pub fn color_value(&self) -> Option<&str> {
        COLOR_KEYS.iter().find_map(|key| self.get(key))
    }
}

/// Capability shared by every entity that carries an extension store.
pub trait HasExtensions {
    fn extensions(&self) -> &Extensions;
    fn extensions_mut(&mut self) -> &mut Extensions;

    /// Parsed color, or `None` when absent or unparseable.
    fn color(&self) -> Option<u32> {
        self.extensions().color_value().and_then(parse_color)
    }

    fn color_or(&self, default: u32) -> u32 {
        self.color().unwrap_or(default)
    }

    fn set_color(&mut self, color: u32) {
        self.extensions_mut()
            .put(COLOR_NAME_EXTENSION, color_to_string(color));
    }

    fn remove_color(&mut self) {
        self.extensions_mut().remove(COLOR_NAME_EXTENSION);
    }

    fn copy_extensions(&mut self, other: &dyn HasExtensions) {
        let source = other.extensions().clone();
        self.extensions_mut().copy_from(&source);
    }
}

#[macro_export]
#[doc(hidden)]
macro_rules! impl_has_extensions {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::extensions::HasExtensions for $ty {
                fn extensions(&self) -> &$crate::extensions::Extensions {
                    &self.extensions
                }
                fn extensions_mut(&mut self) -> &mut $crate::extensions::Extensions {
                    &mut self.extensions
                }
            }
        )+
    };
}

const NAMED_COLORS: [(&str, u32); 24] = [
    ("black", 0xFF00_0000),
    ("darkgray", 0xFF44_4444),
    ("gray", 0xFF88_8888),
    ("lightgray", 0xFFCC_CCCC),
    ("white", 0xFFFF_FFFF),
    ("red", 0xFFFF_0000),
    ("green", 0xFF00_FF00),
    ("darkgreen", 0xFF00_6400),
    ("blue", 0xFF00_00FF),
    ("yellow", 0xFFFF_FF00),
    ("cyan", 0xFF00_FFFF),
    ("magenta", 0xFFFF_00FF),
    ("aqua", 0xFF00_FFFF),
    ("fuchsia", 0xFFFF_00FF),
    ("darkgrey", 0xFF44_4444),
    ("grey", 0xFF88_8888),
    ("lightgrey", 0xFFCC_CCCC),
    ("lime", 0xFF00_FF00),
    ("maroon", 0xFF80_0000),
    ("navy", 0xFF00_0080),
    ("olive", 0xFF80_8000),
    ("purple", 0xFF80_0080),
    ("silver", 0xFFC0_C0C0),
    ("teal", 0xFF00_8080),
];

/// Parses `#RRGGBB`, `#AARRGGBB` or a GPX color name into ARGB.
pub fn parse_color(value: &str) -> Option<u32> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        let parsed = match hex.len() {
            6 => u32::from_str_radix(hex, 16).ok().map(|rgb| 0xFF00_0000 | rgb),
            8 => u32::from_str_radix(hex, 16).ok(),
            _ => None,
        };
        if parsed.is_none() {
            tracing::debug!("Unparseable color '{value}'");
        }
        return parsed;
    }
    NAMED_COLORS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|(_, c)| *c)
}

/// Formats ARGB as `#RRGGBB` when opaque, `#AARRGGBB` otherwise.
pub fn color_to_string(color: u32) -> String {
    if color >> 24 == 0xFF {
        format!("#{:06x}", color & 0x00FF_FFFF)
    } else {
        format!("#{color:08x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_keeps_insertion_order() {
        let mut ext = Extensions::new();
        ext.put("b", "1");
        ext.put("a", "2");
        ext.put("c", "3");
        ext.put("a", "4");
        let pairs: Vec<_> = ext.iter().collect();
        assert_eq!(pairs, vec![("b", "1"), ("a", "4"), ("c", "3")]);
    }

    #[test]
    fn test_remove_and_default() {
        let mut ext = Extensions::new();
        ext.put("icon", "special_star");
        assert_eq!(ext.remove("icon").as_deref(), Some("special_star"));
        assert_eq!(ext.get_or("icon", "none"), "none");
        assert!(ext.is_empty());
    }

    #[test]
    fn test_copy_from_overwrites_existing() {
        let mut a = Extensions::new();
        a.put("x", "1");
        let mut b = Extensions::new();
        b.put("y", "2");
        b.put("x", "3");
        a.copy_from(&b);
        let pairs: Vec<_> = a.iter().collect();
        assert_eq!(pairs, vec![("x", "3"), ("y", "2")]);
    }

    #[test]
    fn test_color_lookup_order() {
        let mut ext = Extensions::new();
        ext.put("displaycolor", "Blue");
        ext.put("colour", "#00ff00");
        assert_eq!(ext.color_value(), Some("#00ff00"));
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#FF0000"), Some(0xFFFF_0000));
        assert_eq!(parse_color("#80112233"), Some(0x8011_2233));
        assert_eq!(parse_color("Navy"), Some(0xFF00_0080));
        assert_eq!(parse_color("#12"), None);
        assert_eq!(parse_color("chartreuse"), None);
    }

    #[test]
    fn test_color_to_string() {
        assert_eq!(color_to_string(0xFFFF_0000), "#ff0000");
        assert_eq!(color_to_string(0x8011_2233), "#80112233");
    }
}
