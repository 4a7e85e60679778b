//! GPX 1.1 reading and writing with OsmAnd extensions, plus track statistics.
//!
//! ```no_run
//! let file = osmand_gpx::parse_gpx_str("<gpx version=\"1.1\"></gpx>");
//! let analysis = file.analysis(0);
//! let xml = osmand_gpx::write_to_string(&file).unwrap_or_default();
//! # let _ = (analysis, xml);
//! ```

pub mod analysis;
pub mod antimeridian;
pub mod document;
pub mod elevation;
pub mod error;
pub mod extensions;
pub mod geodesy;
pub mod gpx_time;
pub mod gpx_types;
pub mod groups;
pub mod options;
pub mod parser;
pub mod progress;
pub mod split;
pub mod wasm;
pub mod writer;

pub use analysis::{AnalysisReport, Elevation, GpxTrackAnalysis, Speed};
pub use document::{GpxFile, PointUpdate, QuadRect};
pub use error::{GpxError, Result};
pub use extensions::{Extensions, ExtensionsWriter, HasExtensions};
pub use gpx_types::*;
pub use options::{AnalysisOptions, NormalizeOptions, SplitOptions, SplitType};
pub use parser::{ExtensionsReader, parse_gpx, parse_gpx_file, parse_gpx_str, parse_gpx_with};
pub use progress::{NoProgress, Progress, ProgressCounter};
pub use writer::{write_gpx, write_to_file, write_to_string};
