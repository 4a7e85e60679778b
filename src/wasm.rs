//! WebAssembly entry points.

use serde::de::DeserializeOwned;
use wasm_bindgen::prelude::*;

use crate::analysis::AnalysisReport;
use crate::document::GpxFile;
use crate::options::{AnalysisOptions, NormalizeOptions};
use crate::parser::{parse_gpx_str, parse_gpx_with};
use crate::progress::{NoProgress, Progress};
use crate::writer::write_to_string;

const UNSIZED_STEP: usize = 1000;

/// Analyze a GPX string, returned as a JS object.
///
/// `progress` is called as `progress(done, total)`; returning `false` cancels.
#[wasm_bindgen(js_name = gpxAnalyze)]
pub fn gpx_analyze(gpx_string: &str, options: JsValue, progress: Option<js_sys::Function>) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let report = analyze(gpx_string, options, progress)?;
    serde_wasm_bindgen::to_value(&report).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Analyze a GPX string, returned as a JSON string.
#[wasm_bindgen(js_name = gpxAnalyzeString)]
pub fn gpx_analyze_string(
    gpx_string: &str,
    options: JsValue,
    progress: Option<js_sys::Function>,
) -> Result<String, JsValue> {
    console_error_panic_hook::set_once();

    let report = analyze(gpx_string, options, progress)?;
    serde_json::to_string(&report).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Parse a GPX string and write it back as canonical GPX 1.1.
#[wasm_bindgen(js_name = gpxNormalize)]
pub fn gpx_normalize(gpx_string: &str, options: JsValue) -> Result<String, JsValue> {
    console_error_panic_hook::set_once();

    let opts: NormalizeOptions = parse_options(options)?;
    let mut file = checked(parse_gpx_str(gpx_string))?;
    if let Some(creator) = opts.creator {
        file.author = Some(creator);
    }
    Ok(write_to_string(&file)?)
}

fn analyze(gpx_string: &str, options: JsValue, progress: Option<js_sys::Function>) -> Result<AnalysisReport, JsValue> {
    let opts: AnalysisOptions = parse_options(options)?;
    let mut js_progress = progress.map(JsProgress::new);
    let mut no_progress = NoProgress;
    let progress: &mut dyn Progress = match js_progress.as_mut() {
        Some(p) => p,
        None => &mut no_progress,
    };
    let file = checked(parse_gpx_with(gpx_string.as_bytes(), None, &mut *progress))?;
    let report = file.analyze(&opts, progress);
    match report.analysis.error.clone() {
        Some(e) => Err(e.into()),
        None => Ok(report),
    }
}

fn checked(file: GpxFile) -> Result<GpxFile, JsValue> {
    match file.error {
        Some(e) => Err(e.into()),
        None => Ok(file),
    }
}

fn parse_options<T: DeserializeOwned + Default>(options: JsValue) -> Result<T, JsValue> {
    if options.is_undefined() || options.is_null() {
        Ok(T::default())
    } else {
        serde_wasm_bindgen::from_value(options).map_err(|e| JsValue::from_str(&e.to_string()))
    }
}

/// Forwards progress to a JS callback roughly once per percent, or every
/// [`UNSIZED_STEP`] units while the total is unknown.
struct JsProgress {
    callback: js_sys::Function,
    total: usize,
    done: usize,
    step: usize,
    cancelled: bool,
}

impl JsProgress {
    fn new(callback: js_sys::Function) -> Self {
        Self {
            callback,
            total: 0,
            done: 0,
            step: UNSIZED_STEP,
            cancelled: false,
        }
    }

    fn report(&mut self) {
        let result = self.callback.call2(
            &JsValue::NULL,
            &JsValue::from_f64(self.done as f64),
            &JsValue::from_f64(self.total as f64),
        );
        match result {
            Ok(v) => self.cancelled = v.as_bool() == Some(false),
            Err(e) => tracing::warn!("Progress callback failed: {e:?}"),
        }
    }
}

impl Progress for JsProgress {
    fn start_work(&mut self, total: usize) {
        self.total = total;
        self.done = 0;
        self.step = (total / 100).max(1);
        self.report();
    }

    fn progress(&mut self, delta: usize) {
        let before = self.done / self.step;
        self.done += delta;
        if self.done / self.step != before {
            self.report();
        }
    }

    fn is_interrupted(&self) -> bool {
        self.cancelled
    }
}
