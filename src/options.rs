use serde::Deserialize;

/// Options for track analysis.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOptions {
    /// Start/end time used when the document carries no timestamps (default: 0)
    #[serde(default)]
    pub filestamp: i64,

    /// Restrict the analysis to points at or past this cumulative distance
    #[serde(default)]
    pub from_distance: Option<f64>,

    /// Restrict the analysis to points up to this cumulative distance
    #[serde(default)]
    pub to_distance: Option<f64>,

    /// Also split the general (or only) segment and analyze each piece
    #[serde(default)]
    pub split: Option<SplitOptions>,

    /// Fill `elevationData` / `speedData` (default: true)
    #[serde(default = "default_true")]
    pub include_series: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            filestamp: 0,
            from_distance: None,
            to_distance: None,
            split: None,
            include_series: true,
        }
    }
}

impl AnalysisOptions {
    /// Distance window, present only when both bounds are set.
    pub fn distance_range(&self) -> Option<(f64, f64)> {
        self.from_distance.zip(self.to_distance)
    }
}

/// Splitting one segment by a metric limit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitOptions {
    pub split_type: SplitType,

    /// Metres for distance splits, seconds for time splits
    pub interval: f64,

    /// Treat the gaps between joined segments as travelled (default: false)
    #[serde(default)]
    pub join_segments: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitType {
    Distance,
    Time,
}

/// Options for parse-then-write normalization.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeOptions {
    /// Overrides the `creator` attribute of the written document
    #[serde(default)]
    pub creator: Option<String>,
}

fn default_true() -> bool {
    true
}
