use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;
use crate::transaction::OutputField;

/// How columns are inferred when a table has no explicit column guides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnMode {
    /// 1-D k-means over glyph midpoints, k picked by score.
    #[default]
    Auto,
    /// Label/value split at the widest horizontal gap.
    TwoColumnForm,
    /// Greedy merge of nearby midpoints.
    Proportional,
}

impl FromStr for ColumnMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "kmeans" => Ok(Self::Auto),
            "form" | "two-column" | "two_column_form" => Ok(Self::TwoColumnForm),
            "proportional" | "greedy" => Ok(Self::Proportional),
            other => Err(format!(
                "unknown column mode '{other}', expected auto, form or proportional"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowMode {
    #[default]
    Standard,
    /// Wider merge tolerance for sparse or irregular statement layouts.
    Relaxed,
}

/// Heuristic thresholds. All of them were tuned on real statements and are
/// meant to be overridden from a JSON file rather than edited in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub eps: f64,
    pub overlap_threshold: f64,
    pub row_tolerance_floor: f64,
    pub row_tolerance_factor: f64,
    pub relaxed_row_tolerance_factor: f64,
    pub paragraph_max_chars: usize,
    pub paragraph_max_tokens: usize,
    pub max_cols: usize,
    pub kmeans_iterations: usize,
    pub min_cluster_members: usize,
    pub small_cluster_penalty: f64,
    pub spread_weight: f64,
    pub form_gap_floor: f64,
    pub form_gap_factor: f64,
    pub column_tolerance_floor: f64,
    pub column_tolerance_factor: f64,
    pub line_tolerance: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            eps: 1.0,
            overlap_threshold: 0.35,
            row_tolerance_floor: 6.0,
            row_tolerance_factor: 0.7,
            relaxed_row_tolerance_factor: 1.5,
            paragraph_max_chars: 60,
            paragraph_max_tokens: 12,
            max_cols: 6,
            kmeans_iterations: 50,
            min_cluster_members: 3,
            small_cluster_penalty: 5.0,
            spread_weight: 3.0,
            form_gap_floor: 12.0,
            form_gap_factor: 0.8,
            column_tolerance_floor: 12.0,
            column_tolerance_factor: 0.8,
            line_tolerance: 0.75,
        }
    }
}

impl InferenceConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ExtractError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.max_cols < 2 {
            return Err(ExtractError::InvalidOption(
                "max_cols must be at least 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.overlap_threshold) {
            return Err(ExtractError::InvalidOption(
                "overlap_threshold must be within 0..=1".to_string(),
            ));
        }
        if self.eps < 0.0 || self.line_tolerance < 0.0 {
            return Err(ExtractError::InvalidOption(
                "tolerances must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSelection {
    pages: BTreeSet<u32>,
}

impl PageSelection {
    #[must_use]
    pub fn contains(&self, page: u32) -> bool {
        self.pages.contains(&page)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl FromStr for PageSelection {
    type Err = String;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut pages = BTreeSet::new();
        for token in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some((start, end)) = token.split_once('-') {
                let start: u32 = start
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid page range start: '{start}'"))?;
                let end: u32 = end
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid page range end: '{end}'"))?;
                if start == 0 || end == 0 {
                    return Err("pages are 1-based".to_string());
                }
                if end < start {
                    return Err(format!(
                        "invalid range '{token}': end is smaller than start"
                    ));
                }
                pages.extend(start..=end);
            } else {
                let page: u32 = token
                    .parse()
                    .map_err(|_| format!("invalid page number: '{token}'"))?;
                if page == 0 {
                    return Err("pages are 1-based".to_string());
                }
                pages.insert(page);
            }
        }

        if pages.is_empty() {
            return Err("page selection cannot be empty".to_string());
        }

        Ok(Self { pages })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    pub pages: Option<PageSelection>,
    pub scale: f64,
    pub column_mode: ColumnMode,
    pub row_mode: RowMode,
    /// Synthesize a table from loose row+column guides when none is drawn.
    pub auto_build: bool,
    /// Synthesize a table over all glyphs when no guides define one.
    pub smart_mode: bool,
    pub structured: bool,
    pub fields: Vec<OutputField>,
    pub dedupe: bool,
    pub delimiter: u8,
    pub no_page: bool,
    pub no_table: bool,
    pub inference: InferenceConfig,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            pages: None,
            scale: 1.25,
            column_mode: ColumnMode::Auto,
            row_mode: RowMode::Standard,
            auto_build: true,
            smart_mode: true,
            structured: false,
            fields: OutputField::DEFAULT_SELECTION.to_vec(),
            dedupe: false,
            delimiter: b',',
            no_page: false,
            no_table: false,
            inference: InferenceConfig::default(),
        }
    }
}

impl ExtractOptions {
    pub fn validate(&self) -> Result<(), ExtractError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ExtractError::InvalidOption(
                "scale must be a positive number".to_string(),
            ));
        }
        if self.structured && self.fields.is_empty() {
            return Err(ExtractError::InvalidOption(
                "structured export needs at least one output field".to_string(),
            ));
        }
        self.inference.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnMode, ExtractOptions, InferenceConfig, PageSelection};
    use std::str::FromStr;

    #[test]
    fn parse_page_selection_range_and_single() {
        let selection = PageSelection::from_str("1-3,5").expect("selection should parse");
        assert!(selection.contains(1));
        assert!(selection.contains(3));
        assert!(selection.contains(5));
        assert!(!selection.contains(4));
    }

    #[test]
    fn reject_invalid_page_selection() {
        let err = PageSelection::from_str("3-1").expect_err("invalid range should fail");
        assert!(err.contains("invalid range"));
    }

    #[test]
    fn parses_column_mode_spellings() {
        assert_eq!(ColumnMode::from_str("form"), Ok(ColumnMode::TwoColumnForm));
        assert_eq!(ColumnMode::from_str(" Auto "), Ok(ColumnMode::Auto));
        assert!(ColumnMode::from_str("diagonal").is_err());
    }

    #[test]
    fn partial_config_json_keeps_defaults() {
        let config: InferenceConfig =
            serde_json::from_str(r#"{"paragraph_max_chars": 100, "max_cols": 8}"#)
                .expect("config should parse");
        assert_eq!(config.paragraph_max_chars, 100);
        assert_eq!(config.max_cols, 8);
        assert_eq!(config.overlap_threshold, 0.35);
    }

    #[test]
    fn rejects_non_positive_scale() {
        let options = ExtractOptions {
            scale: 0.0,
            ..ExtractOptions::default()
        };
        assert!(options.validate().is_err());
    }
}
