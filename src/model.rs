use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;
use crate::geometry::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionKind {
    Table,
    Row,
    #[serde(alias = "col")]
    Column,
    /// Any kind this crate does not understand; skipped during assembly.
    #[serde(other)]
    Unknown,
}

impl SelectionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Row => "row",
            Self::Column => "column",
            Self::Unknown => "unknown",
        }
    }
}

/// A user-drawn guide. `rect` is unit-normalized to the page viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(alias = "type")]
    pub kind: SelectionKind,
    pub rect: Rect,
    #[serde(default, alias = "colorTag", skip_serializing_if = "Option::is_none")]
    pub color_tag: Option<String>,
}

impl Selection {
    #[must_use]
    pub fn new(kind: SelectionKind, rect: Rect) -> Self {
        Self {
            kind,
            rect,
            color_tag: None,
        }
    }
}

/// Explicit attachment of extra row/column rects (normalized) to a table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualLink {
    pub table_index: usize,
    #[serde(default)]
    pub additional_row_rects: Vec<Rect>,
    #[serde(default)]
    pub additional_col_rects: Vec<Rect>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageGuides {
    #[serde(default)]
    pub selections: Vec<Selection>,
    #[serde(default)]
    pub links: Vec<ManualLink>,
}

/// Guides for a whole document, keyed by 1-based page number.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentGuides {
    #[serde(default)]
    pub pages: BTreeMap<u32, PageGuides>,
}

impl DocumentGuides {
    pub fn from_json_file(path: &Path) -> Result<Self, ExtractError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    #[must_use]
    pub fn page(&self, page: u32) -> Option<&PageGuides> {
        self.pages.get(&page)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableOrigin {
    Drawn,
    GuideUnion,
    SmartDetect,
}

/// A resolved table in pixel space.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub rect: Rect,
    pub rows: Vec<Rect>,
    pub cols: Vec<Rect>,
    pub origin: TableOrigin,
    /// Indices into the page's selections that ended up in this table.
    pub guides: Vec<usize>,
    pub inferred_rows: bool,
    pub inferred_cols: bool,
}

/// A row/column guide no table absorbed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LooseSelection {
    pub selection_index: usize,
    pub kind: SelectionKind,
    pub rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageAssembly {
    pub page: u32,
    pub tables: Vec<Table>,
    pub loose: Vec<LooseSelection>,
    /// Row clusters dropped as prose across all inferred tables.
    pub paragraph_rows_dropped: usize,
    pub ignored_links: Vec<usize>,
    /// Selections skipped for an unknown kind or an empty rect.
    pub ignored_selections: Vec<usize>,
}

/// `cells[row][col]`, rebuilt from the table geometry every time.
pub type CellMatrix = Vec<Vec<String>>;
