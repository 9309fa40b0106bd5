//! Per-document state: the glyph cache, persisted guides and orders, and an
//! arena of derived per-page results.
//!
//! Derived results are keyed by everything they are computed from (page
//! transform, that page's guides and the inference options). A key mismatch
//! rebuilds the page wholesale; nothing is patched in place.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use tracing::{debug, warn};

use crate::ai_fallback::{PageText, page_text};
use crate::assemble::assemble_page;
use crate::cells::collect_cells;
use crate::error::ExtractError;
use crate::export::{
    ExportTable, OrderedTable, apply_column_filters, merge_raw, structured_transactions,
    transactions_to_table,
};
use crate::glyph::{GlyphCache, GlyphSource};
use crate::model::{CellMatrix, DocumentGuides, PageAssembly, PageGuides};
use crate::options::ExtractOptions;
use crate::ordering::OrderingStore;
use crate::warning::{ExtractWarning, WarningCode};

/// A page the renderer could not provide; other pages still export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub page: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionReport {
    pub row_count: usize,
    pub table_count: usize,
    pub warnings: Vec<ExtractWarning>,
    pub page_failures: Vec<PageFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DerivedKey {
    transform: [u64; 6],
    guides: u64,
    options: u64,
}

#[derive(Debug, Clone)]
struct DerivedPage {
    key: DerivedKey,
    assembly: PageAssembly,
    cells: Vec<CellMatrix>,
    warnings: Vec<ExtractWarning>,
}

fn fingerprint<T: Serialize>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    serde_json::to_string(value)
        .unwrap_or_default()
        .hash(&mut hasher);
    hasher.finish()
}

fn options_fingerprint(options: &ExtractOptions) -> u64 {
    fingerprint(&(
        options.column_mode,
        options.row_mode,
        options.auto_build,
        options.smart_mode,
        &options.inference,
    ))
}

fn page_warnings(assembly: &PageAssembly, links: usize) -> Vec<ExtractWarning> {
    let page = assembly.page;
    let mut warnings = Vec::new();

    if !assembly.loose.is_empty() {
        warnings.push(
            ExtractWarning::new(
                WarningCode::LooseGuides,
                "row/column guides outside every table were left unattached",
            )
            .with_page(page)
            .with_count(assembly.loose.len()),
        );
    }
    if !assembly.ignored_selections.is_empty() {
        warnings.push(
            ExtractWarning::new(
                WarningCode::SelectionIgnored,
                format!(
                    "selections {:?} have an unknown kind or an empty rect and were skipped",
                    assembly.ignored_selections
                ),
            )
            .with_page(page)
            .with_count(assembly.ignored_selections.len()),
        );
    }
    for link_index in &assembly.ignored_links {
        warnings.push(
            ExtractWarning::new(
                WarningCode::ManualLinkIgnored,
                format!("manual link {link_index} of {links} points at a table that does not exist"),
            )
            .with_page(page),
        );
    }
    if assembly.paragraph_rows_dropped > 0 {
        warnings.push(
            ExtractWarning::new(
                WarningCode::ParagraphRowsDropped,
                "prose-like row clusters were excluded from inferred rows",
            )
            .with_page(page)
            .with_count(assembly.paragraph_rows_dropped),
        );
    }
    for (index, table) in assembly.tables.iter().enumerate() {
        let inferred = table.inferred_rows || table.inferred_cols;
        if inferred && (table.rows.len() <= 1 || table.cols.len() <= 1) {
            warnings.push(
                ExtractWarning::new(
                    WarningCode::GridFallback,
                    "grid inference degraded to a single row or column",
                )
                .with_page(page)
                .with_table_index(index),
            );
        }
    }
    warnings
}

pub struct ExtractionSession<S: GlyphSource> {
    source: S,
    guides: DocumentGuides,
    options: ExtractOptions,
    glyphs: GlyphCache,
    ordering: OrderingStore,
    derived: HashMap<u32, DerivedPage>,
}

impl<S: GlyphSource> ExtractionSession<S> {
    pub fn new(source: S, options: ExtractOptions) -> Result<Self, ExtractError> {
        options.validate()?;
        Ok(Self {
            source,
            guides: DocumentGuides::default(),
            options,
            glyphs: GlyphCache::new(),
            ordering: OrderingStore::new(),
            derived: HashMap::new(),
        })
    }

    #[must_use]
    pub fn with_guides(mut self, guides: DocumentGuides) -> Self {
        self.guides = guides;
        self
    }

    #[must_use]
    pub fn with_ordering(mut self, ordering: OrderingStore) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn guides(&self) -> &DocumentGuides {
        &self.guides
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    pub fn ordering(&self) -> &OrderingStore {
        &self.ordering
    }

    pub fn ordering_mut(&mut self) -> &mut OrderingStore {
        &mut self.ordering
    }

    pub fn set_guides(&mut self, guides: DocumentGuides) {
        self.guides = guides;
        self.derived.clear();
    }

    pub fn set_page_guides(&mut self, page: u32, guides: PageGuides) {
        self.guides.pages.insert(page, guides);
        self.derived.remove(&page);
    }

    pub fn set_scale(&mut self, scale: f64) -> Result<(), ExtractError> {
        let options = ExtractOptions {
            scale,
            ..self.options.clone()
        };
        self.set_options(options)
    }

    pub fn set_options(&mut self, options: ExtractOptions) -> Result<(), ExtractError> {
        options.validate()?;
        self.options = options;
        Ok(())
    }

    /// Document pages the options select, in order.
    #[must_use]
    pub fn selected_pages(&self) -> Vec<u32> {
        self.source
            .page_numbers()
            .into_iter()
            .filter(|page| {
                self.options
                    .pages
                    .as_ref()
                    .is_none_or(|selection| selection.contains(*page))
            })
            .collect()
    }

    fn derive_page(&mut self, page: u32) -> Result<&DerivedPage, ExtractError> {
        let options_key = options_fingerprint(&self.options);
        let (viewport, boxes) = self.glyphs.load(&self.source, page, self.options.scale)?;
        let page_guides = self.guides.page(page).cloned().unwrap_or_default();
        let key = DerivedKey {
            transform: viewport.transform.map(f64::to_bits),
            guides: fingerprint(&page_guides),
            options: options_key,
        };

        let stale = self.derived.get(&page).is_none_or(|derived| derived.key != key);
        if stale {
            let assembly = assemble_page(
                page,
                &page_guides,
                boxes,
                viewport.width,
                viewport.height,
                &self.options,
            );
            let cells = assembly
                .tables
                .iter()
                .map(|table| collect_cells(table, boxes, &self.options.inference))
                .collect::<Vec<_>>();
            let warnings = page_warnings(&assembly, page_guides.links.len());
            debug!(page, tables = cells.len(), "rebuilt derived page");
            self.derived.insert(
                page,
                DerivedPage {
                    key,
                    assembly,
                    cells,
                    warnings,
                },
            );
        }

        self.derived
            .get(&page)
            .ok_or_else(|| ExtractError::PageUnavailable {
                page,
                reason: "derived page cache lost the page".to_string(),
            })
    }

    /// Tables and loose guides of a page, rebuilt if any input changed.
    pub fn page_assembly(&mut self, page: u32) -> Result<&PageAssembly, ExtractError> {
        self.derive_page(page).map(|derived| &derived.assembly)
    }

    /// Cell matrices of a page's tables in detection order.
    pub fn cell_matrices(&mut self, page: u32) -> Result<&[CellMatrix], ExtractError> {
        self.derive_page(page).map(|derived| derived.cells.as_slice())
    }

    /// Reading-order text of every selected page, for the completion
    /// fallback. Pages that fail to load are reported separately.
    pub fn page_texts(&mut self) -> (Vec<PageText>, Vec<PageFailure>) {
        let mut texts = Vec::new();
        let mut failures = Vec::new();
        for page in self.selected_pages() {
            match self.glyphs.load(&self.source, page, self.options.scale) {
                Ok((_, boxes)) => texts.push(PageText {
                    page,
                    text: page_text(boxes, self.options.inference.line_tolerance),
                }),
                Err(err) => failures.push(PageFailure {
                    page,
                    message: err.to_string(),
                }),
            }
        }
        (texts, failures)
    }

    /// Flattens every selected page into export rows, raw or structured.
    /// Pages whose glyphs cannot be loaded are skipped and reported.
    pub fn export(&mut self) -> Result<(ExportTable, ExtractionReport), ExtractError> {
        let pages = self.selected_pages();
        if pages.is_empty() {
            return Err(ExtractError::NoPagesSelected);
        }

        let mut warnings = Vec::new();
        let mut page_failures = Vec::new();
        let mut page_tables = Vec::new();
        for page in pages {
            match self.derive_page(page) {
                Ok(derived) => {
                    warnings.extend(derived.warnings.iter().cloned());
                    page_tables.extend(derived.cells.iter().cloned().map(|cells| (page, cells)));
                }
                Err(err) => {
                    warn!(page, error = %err, "skipping page");
                    warnings.push(
                        ExtractWarning::new(WarningCode::PageGlyphsUnavailable, err.to_string())
                            .with_page(page),
                    );
                    page_failures.push(PageFailure {
                        page,
                        message: err.to_string(),
                    });
                }
            }
        }

        let mut tables = Vec::with_capacity(page_tables.len());
        for (index, (page, cells)) in page_tables.into_iter().enumerate() {
            let rows = cells.len();
            let cols = cells.first().map_or(0, Vec::len);
            if self.ordering.sync(index, rows, cols) {
                warnings.push(
                    ExtractWarning::new(
                        WarningCode::OrderReset,
                        "stored row/column order no longer matched the table and was reset",
                    )
                    .with_page(page)
                    .with_table_index(index),
                );
            }
            tables.push(OrderedTable {
                page,
                table_id: index + 1,
                cells: self.ordering.apply(index, &cells),
            });
        }
        self.ordering.retain_tables(tables.len());

        if tables.is_empty() {
            warnings.push(ExtractWarning::new(
                WarningCode::NoTablesDetected,
                "no tables were found in the selected pages",
            ));
        }

        let output = if self.options.structured {
            let transactions = structured_transactions(&tables, self.options.dedupe);
            transactions_to_table(&transactions, &self.options.fields, tables.len())
        } else {
            apply_column_filters(merge_raw(&tables), self.options.no_page, self.options.no_table)
        };

        let report = ExtractionReport {
            row_count: output.row_count,
            table_count: output.table_count,
            warnings,
            page_failures,
        };
        Ok((output, report))
    }
}
