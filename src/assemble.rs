use tracing::debug;

use crate::geometry::{Rect, attaches, overlap_ratio};
use crate::glyph::GlyphBox;
use crate::grid_infer::infer_grid;
use crate::model::{
    LooseSelection, PageAssembly, PageGuides, Selection, SelectionKind, Table, TableOrigin,
};
use crate::options::ExtractOptions;

const SAME_RECT_EPS: f64 = 1e-6;

fn same_rect(a: &Rect, b: &Rect) -> bool {
    (a.x - b.x).abs() <= SAME_RECT_EPS
        && (a.y - b.y).abs() <= SAME_RECT_EPS
        && (a.width - b.width).abs() <= SAME_RECT_EPS
        && (a.height - b.height).abs() <= SAME_RECT_EPS
}

#[derive(Debug, Clone)]
struct TableDraft {
    rect: Rect,
    origin: TableOrigin,
    rows: Vec<Rect>,
    cols: Vec<Rect>,
    guides: Vec<usize>,
}

impl TableDraft {
    fn new(rect: Rect, origin: TableOrigin) -> Self {
        Self {
            rect,
            origin,
            rows: Vec::new(),
            cols: Vec::new(),
            guides: Vec::new(),
        }
    }

    fn push_guide(&mut self, kind: SelectionKind, rect: Rect) {
        let target = match kind {
            SelectionKind::Row => &mut self.rows,
            SelectionKind::Column => &mut self.cols,
            SelectionKind::Table | SelectionKind::Unknown => return,
        };
        if !target.iter().any(|existing| same_rect(existing, &rect)) {
            target.push(rect);
        }
    }
}

/// Table whose attachment test the guide passes with the highest overlap;
/// ties go to the earlier table.
fn best_table(drafts: &[TableDraft], guide: &Rect, options: &ExtractOptions) -> Option<usize> {
    let config = &options.inference;
    let mut best: Option<(usize, f64)> = None;
    for (index, draft) in drafts.iter().enumerate() {
        if !attaches(&draft.rect, guide, config.overlap_threshold, config.eps) {
            continue;
        }
        let ratio = overlap_ratio(&draft.rect, guide);
        if best.is_none_or(|(_, best_ratio)| ratio > best_ratio) {
            best = Some((index, ratio));
        }
    }
    best.map(|(index, _)| index)
}

fn manually_linked(
    guides: &PageGuides,
    table_count: usize,
    selection: &Selection,
) -> Option<usize> {
    guides
        .links
        .iter()
        .filter(|link| link.table_index < table_count)
        .find(|link| {
            let rects = match selection.kind {
                SelectionKind::Row => &link.additional_row_rects,
                SelectionKind::Column => &link.additional_col_rects,
                SelectionKind::Table | SelectionKind::Unknown => return false,
            };
            let wanted = selection.rect.normalized();
            rects.iter().any(|rect| same_rect(&rect.normalized(), &wanted))
        })
        .map(|link| link.table_index)
}

/// Resolves one page's guides into tables and loose guides.
///
/// Pure in its inputs: the same selections, links, glyph boxes and viewport
/// always produce the same assembly. Memoization is the caller's job.
/// Reversed rects are normalized first; selections of an unknown kind or with
/// an empty rect are skipped and reported in `ignored_selections`.
#[must_use]
pub fn assemble_page(
    page: u32,
    guides: &PageGuides,
    glyphs: &[GlyphBox],
    viewport_width: f64,
    viewport_height: f64,
    options: &ExtractOptions,
) -> PageAssembly {
    let to_pixels = |rect: &Rect| rect.normalized().to_pixels(viewport_width, viewport_height);

    let mut drafts = Vec::new();
    let mut line_guides = Vec::new();
    let mut ignored_selections = Vec::new();
    for (index, selection) in guides.selections.iter().enumerate() {
        if selection.kind == SelectionKind::Unknown || selection.rect.normalized().area() <= 0.0 {
            debug!(page, index, kind = selection.kind.as_str(), "skipping unusable selection");
            ignored_selections.push(index);
            continue;
        }
        match selection.kind {
            SelectionKind::Table => {
                let mut draft = TableDraft::new(to_pixels(&selection.rect), TableOrigin::Drawn);
                draft.guides.push(index);
                drafts.push(draft);
            }
            SelectionKind::Row | SelectionKind::Column => line_guides.push(index),
            SelectionKind::Unknown => {}
        }
    }

    let has_kind = |kind: SelectionKind| {
        line_guides
            .iter()
            .any(|index| guides.selections[*index].kind == kind)
    };
    if drafts.is_empty()
        && options.auto_build
        && has_kind(SelectionKind::Row)
        && has_kind(SelectionKind::Column)
    {
        let pixel_rects = line_guides
            .iter()
            .map(|index| to_pixels(&guides.selections[*index].rect))
            .collect::<Vec<_>>();
        if let Some(union) = Rect::bounding(&pixel_rects) {
            debug!(page, "synthesized table from row and column guides");
            drafts.push(TableDraft::new(union, TableOrigin::GuideUnion));
        }
    }
    if drafts.is_empty() && options.smart_mode {
        let glyph_rects = glyphs.iter().map(GlyphBox::rect).collect::<Vec<_>>();
        if let Some(bounds) = Rect::bounding(&glyph_rects) {
            debug!(page, "synthesized table over all page glyphs");
            drafts.push(TableDraft::new(bounds, TableOrigin::SmartDetect));
        }
    }

    let mut loose = Vec::new();
    for index in line_guides {
        let selection = &guides.selections[index];
        let rect = to_pixels(&selection.rect);
        if let Some(table) = best_table(&drafts, &rect, options) {
            drafts[table].push_guide(selection.kind, rect);
            drafts[table].guides.push(index);
        } else if let Some(table) = manually_linked(guides, drafts.len(), selection) {
            // the link merge below contributes the rect itself
            drafts[table].guides.push(index);
        } else {
            loose.push(LooseSelection {
                selection_index: index,
                kind: selection.kind,
                rect,
            });
        }
    }

    let mut ignored_links = Vec::new();
    for (link_index, link) in guides.links.iter().enumerate() {
        let Some(draft) = drafts.get_mut(link.table_index) else {
            ignored_links.push(link_index);
            continue;
        };
        for rect in &link.additional_row_rects {
            draft.push_guide(SelectionKind::Row, to_pixels(rect));
        }
        for rect in &link.additional_col_rects {
            draft.push_guide(SelectionKind::Column, to_pixels(rect));
        }
    }

    let mut paragraph_rows_dropped = 0;
    let tables = drafts
        .into_iter()
        .map(|mut draft| {
            draft
                .rows
                .sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));
            draft
                .cols
                .sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
            draft.guides.sort_unstable();

            let inferred_rows = draft.rows.is_empty();
            let inferred_cols = draft.cols.is_empty();
            if inferred_rows || inferred_cols {
                let grid = infer_grid(
                    &draft.rect,
                    glyphs,
                    &draft.rows,
                    &draft.cols,
                    options.column_mode,
                    options.row_mode,
                    &options.inference,
                );
                paragraph_rows_dropped += grid.paragraph_rows_dropped;
                draft.rows = grid.rows;
                draft.cols = grid.cols;
            }

            Table {
                rect: draft.rect,
                rows: draft.rows,
                cols: draft.cols,
                origin: draft.origin,
                guides: draft.guides,
                inferred_rows,
                inferred_cols,
            }
        })
        .collect::<Vec<_>>();

    debug!(
        page,
        tables = tables.len(),
        loose = loose.len(),
        "assembled page tables"
    );

    PageAssembly {
        page,
        tables,
        loose,
        paragraph_rows_dropped,
        ignored_links,
        ignored_selections,
    }
}

#[cfg(test)]
mod tests {
    use super::assemble_page;
    use crate::cells::collect_cells;
    use crate::geometry::Rect;
    use crate::glyph::GlyphBox;
    use crate::model::{ManualLink, PageGuides, Selection, SelectionKind, TableOrigin};
    use crate::options::ExtractOptions;

    const W: f64 = 1000.0;
    const H: f64 = 1000.0;

    fn norm(x: f64, y: f64, w: f64, h: f64) -> Rect {
        Rect::new(x / W, y / H, w / W, h / H)
    }

    fn guides(selections: Vec<Selection>) -> PageGuides {
        PageGuides {
            selections,
            links: Vec::new(),
        }
    }

    fn every_line_guide_in_one_bucket(guides: &PageGuides, assembly: &crate::model::PageAssembly) {
        for (index, selection) in guides.selections.iter().enumerate() {
            if selection.kind == SelectionKind::Table || assembly.ignored_selections.contains(&index) {
                continue;
            }
            let attached = assembly
                .tables
                .iter()
                .filter(|table| table.guides.contains(&index))
                .count();
            let loose = assembly
                .loose
                .iter()
                .filter(|item| item.selection_index == index)
                .count();
            assert_eq!(attached + loose, 1, "selection {index} must be in exactly one bucket");
        }
    }

    #[test]
    fn attaches_guides_inside_and_reports_outside_as_loose() {
        let page_guides = guides(vec![
            Selection::new(SelectionKind::Table, norm(100.0, 100.0, 400.0, 200.0)),
            Selection::new(SelectionKind::Row, norm(100.0, 150.0, 400.0, 20.0)),
            Selection::new(SelectionKind::Row, norm(100.0, 110.0, 400.0, 20.0)),
            Selection::new(SelectionKind::Column, norm(60.0, 100.0, 100.0, 200.0)),
            Selection::new(SelectionKind::Column, norm(700.0, 100.0, 50.0, 200.0)),
        ]);
        let assembly = assemble_page(1, &page_guides, &[], W, H, &ExtractOptions::default());

        assert_eq!(assembly.tables.len(), 1);
        let table = &assembly.tables[0];
        assert_eq!(table.origin, TableOrigin::Drawn);
        assert_eq!(table.rows.len(), 2);
        assert!(table.rows[0].y < table.rows[1].y, "rows sorted by y");
        // straddles the left border with 60% inside
        assert_eq!(table.cols.len(), 1);
        assert_eq!(assembly.loose.len(), 1);
        assert_eq!(assembly.loose[0].selection_index, 4);
        every_line_guide_in_one_bucket(&page_guides, &assembly);
    }

    #[test]
    fn synthesizes_table_from_loose_rows_and_columns() {
        let page_guides = guides(vec![
            Selection::new(SelectionKind::Row, norm(100.0, 100.0, 300.0, 20.0)),
            Selection::new(SelectionKind::Column, norm(120.0, 80.0, 50.0, 200.0)),
        ]);
        let assembly = assemble_page(1, &page_guides, &[], W, H, &ExtractOptions::default());
        assert_eq!(assembly.tables.len(), 1);
        assert_eq!(assembly.tables[0].origin, TableOrigin::GuideUnion);
        let rect = assembly.tables[0].rect;
        assert!((rect.x - 100.0).abs() < 1e-9);
        assert!((rect.y - 80.0).abs() < 1e-9);
        assert!((rect.right() - 400.0).abs() < 1e-9);
        assert!((rect.bottom() - 280.0).abs() < 1e-9);
        assert!(assembly.loose.is_empty());
        every_line_guide_in_one_bucket(&page_guides, &assembly);
    }

    #[test]
    fn auto_build_disabled_leaves_guides_loose() {
        let page_guides = guides(vec![
            Selection::new(SelectionKind::Row, norm(100.0, 100.0, 300.0, 20.0)),
            Selection::new(SelectionKind::Column, norm(120.0, 80.0, 50.0, 200.0)),
        ]);
        let options = ExtractOptions {
            auto_build: false,
            smart_mode: false,
            ..ExtractOptions::default()
        };
        let assembly = assemble_page(1, &page_guides, &[], W, H, &options);
        assert!(assembly.tables.is_empty());
        assert_eq!(assembly.loose.len(), 2);
    }

    #[test]
    fn smart_mode_spans_all_glyphs() {
        let glyphs = vec![
            GlyphBox::new("a", 10.0, 10.0, 20.0, 10.0),
            GlyphBox::new("b", 200.0, 300.0, 20.0, 10.0),
        ];
        let assembly = assemble_page(1, &PageGuides::default(), &glyphs, W, H, &ExtractOptions::default());
        assert_eq!(assembly.tables.len(), 1);
        assert_eq!(assembly.tables[0].origin, TableOrigin::SmartDetect);
        assert_eq!(assembly.tables[0].rect, Rect::new(10.0, 10.0, 210.0, 300.0));
        assert!(assembly.tables[0].inferred_rows);
    }

    #[test]
    fn manual_link_attaches_loose_guide_and_bad_index_is_ignored() {
        let far_column = norm(800.0, 100.0, 50.0, 200.0);
        let page_guides = PageGuides {
            selections: vec![
                Selection::new(SelectionKind::Table, norm(100.0, 100.0, 400.0, 200.0)),
                Selection::new(SelectionKind::Row, norm(100.0, 120.0, 400.0, 20.0)),
                Selection::new(SelectionKind::Column, far_column),
            ],
            links: vec![
                ManualLink {
                    table_index: 0,
                    additional_row_rects: Vec::new(),
                    additional_col_rects: vec![far_column],
                },
                ManualLink {
                    table_index: 7,
                    ..ManualLink::default()
                },
            ],
        };
        let assembly = assemble_page(1, &page_guides, &[], W, H, &ExtractOptions::default());
        assert!(assembly.loose.is_empty());
        assert_eq!(assembly.tables[0].cols.len(), 1);
        assert_eq!(assembly.tables[0].guides, vec![0, 1, 2]);
        assert_eq!(assembly.ignored_links, vec![1]);
        every_line_guide_in_one_bucket(&page_guides, &assembly);
    }

    #[test]
    fn reversed_table_rect_still_collects_its_glyphs() {
        let glyphs = vec![
            GlyphBox::new("Alpha", 120.0, 130.0, 40.0, 10.0),
            GlyphBox::new("Beta", 300.0, 130.0, 40.0, 10.0),
            GlyphBox::new("Gamma", 120.0, 250.0, 40.0, 10.0),
            GlyphBox::new("Delta", 300.0, 250.0, 40.0, 10.0),
        ];
        // drawn from the bottom-right corner: covers 100..500 x 100..300
        let page_guides = guides(vec![Selection::new(
            SelectionKind::Table,
            Rect::new(0.5, 0.3, -0.4, -0.2),
        )]);
        let options = ExtractOptions::default();
        let assembly = assemble_page(1, &page_guides, &glyphs, W, H, &options);

        assert_eq!(assembly.tables.len(), 1);
        let table = &assembly.tables[0];
        assert!(table.rect.width > 0.0 && table.rect.height > 0.0);
        let cells = collect_cells(table, &glyphs, &options.inference);
        assert_eq!(
            cells,
            vec![vec!["Alpha", "Beta"], vec!["Gamma", "Delta"]]
        );
    }

    #[test]
    fn unknown_and_empty_selections_are_skipped() {
        let page_guides = guides(vec![
            Selection::new(SelectionKind::Unknown, norm(100.0, 100.0, 400.0, 200.0)),
            Selection::new(SelectionKind::Table, norm(100.0, 100.0, 400.0, 200.0)),
            Selection::new(SelectionKind::Row, norm(100.0, 150.0, 0.0, 20.0)),
            Selection::new(SelectionKind::Row, norm(100.0, 150.0, 400.0, 20.0)),
        ]);
        let assembly = assemble_page(1, &page_guides, &[], W, H, &ExtractOptions::default());

        assert_eq!(assembly.ignored_selections, vec![0, 2]);
        assert_eq!(assembly.tables.len(), 1);
        assert_eq!(assembly.tables[0].guides, vec![1, 3]);
        assert!(assembly.loose.is_empty());
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let glyphs = (0..12)
            .map(|i| {
                let (row, col) = (i / 4, i % 4);
                GlyphBox::new(
                    format!("v{i}"),
                    120.0 + f64::from(col) * 90.0,
                    130.0 + f64::from(row) * 40.0,
                    30.0,
                    10.0,
                )
            })
            .collect::<Vec<_>>();
        let page_guides = guides(vec![Selection::new(
            SelectionKind::Table,
            norm(100.0, 100.0, 400.0, 200.0),
        )]);
        let options = ExtractOptions::default();
        let first = assemble_page(3, &page_guides, &glyphs, W, H, &options);
        let second = assemble_page(3, &page_guides, &glyphs, W, H, &options);
        assert_eq!(first, second);
        assert_eq!(first.tables[0].rows.len(), 3);
    }
}
