use crate::geometry::{Rect, intersection};
use crate::glyph::GlyphBox;
use crate::model::{CellMatrix, Table};
use crate::options::InferenceConfig;

/// Orders boxes top to bottom, left to right. Boxes whose baselines sit
/// within `line_tolerance` of the first box of a line share that line.
pub(crate) fn reading_order<'a>(glyphs: &mut Vec<&'a GlyphBox>, line_tolerance: f64) {
    let baseline = |glyph: &GlyphBox| glyph.y + glyph.height;
    glyphs.sort_by(|a, b| baseline(a).total_cmp(&baseline(b)).then(a.x.total_cmp(&b.x)));

    let mut ordered: Vec<&'a GlyphBox> = Vec::with_capacity(glyphs.len());
    let mut line_start = 0;
    for index in 1..glyphs.len() {
        if baseline(glyphs[index]) - baseline(glyphs[line_start]) > line_tolerance {
            flush_line(&mut ordered, &glyphs[line_start..index]);
            line_start = index;
        }
    }
    flush_line(&mut ordered, &glyphs[line_start..]);
    *glyphs = ordered;
}

fn flush_line<'a>(ordered: &mut Vec<&'a GlyphBox>, line: &[&'a GlyphBox]) {
    let mut line = line.to_vec();
    line.sort_by(|a, b| a.x.total_cmp(&b.x));
    ordered.extend(line);
}

/// Space-joined text of the boxes whose center lies in `cell`.
#[must_use]
pub fn cell_text(cell: &Rect, glyphs: &[GlyphBox], config: &InferenceConfig) -> String {
    let mut inside = glyphs
        .iter()
        .filter(|glyph| {
            let (cx, cy) = glyph.center();
            cell.contains_point(cx, cy, 0.0)
        })
        .collect::<Vec<_>>();
    reading_order(&mut inside, config.line_tolerance);
    inside
        .iter()
        .map(|glyph| glyph.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds the `rows x cols` text matrix of a table. A row/column pair whose
/// rects do not meet inside the table yields an empty cell.
#[must_use]
pub fn collect_cells(table: &Table, glyphs: &[GlyphBox], config: &InferenceConfig) -> CellMatrix {
    table
        .rows
        .iter()
        .map(|row| {
            table
                .cols
                .iter()
                .map(|col| {
                    intersection(&table.rect, row)
                        .and_then(|band| intersection(&band, col))
                        .map(|cell| cell_text(&cell, glyphs, config))
                        .unwrap_or_default()
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{cell_text, collect_cells, reading_order};
    use crate::geometry::Rect;
    use crate::glyph::GlyphBox;
    use crate::grid_infer::infer_grid;
    use crate::model::{Table, TableOrigin};
    use crate::options::{ColumnMode, InferenceConfig, RowMode};

    #[test]
    fn reading_order_groups_same_baseline_by_x() {
        let right = GlyphBox::new("world", 60.0, 10.3, 30.0, 10.0);
        let left = GlyphBox::new("hello", 10.0, 10.0, 30.0, 10.0);
        let below = GlyphBox::new("next", 0.0, 25.0, 30.0, 10.0);
        let mut glyphs = vec![&below, &right, &left];
        reading_order(&mut glyphs, 0.75);
        let texts = glyphs.iter().map(|glyph| glyph.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["hello", "world", "next"]);
    }

    #[test]
    fn cell_text_uses_centers_and_single_spaces() {
        let glyphs = vec![
            GlyphBox::new(" 12.50 ", 10.0, 10.0, 20.0, 10.0),
            GlyphBox::new("PLN", 35.0, 10.0, 20.0, 10.0),
            // center outside the cell
            GlyphBox::new("spill", 45.0, 10.0, 40.0, 10.0),
        ];
        let cell = Rect::new(0.0, 0.0, 60.0, 30.0);
        assert_eq!(cell_text(&cell, &glyphs, &InferenceConfig::default()), "12.50 PLN");
    }

    #[test]
    fn disjoint_row_and_column_give_empty_cell() {
        let table = Table {
            rect: Rect::new(0.0, 0.0, 100.0, 100.0),
            rows: vec![Rect::new(0.0, 0.0, 100.0, 50.0)],
            cols: vec![Rect::new(0.0, 0.0, 40.0, 100.0), Rect::new(200.0, 0.0, 40.0, 100.0)],
            origin: TableOrigin::Drawn,
            guides: Vec::new(),
            inferred_rows: false,
            inferred_cols: false,
        };
        let glyphs = vec![GlyphBox::new("a", 5.0, 5.0, 10.0, 10.0)];
        let cells = collect_cells(&table, &glyphs, &InferenceConfig::default());
        assert_eq!(cells, vec![vec!["a".to_string(), String::new()]]);
    }

    #[test]
    fn ragged_description_column_does_not_duplicate_amounts() {
        let config = InferenceConfig::default();
        let table_rect = Rect::new(0.0, 0.0, 400.0, 200.0);
        let mut glyphs = Vec::new();
        for (row, width) in [60.0, 60.0, 200.0].into_iter().enumerate() {
            let top = 35.0 + 60.0 * row as f64;
            glyphs.push(GlyphBox::new(format!("desc{row}"), 10.0, top, width, 10.0));
            glyphs.push(GlyphBox::new(format!("{row}2.50"), 150.0, top, 40.0, 10.0));
        }

        let grid = infer_grid(
            &table_rect,
            &glyphs,
            &[],
            &[],
            ColumnMode::Auto,
            RowMode::Standard,
            &config,
        );
        assert!(grid.cols.windows(2).all(|pair| pair[0].right() <= pair[1].x));

        let table = Table {
            rect: table_rect,
            rows: grid.rows,
            cols: grid.cols,
            origin: TableOrigin::SmartDetect,
            guides: Vec::new(),
            inferred_rows: true,
            inferred_cols: true,
        };
        let cells = collect_cells(&table, &glyphs, &config);
        let words = cells
            .iter()
            .flatten()
            .flat_map(|cell| cell.split_whitespace())
            .collect::<Vec<_>>();
        assert_eq!(words.len(), glyphs.len(), "cells: {cells:?}");
        for glyph in &glyphs {
            assert_eq!(
                words.iter().filter(|word| **word == glyph.text).count(),
                1,
                "cells: {cells:?}"
            );
        }
    }

    #[test]
    fn inferred_four_by_three_table_yields_matching_matrix() {
        let config = InferenceConfig::default();
        let table_rect = Rect::new(0.0, 0.0, 400.0, 200.0);
        let mut glyphs = Vec::new();
        for row in 0..3 {
            for col in 0..4 {
                let cx = 50.0 + f64::from(col) * 100.0;
                let cy = 40.0 + f64::from(row) * 60.0;
                // two words per cell, emitted right to left
                glyphs.push(GlyphBox::new(format!("c{col}"), cx + 1.0, cy - 5.0, 14.0, 10.0));
                glyphs.push(GlyphBox::new(format!("r{row}"), cx - 15.0, cy - 5.0, 14.0, 10.0));
            }
        }

        let grid = infer_grid(
            &table_rect,
            &glyphs,
            &[],
            &[],
            ColumnMode::Auto,
            RowMode::Standard,
            &config,
        );
        let table = Table {
            rect: table_rect,
            rows: grid.rows,
            cols: grid.cols,
            origin: TableOrigin::SmartDetect,
            guides: Vec::new(),
            inferred_rows: true,
            inferred_cols: true,
        };
        let cells = collect_cells(&table, &glyphs, &config);

        let expected = (0..3)
            .map(|row| (0..4).map(|col| format!("r{row} c{col}")).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(cells, expected);
        assert_eq!(cells.len(), table.rows.len());
        assert!(cells.iter().all(|row| row.len() == table.cols.len()));
    }
}
