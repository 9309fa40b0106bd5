mod ai_fallback;
mod assemble;
mod cells;
mod csv_out;
mod error;
mod export;
mod geometry;
mod glyph;
mod grid_infer;
mod model;
mod options;
mod ordering;
mod pdf_reader;
mod session;
mod transaction;
mod warning;

use std::path::Path;

pub use ai_fallback::{
    ChunkFailure, CompletionClient, FallbackOutcome, MAX_CHUNK_CHARS, MAX_INPUT_CHARS, PageText,
    SYSTEM_PROMPT, TextChunk, build_page_chunks, minify_text, page_text, parse_completion,
    parse_with_fallback, user_prompt,
};
pub use assemble::assemble_page;
pub use cells::{cell_text, collect_cells};
pub use csv_out::{write_csv, write_csv_to_string};
pub use error::ExtractError;
pub use export::{ExportTable, guides_to_rows, row_text, transactions_to_table};
pub use geometry::{
    Rect, attaches, center_inside, contains, intersection, intersects, overlap_ratio,
};
pub use glyph::{
    DumpPage, GlyphBox, GlyphCache, GlyphDump, GlyphSource, IDENTITY, Matrix, PageGlyphs,
    PageViewport, RawGlyph, map_glyph, map_page, multiply,
};
pub use grid_infer::{ColumnStrategy, InferredGrid, infer_grid};
pub use model::{
    CellMatrix, DocumentGuides, LooseSelection, ManualLink, PageAssembly, PageGuides, Selection,
    SelectionKind, Table, TableOrigin,
};
pub use options::{ColumnMode, ExtractOptions, InferenceConfig, PageSelection, RowMode};
pub use ordering::{OrderingStore, TableOrder, move_element};
pub use pdf_reader::PdfGlyphSource;
pub use session::{ExtractionReport, ExtractionSession, PageFailure};
pub use transaction::{
    OutputField, ParsedTransaction, dedupe_transactions, extract_currency, extract_date,
    normalize_number, parse_row, transaction_key,
};
pub use warning::{ExtractWarning, WarningCode as ExtractWarningCode};

/// One-shot export of every selected page with the given guides.
pub fn extract_document<S: GlyphSource>(
    source: S,
    guides: DocumentGuides,
    options: &ExtractOptions,
) -> Result<(ExportTable, ExtractionReport), ExtractError> {
    ExtractionSession::new(source, options.clone())?
        .with_guides(guides)
        .export()
}

pub fn extract_pdf_to_csv(
    input_pdf: &Path,
    output_csv: &Path,
    guides: DocumentGuides,
    options: &ExtractOptions,
) -> Result<ExtractionReport, ExtractError> {
    let source = PdfGlyphSource::open(input_pdf)?;
    let (table, report) = extract_document(source, guides, options)?;
    write_csv(output_csv, &table, options.delimiter)?;
    Ok(report)
}

pub fn extract_pdf_bytes_to_csv_string(
    input_pdf: &[u8],
    guides: DocumentGuides,
    options: &ExtractOptions,
) -> Result<(String, ExtractionReport), ExtractError> {
    let source = PdfGlyphSource::from_bytes(input_pdf)?;
    let (table, report) = extract_document(source, guides, options)?;
    let csv = write_csv_to_string(&table, options.delimiter)?;
    Ok((csv, report))
}

/// Parses each non-blank line as one table row of statement text.
#[must_use]
pub fn parse_text_rows(text: &str, fields: &[OutputField], dedupe: bool) -> ExportTable {
    let transactions = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .flat_map(parse_row)
        .collect::<Vec<_>>();
    let transactions = if dedupe {
        dedupe_transactions(transactions)
    } else {
        transactions
    };
    transactions_to_table(&transactions, fields, 0)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{
        DocumentGuides, DumpPage, ExtractOptions, GlyphDump, OutputField, RawGlyph,
        extract_document, parse_text_rows,
    };

    fn word(text: &str, x: f64, baseline: f64) -> RawGlyph {
        RawGlyph {
            text: text.to_string(),
            transform: [10.0, 0.0, 0.0, 10.0, x, baseline],
            width: Some(30.0),
            height: Some(10.0),
        }
    }

    #[test]
    fn parses_text_lines_into_selected_fields() {
        let text = "17/02/2025 Coffee -4.00 96.00\n\n18/02/2025 Salary 1,000.00 1,096.00\n";
        let table = parse_text_rows(text, &[OutputField::Date, OutputField::Amount], false);
        assert_eq!(table.headers, vec!["Date", "Amount"]);
        assert_eq!(
            table.rows,
            vec![
                vec!["2025-02-17".to_string(), "-4.00".to_string()],
                vec!["2025-02-18".to_string(), "1000.00".to_string()],
            ]
        );
        assert_eq!(table.row_count, 2);
    }

    #[test]
    fn drops_page_and_table_columns() {
        let dump = GlyphDump {
            document: "dump".to_string(),
            pages: vec![DumpPage {
                page: 1,
                width: 400.0,
                height: 400.0,
                glyphs: vec![
                    word("Alpha", 50.0, 300.0),
                    word("Beta", 250.0, 300.0),
                    word("Gamma", 50.0, 250.0),
                    word("Delta", 250.0, 250.0),
                ],
            }],
        };
        let options = ExtractOptions {
            scale: 1.0,
            no_page: true,
            no_table: true,
            ..ExtractOptions::default()
        };

        let (table, report) =
            extract_document(dump, DocumentGuides::default(), &options).expect("export should run");
        assert_eq!(table.headers, vec!["col_1", "col_2"]);
        assert_eq!(table.rows[0], vec!["Alpha", "Beta"]);
        assert_eq!(report.table_count, 1);
    }
}
