mod common;

use std::str::FromStr;

use glyph_grid::{
    DocumentGuides, ExtractOptions, ExtractionSession, GlyphDump, OutputField, PageGuides,
    PageSelection, Rect, Selection, SelectionKind, extract_document, extract_pdf_to_csv,
    extract_pdf_bytes_to_csv_string,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use common::word;

fn two_by_two() -> Vec<common::Word<'static>> {
    vec![
        word("Alpha", 50, 700),
        word("Bravo", 300, 700),
        word("Gamma", 50, 680),
        word("Delta", 300, 680),
    ]
}

fn dump(json: &str) -> GlyphDump {
    serde_json::from_str(json).expect("glyph dump should deserialize")
}

#[test]
fn extracts_unguided_pdf_page_with_smart_mode() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("grid.pdf");
    let output = dir.path().join("grid.csv");
    common::create_test_pdf(&input, &[two_by_two()]).expect("PDF fixture should be created");

    let report = extract_pdf_to_csv(
        &input,
        &output,
        DocumentGuides::default(),
        &ExtractOptions::default(),
    )
    .expect("extraction should succeed");

    let csv = std::fs::read_to_string(&output).expect("CSV should be readable");
    assert_eq!(
        csv, "page,table_id,col_1,col_2\n1,1,Alpha,Bravo\n1,1,Gamma,Delta\n",
        "report: {report:?}"
    );
    assert_eq!(report.table_count, 1);
    assert_eq!(report.row_count, 2);
    assert!(report.page_failures.is_empty());
}

#[test]
fn page_selection_skips_other_pages() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("pages.pdf");
    common::create_test_pdf(&input, &[two_by_two(), two_by_two()])
        .expect("PDF fixture should be created");
    let bytes = std::fs::read(&input).expect("PDF should be readable");

    let options = ExtractOptions {
        pages: Some(PageSelection::from_str("2").expect("selection should parse")),
        ..ExtractOptions::default()
    };
    let (csv, report) = extract_pdf_bytes_to_csv_string(&bytes, DocumentGuides::default(), &options)
        .expect("extraction should succeed");

    assert_eq!(report.row_count, 2);
    assert!(csv.lines().skip(1).all(|line| line.starts_with("2,1,")), "csv: {csv:?}");
}

#[test]
fn drawn_table_with_column_guides_infers_rows() {
    let json = common::glyph_dump_json(
        "guided",
        &[(
            1,
            vec![
                ("Alpha", 50.0, 300.0, 30.0),
                ("Beta", 250.0, 300.0, 30.0),
                ("Gamma", 50.0, 250.0, 30.0),
                ("Delta", 250.0, 250.0, 30.0),
            ],
        )],
    );

    let mut guides = DocumentGuides::default();
    guides.pages.insert(
        1,
        PageGuides {
            selections: vec![
                Selection::new(SelectionKind::Table, Rect::new(0.1, 0.2, 0.65, 0.2)),
                Selection::new(SelectionKind::Column, Rect::new(0.1, 0.2, 0.275, 0.2)),
                Selection::new(SelectionKind::Column, Rect::new(0.375, 0.2, 0.375, 0.2)),
            ],
            links: Vec::new(),
        },
    );
    let options = ExtractOptions {
        scale: 1.0,
        ..ExtractOptions::default()
    };

    let mut session = ExtractionSession::new(dump(&json), options)
        .expect("options should be valid")
        .with_guides(guides);
    let assembly = session.page_assembly(1).expect("page should assemble").clone();
    assert_eq!(assembly.tables.len(), 1);
    assert!(assembly.tables[0].inferred_rows);
    assert!(!assembly.tables[0].inferred_cols);
    assert!(assembly.loose.is_empty());

    let cells = session.cell_matrices(1).expect("cells should collect");
    assert_eq!(
        cells[0],
        vec![vec!["Alpha", "Beta"], vec!["Gamma", "Delta"]]
    );
}

#[test]
fn structured_export_parses_statement_rows() {
    let json = common::glyph_dump_json(
        "statement",
        &[(
            1,
            vec![
                ("17/02/2025", 20.0, 300.0, 80.0),
                ("Coffee", 150.0, 300.0, 50.0),
                ("-4.00", 260.0, 300.0, 40.0),
                ("96.00", 330.0, 300.0, 50.0),
                ("18/02/2025", 20.0, 270.0, 80.0),
                ("Salary", 150.0, 270.0, 50.0),
                ("1,000.00", 250.0, 270.0, 60.0),
                ("1,096.00", 330.0, 270.0, 60.0),
            ],
        )],
    );
    let options = ExtractOptions {
        scale: 1.0,
        structured: true,
        fields: vec![
            OutputField::Date,
            OutputField::Description,
            OutputField::Credit,
            OutputField::Debit,
            OutputField::Balance,
        ],
        ..ExtractOptions::default()
    };

    let (table, report) = extract_document(dump(&json), DocumentGuides::default(), &options)
        .expect("export should succeed");

    assert_eq!(
        table.headers,
        vec!["Date", "Description", "Credit", "Debit", "Balance"]
    );
    assert_eq!(
        table.rows,
        vec![
            vec!["2025-02-17", "Coffee -4.00", "", "4.00", "96.00"],
            vec!["2025-02-18", "Salary 1,000.00", "1000.00", "", "1096.00"],
        ]
    );
    assert_eq!(report.row_count, 2);
}
