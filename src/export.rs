use crate::model::{CellMatrix, DocumentGuides};
use crate::transaction::{OutputField, ParsedTransaction, dedupe_transactions, parse_row};

/// Flat rows ready for the CSV writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub table_count: usize,
    pub row_count: usize,
}

/// One table's cells after the user ordering was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedTable {
    pub page: u32,
    pub table_id: usize,
    pub cells: CellMatrix,
}

fn pad_rows(rows: &[Vec<String>], width: usize) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| {
            let mut padded = row.clone();
            padded.resize(width.max(row.len()), String::new());
            padded
        })
        .collect()
}

/// `page, table_id, col_1..col_n` with n the widest table; narrower rows
/// are padded with empty cells.
#[must_use]
pub fn merge_raw(tables: &[OrderedTable]) -> ExportTable {
    let width = tables
        .iter()
        .flat_map(|table| table.cells.iter().map(Vec::len))
        .max()
        .unwrap_or(0);

    let mut headers = vec!["page".to_string(), "table_id".to_string()];
    headers.extend((1..=width).map(|index| format!("col_{index}")));

    let mut rows = Vec::new();
    for table in tables {
        for cells in pad_rows(&table.cells, width) {
            let mut row = Vec::with_capacity(width + 2);
            row.push(table.page.to_string());
            row.push(table.table_id.to_string());
            row.extend(cells);
            rows.push(row);
        }
    }

    ExportTable {
        headers,
        row_count: rows.len(),
        table_count: tables.len(),
        rows,
    }
}

/// Drops the `page` and/or `table_id` columns.
#[must_use]
pub fn apply_column_filters(merged: ExportTable, no_page: bool, no_table: bool) -> ExportTable {
    if !no_page && !no_table {
        return merged;
    }

    let keep = merged
        .headers
        .iter()
        .enumerate()
        .filter(|(_, header)| {
            !((no_page && *header == "page") || (no_table && *header == "table_id"))
        })
        .map(|(index, _)| index)
        .collect::<Vec<_>>();

    ExportTable {
        headers: keep.iter().map(|&index| merged.headers[index].clone()).collect(),
        rows: merged
            .rows
            .iter()
            .map(|row| keep.iter().filter_map(|&index| row.get(index).cloned()).collect())
            .collect(),
        row_count: merged.row_count,
        table_count: merged.table_count,
    }
}

/// Non-empty cells of a row joined by single spaces.
#[must_use]
pub fn row_text(row: &[String]) -> String {
    row.iter()
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses every ordered row into transactions tagged with their page.
#[must_use]
pub fn structured_transactions(tables: &[OrderedTable], dedupe: bool) -> Vec<ParsedTransaction> {
    let transactions = tables
        .iter()
        .flat_map(|table| {
            table.cells.iter().flat_map(move |row| {
                parse_row(&row_text(row)).into_iter().map(move |mut transaction| {
                    transaction.source_page = Some(table.page);
                    transaction
                })
            })
        })
        .collect::<Vec<_>>();
    if dedupe {
        dedupe_transactions(transactions)
    } else {
        transactions
    }
}

/// One column per selected field, in canonical field order.
#[must_use]
pub fn transactions_to_table(
    transactions: &[ParsedTransaction],
    fields: &[OutputField],
    table_count: usize,
) -> ExportTable {
    let mut fields = fields.to_vec();
    fields.sort_unstable();
    fields.dedup();

    let rows = transactions
        .iter()
        .map(|transaction| fields.iter().map(|field| field.value(transaction)).collect())
        .collect::<Vec<Vec<String>>>();
    ExportTable {
        headers: fields.iter().map(|field| field.label().to_string()).collect(),
        row_count: rows.len(),
        table_count,
        rows,
    }
}

/// Every persisted guide as `document,page,type,x,y,w,h` with normalized
/// coordinates.
#[must_use]
pub fn guides_to_rows(document: &str, guides: &DocumentGuides) -> ExportTable {
    let headers = ["document", "page", "type", "x", "y", "w", "h"]
        .map(str::to_string)
        .to_vec();
    let rows = guides
        .pages
        .iter()
        .flat_map(|(page, page_guides)| {
            page_guides.selections.iter().map(move |selection| {
                let rect = selection.rect.normalized();
                vec![
                    document.to_string(),
                    page.to_string(),
                    selection.kind.as_str().to_string(),
                    format!("{:.6}", rect.x),
                    format!("{:.6}", rect.y),
                    format!("{:.6}", rect.width),
                    format!("{:.6}", rect.height),
                ]
            })
        })
        .collect::<Vec<_>>();
    ExportTable {
        headers,
        row_count: rows.len(),
        table_count: guides.pages.len(),
        rows,
    }
}
