use std::io::Write;
use std::path::Path;

use csv::{Writer, WriterBuilder};

use crate::error::ExtractError;
use crate::export::ExportTable;

fn write_records<W: Write>(writer: &mut Writer<W>, table: &ExportTable) -> Result<(), ExtractError> {
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_csv(path: &Path, table: &ExportTable, delimiter: u8) -> Result<(), ExtractError> {
    let mut writer = WriterBuilder::new().delimiter(delimiter).from_path(path)?;
    write_records(&mut writer, table)
}

pub fn write_csv_to_string(table: &ExportTable, delimiter: u8) -> Result<String, ExtractError> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::<u8>::new());
    write_records(&mut writer, table)?;

    let bytes = writer
        .into_inner()
        .map_err(|error| ExtractError::Csv(error.into_error().into()))?;
    String::from_utf8(bytes)
        .map_err(|error| ExtractError::InvalidOption(format!("invalid utf-8 csv output: {error}")))
}

#[cfg(test)]
mod tests {
    use super::write_csv_to_string;
    use crate::export::ExportTable;

    #[test]
    fn quotes_cells_containing_the_delimiter() {
        let table = ExportTable {
            headers: vec!["Date".to_string(), "Description".to_string()],
            rows: vec![vec!["2025-02-17".to_string(), "Coffee; cake".to_string()]],
            table_count: 1,
            row_count: 1,
        };
        let csv = write_csv_to_string(&table, b';').expect("csv should render");
        assert_eq!(csv, "Date;Description\n2025-02-17;\"Coffee; cake\"\n");
    }
}
