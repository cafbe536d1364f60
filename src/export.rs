use csv::WriterBuilder;
use rust_xlsxwriter::{Workbook, XlsxError};

use crate::error::PipelineError;
use crate::table::Table;

pub const CSV_FILE_NAME: &str = "resultado_NIF.csv";
pub const XLSX_FILE_NAME: &str = "resultado_NIF.xlsx";
pub const CSV_MIME: &str = "text/csv";
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const SHEET_NAME: &str = "Resultado";
const CSV_DELIMITER: u8 = b';';

/// One file offered to the user for download.
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: &'static str,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

pub fn downloads(table: &Table) -> Result<Vec<Download>, PipelineError> {
    Ok(vec![
        Download {
            file_name: CSV_FILE_NAME,
            mime_type: CSV_MIME,
            bytes: to_csv(table)?,
        },
        Download {
            file_name: XLSX_FILE_NAME,
            mime_type: XLSX_MIME,
            bytes: to_xlsx(table)?,
        },
    ])
}

/// Semicolon-separated UTF-8 text with a header row. Nulls become empty
/// fields.
pub fn to_csv(table: &Table) -> Result<Vec<u8>, PipelineError> {
    let mut writer = WriterBuilder::new()
        .delimiter(CSV_DELIMITER)
        .from_writer(Vec::new());
    writer.write_record(table.headers()).map_err(csv_error)?;
    for row in table.rows() {
        writer
            .write_record(row.iter().map(|v| v.unwrap_or("")))
            .map_err(csv_error)?;
    }
    writer
        .into_inner()
        .map_err(|e| serialization_error("csv", e.error()))
}

/// Single-sheet workbook; every value is written as a string so identifiers
/// keep their leading zeros.
pub fn to_xlsx(table: &Table) -> Result<Vec<u8>, PipelineError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME).map_err(xlsx_error)?;

    for (col, header) in table.headers().iter().enumerate() {
        worksheet
            .write_string(0, column_number(col)?, header)
            .map_err(xlsx_error)?;
    }
    for (row_idx, row) in table.rows().enumerate() {
        let row_number = u32::try_from(row_idx + 1).map_err(|_| {
            serialization_error("xlsx", format!("row {} exceeds the sheet limit", row_idx + 1))
        })?;
        for (col, value) in row.iter().enumerate() {
            if let Some(value) = value {
                worksheet
                    .write_string(row_number, column_number(col)?, *value)
                    .map_err(xlsx_error)?;
            }
        }
    }

    workbook.save_to_buffer().map_err(xlsx_error)
}

fn column_number(col: usize) -> Result<u16, PipelineError> {
    u16::try_from(col)
        .map_err(|_| serialization_error("xlsx", format!("column {} exceeds the sheet limit", col + 1)))
}

fn serialization_error(format: &'static str, message: impl ToString) -> PipelineError {
    PipelineError::Serialization {
        format,
        message: message.to_string(),
    }
}

fn csv_error(err: csv::Error) -> PipelineError {
    serialization_error("csv", err)
}

fn xlsx_error(err: XlsxError) -> PipelineError {
    serialization_error("xlsx", err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{Upload, read_table};
    use crate::table::table_of;

    fn result_table() -> Table {
        table_of(
            &["NIF", "NOMBRE", "EXPEDIENTE", "PROTOCOLO", "FECHA"],
            &[
                ["A1", "García, Ana", "E1", "P1", "2020-01-01"],
                ["00B2", "Ñandú \"x\"", "E2", "", ""],
            ],
        )
    }

    #[test]
    fn csv_uses_semicolons_and_no_index() {
        let bytes = to_csv(&result_table()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("NIF;NOMBRE;EXPEDIENTE;PROTOCOLO;FECHA"));
        assert_eq!(lines.next(), Some("A1;García, Ana;E1;P1;2020-01-01"));
        assert_eq!(lines.next(), Some("00B2;\"Ñandú \"\"x\"\"\";E2;;"));
    }

    #[test]
    fn csv_round_trips_through_the_reader() {
        let table = result_table();
        let bytes = to_csv(&table).unwrap();
        let back = read_table(Upload::from_bytes(CSV_FILE_NAME, bytes)).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn xlsx_round_trips_through_the_reader() {
        let table = result_table();
        let bytes = to_xlsx(&table).unwrap();
        let back = read_table(Upload::from_bytes(XLSX_FILE_NAME, bytes)).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn xlsx_uses_the_result_sheet() {
        use calamine::{Reader, Xlsx};
        use std::io::Cursor;

        let bytes = to_xlsx(&result_table()).unwrap();
        let workbook = Xlsx::new(Cursor::new(bytes)).unwrap();
        assert_eq!(workbook.sheet_names(), vec![SHEET_NAME.to_string()]);
    }

    #[test]
    fn downloads_carry_names_and_mime_types() {
        let files = downloads(&result_table()).unwrap();
        let names: Vec<_> = files.iter().map(|d| (d.file_name, d.mime_type)).collect();
        assert_eq!(
            names,
            vec![(CSV_FILE_NAME, CSV_MIME), (XLSX_FILE_NAME, XLSX_MIME)]
        );
        assert!(files.iter().all(|d| !d.bytes.is_empty()));
    }
}
