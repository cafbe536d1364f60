use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

use calamine::{Data, ExcelDateTime, Reader, Xlsx};
use chrono::{Duration, NaiveTime};
use csv::{ReaderBuilder, StringRecord};

use crate::error::PipelineError;
use crate::table::{Table, text_cell};

/// Bytes inspected when guessing the delimiter of a text file.
const SNIFF_SAMPLE_BYTES: usize = 64 * 1024;
/// Candidates in tie-break order.
const CANDIDATE_DELIMITERS: [u8; 3] = [b',', b';', b'\t'];
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

type CellValue = Data;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Delimited,
    Spreadsheet,
}

impl SourceFormat {
    /// Infers the format from the declared file name.
    pub fn from_name(name: &str) -> Result<Self, PipelineError> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".xlsx") {
            Ok(SourceFormat::Spreadsheet)
        } else if lower.ends_with(".csv") {
            Ok(SourceFormat::Delimited)
        } else {
            Err(PipelineError::FileFormat {
                name: name.to_string(),
            })
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceFormat::Delimited => "csv",
            SourceFormat::Spreadsheet => "xlsx",
        }
    }
}

/// A named byte stream handed over by whoever collected the file.
pub struct Upload {
    name: String,
    reader: Box<dyn Read>,
}

impl Upload {
    pub fn new(name: impl Into<String>, reader: Box<dyn Read>) -> Self {
        Upload {
            name: name.into(),
            reader,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let file = File::open(path).map_err(|e| PipelineError::io(&name, e))?;
        Ok(Upload::new(name, Box::new(BufReader::new(file))))
    }

    #[cfg(test)]
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Upload::new(name, Box::new(Cursor::new(bytes)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> Result<SourceFormat, PipelineError> {
        SourceFormat::from_name(&self.name)
    }
}

/// Rows of one upload, either already materialized or still to be read in
/// bounded chunks.
pub enum Ingest {
    Whole(Table),
    Chunked(ChunkReader),
}

impl IntoIterator for Ingest {
    type Item = Result<Table, PipelineError>;
    type IntoIter = IngestIter;

    fn into_iter(self) -> IngestIter {
        match self {
            Ingest::Whole(table) => IngestIter::Whole(Some(table)),
            Ingest::Chunked(reader) => IngestIter::Chunked(reader),
        }
    }
}

pub enum IngestIter {
    Whole(Option<Table>),
    Chunked(ChunkReader),
}

impl Iterator for IngestIter {
    type Item = Result<Table, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            IngestIter::Whole(table) => table.take().map(Ok),
            IngestIter::Chunked(reader) => reader.next(),
        }
    }
}

/// Loads the whole upload into one table.
pub fn read_table(upload: Upload) -> Result<Table, PipelineError> {
    match upload.format()? {
        SourceFormat::Spreadsheet => read_spreadsheet(upload),
        SourceFormat::Delimited => {
            let mut reader = ChunkReader::new(upload, usize::MAX)?;
            match reader.next() {
                Some(chunk) => chunk,
                None => Ok(Table::new(reader.headers.clone())),
            }
        }
    }
}

/// Opens the upload for chunked reading. Spreadsheets cannot be streamed and
/// come back whole.
pub fn read_chunked(upload: Upload, chunk_size: usize) -> Result<Ingest, PipelineError> {
    if chunk_size == 0 {
        return Err(PipelineError::InvalidConfig(
            "chunk size must be at least 1".to_string(),
        ));
    }
    match upload.format()? {
        SourceFormat::Spreadsheet => Ok(Ingest::Whole(read_spreadsheet(upload)?)),
        SourceFormat::Delimited => Ok(Ingest::Chunked(ChunkReader::new(upload, chunk_size)?)),
    }
}

/// Lazily yields tables of at most `chunk_size` rows from delimited text.
/// At least one chunk is produced, even for a header-only file.
pub struct ChunkReader {
    source_name: String,
    reader: csv::Reader<Box<dyn Read>>,
    headers: Vec<String>,
    delimiter: u8,
    chunk_size: usize,
    record: StringRecord,
    emitted: usize,
    finished: bool,
}

impl ChunkReader {
    pub fn new(upload: Upload, chunk_size: usize) -> Result<Self, PipelineError> {
        let Upload { name, reader } = upload;
        let (delimiter, input) = sniff_input(&name, reader)?;
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(input);
        let headers = reader
            .headers()
            .map_err(|e| csv_error(&name, e))?
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        log::debug!(
            "{}: delimiter {:?}, {} columns",
            name,
            delimiter as char,
            headers.len()
        );
        Ok(ChunkReader {
            source_name: name,
            reader,
            headers,
            delimiter,
            chunk_size,
            record: StringRecord::new(),
            emitted: 0,
            finished: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Number of chunks handed out so far.
    pub fn chunks_read(&self) -> usize {
        self.emitted
    }

    fn read_chunk(&mut self) -> Result<Option<Table>, PipelineError> {
        let width = self.headers.len();
        let mut table = Table::new(self.headers.clone());
        while table.height() < self.chunk_size {
            let more = self
                .reader
                .read_record(&mut self.record)
                .map_err(|e| csv_error(&self.source_name, e))?;
            if !more {
                self.finished = true;
                break;
            }
            if self.record.len() > width {
                let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                return Err(PipelineError::parse(
                    &self.source_name,
                    format!(
                        "line {}: expected {} fields, found {}",
                        line,
                        width,
                        self.record.len()
                    ),
                ));
            }
            let mut row = Vec::with_capacity(width);
            row.extend(self.record.iter().map(text_cell));
            row.resize(width, None);
            table.push_row(row);
        }
        if table.is_empty() && self.emitted > 0 {
            return Ok(None);
        }
        Ok(Some(table))
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Table, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished && self.emitted > 0 {
            return None;
        }
        match self.read_chunk() {
            Ok(Some(table)) => {
                self.emitted += 1;
                Some(Ok(table))
            }
            Ok(None) => None,
            Err(err) => {
                self.finished = true;
                self.emitted = self.emitted.max(1);
                Some(Err(err))
            }
        }
    }
}

/// Reads a sample, detects the delimiter, and returns a reader that replays
/// the sample before the rest of the stream. A leading BOM is dropped.
fn sniff_input(
    name: &str,
    mut reader: Box<dyn Read>,
) -> Result<(u8, Box<dyn Read>), PipelineError> {
    let mut sample = Vec::with_capacity(SNIFF_SAMPLE_BYTES);
    reader
        .by_ref()
        .take(SNIFF_SAMPLE_BYTES as u64)
        .read_to_end(&mut sample)
        .map_err(|e| PipelineError::io(name, e))?;
    let truncated = sample.len() == SNIFF_SAMPLE_BYTES;
    if sample.starts_with(UTF8_BOM) {
        sample.drain(..UTF8_BOM.len());
    }
    if sample.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(PipelineError::parse(name, "file is empty"));
    }

    let probe = if truncated {
        match sample.iter().rposition(|&b| b == b'\n') {
            Some(end) => &sample[..end],
            None => &sample[..],
        }
    } else {
        &sample[..]
    };

    let delimiter = detect_delimiter(probe).ok_or_else(|| {
        PipelineError::parse(
            name,
            "could not detect the field delimiter (tried ',', ';' and tab)",
        )
    })?;
    let input: Box<dyn Read> = Box::new(Cursor::new(sample).chain(reader));
    Ok((delimiter, input))
}

/// Picks the candidate that splits the header into more than one field.
/// Among those, the one most sampled records fit wins (a record fits when it
/// is no wider than the header), then the widest header, then candidate
/// order. Short and over-long rows are left for the chunk reader to pad or
/// reject.
pub fn detect_delimiter(sample: &[u8]) -> Option<u8> {
    let mut best: Option<(u8, HeaderFit)> = None;
    for &candidate in &CANDIDATE_DELIMITERS {
        if let Some(fit) = header_fit(sample, candidate) {
            if best.is_none_or(|(_, current)| fit > current) {
                best = Some((candidate, fit));
            }
        }
    }
    best.map(|(delimiter, _)| delimiter)
}

/// Ordered by fitting records first, then header width.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct HeaderFit {
    fitting: usize,
    width: usize,
}

fn header_fit(sample: &[u8], delimiter: u8) -> Option<HeaderFit> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(sample);
    let mut records = reader.byte_records();
    let width = records.next()?.ok()?.len();
    if width < 2 {
        return None;
    }
    let mut fitting = 0;
    for record in records {
        if record.ok()?.len() <= width {
            fitting += 1;
        }
    }
    Some(HeaderFit { fitting, width })
}

fn csv_error(source_name: &str, err: csv::Error) -> PipelineError {
    match err.into_kind() {
        csv::ErrorKind::Io(io_err) => PipelineError::io(source_name, io_err),
        csv::ErrorKind::Utf8 { pos, err } => PipelineError::parse(
            source_name,
            format!(
                "invalid UTF-8 on line {}: {}",
                pos.map(|p| p.line()).unwrap_or(0),
                err
            ),
        ),
        other => PipelineError::parse(source_name, format!("{:?}", other)),
    }
}

fn read_spreadsheet(upload: Upload) -> Result<Table, PipelineError> {
    let Upload { name, mut reader } = upload;
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| PipelineError::io(&name, e))?;
    let mut workbook = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| PipelineError::parse(&name, format!("failed to open workbook: {}", e)))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| PipelineError::parse(&name, "workbook contains no sheets"))?;
    let range = workbook.worksheet_range(&sheet).map_err(|e| {
        PipelineError::parse(&name, format!("failed loading sheet '{}': {}", sheet, e))
    })?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .ok_or_else(|| PipelineError::parse(&name, format!("sheet '{}' is empty", sheet)))?
        .iter()
        .map(|cell| render_cell(cell))
        .collect::<Vec<_>>();
    let mut table = Table::new(headers);
    for row in rows {
        table.push_row(row.iter().map(|cell| text_cell(&render_cell(cell))).collect());
    }
    log::debug!(
        "{}: sheet '{}' with {} rows",
        name,
        sheet,
        table.height()
    );
    Ok(table)
}

fn render_cell(value: &CellValue) -> String {
    match value {
        CellValue::Empty => String::new(),
        CellValue::String(s) => s.clone(),
        CellValue::Float(f) => format_float(*f),
        CellValue::Int(i) => i.to_string(),
        CellValue::Bool(b) => b.to_string(),
        CellValue::DateTime(dt) => render_datetime(dt),
        CellValue::DateTimeIso(s) => s.clone(),
        CellValue::DurationIso(s) => s.clone(),
        CellValue::Error(err) => format!("#ERROR:{:?}", err),
    }
}

fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

fn render_datetime(dt: &ExcelDateTime) -> String {
    if dt.is_duration() {
        return match dt.as_duration() {
            Some(duration) => format_duration(duration),
            None => format_float(dt.as_f64()),
        };
    }
    match dt.as_datetime() {
        Some(datetime) if datetime.time() == NaiveTime::MIN => datetime.date().to_string(),
        Some(datetime) => datetime.to_string(),
        None => format_float(dt.as_f64()),
    }
}

fn format_duration(duration: Duration) -> String {
    let total_millis = duration.num_milliseconds();
    let sign = if total_millis < 0 { "-" } else { "" };
    let mut millis = total_millis.abs();
    let hours = millis / 3_600_000;
    millis %= 3_600_000;
    let minutes = millis / 60_000;
    millis %= 60_000;
    let seconds = millis / 1_000;
    let remainder = millis % 1_000;
    if remainder > 0 {
        format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{remainder:03}")
    } else {
        format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::table_of;

    fn csv_upload(text: &str) -> Upload {
        Upload::from_bytes("datos.csv", text.as_bytes().to_vec())
    }

    #[test]
    fn format_is_inferred_from_extension() {
        assert_eq!(SourceFormat::from_name("A.XLSX").unwrap(), SourceFormat::Spreadsheet);
        assert_eq!(SourceFormat::from_name("nifs.csv").unwrap(), SourceFormat::Delimited);
        assert!(matches!(
            SourceFormat::from_name("nifs.txt"),
            Err(PipelineError::FileFormat { .. })
        ));
    }

    #[test]
    fn detects_each_supported_delimiter() {
        assert_eq!(detect_delimiter(b"a,b\n1,2\n"), Some(b','));
        assert_eq!(detect_delimiter(b"a;b\n1;2\n"), Some(b';'));
        assert_eq!(detect_delimiter(b"a\tb\n1\t2\n"), Some(b'\t'));
    }

    #[test]
    fn semicolon_wins_over_decimal_commas() {
        let sample = b"NIF;IMPORTE\nA1;1,5\nB2;2,75\n";
        assert_eq!(detect_delimiter(sample), Some(b';'));
    }

    #[test]
    fn quoted_delimiters_do_not_confuse_detection() {
        let sample = b"NIF,NOMBRE\nA1,\"Garcia; Juan\"\nB2,\"Lopez; Ana\"\n";
        assert_eq!(detect_delimiter(sample), Some(b','));
    }

    #[test]
    fn ragged_rows_do_not_defeat_detection() {
        assert_eq!(detect_delimiter(b"NIF;NOMBRE;EXPEDIENTE\nA1;X;E1\nB2;Y\n"), Some(b';'));
        assert_eq!(detect_delimiter(b"a,b\n1,2\n3,4,5\n"), Some(b','));
    }

    #[test]
    fn delimiter_fitting_more_records_wins() {
        // Both split the header in two; ',' splits the data rows in three.
        let sample = b"NIF;NOMBRE,APELLIDO\nA1;Garcia,Juan,Luis\nB2;Lopez,Ana,Maria\n";
        assert_eq!(detect_delimiter(sample), Some(b';'));
    }

    #[test]
    fn reference_with_missing_trailing_field_is_padded() {
        let table = read_table(csv_upload("NIF;NOMBRE;EXPEDIENTE\nA1;X;E1\nB2;Y\n")).unwrap();
        assert_eq!(
            table,
            table_of(&["NIF", "NOMBRE", "EXPEDIENTE"], &[["A1", "X", "E1"], ["B2", "Y", ""]])
        );
    }

    #[test]
    fn single_column_text_is_a_parse_error() {
        let err = read_table(csv_upload("NIF\nA1\nB2\n")).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn empty_file_is_a_parse_error() {
        let err = read_table(csv_upload("")).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn values_stay_text_and_blanks_become_null() {
        let table = read_table(csv_upload("NIF;CODIGO\n00123;\nB2;1.50\n")).unwrap();
        assert_eq!(table, table_of(&["NIF", "CODIGO"], &[["00123", ""], ["B2", "1.50"]]));
    }

    #[test]
    fn byte_order_mark_is_stripped_from_header() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"NIF,NOMBRE\nA1,X\n");
        let table = read_table(Upload::from_bytes("r.csv", bytes)).unwrap();
        assert_eq!(table.headers(), ["NIF", "NOMBRE"]);
    }

    #[test]
    fn short_rows_are_padded_and_long_rows_fail() {
        let table = read_table(csv_upload("a,b,c\n1,2,3\n4,5\n")).unwrap();
        assert_eq!(table.row(1), vec![Some("4"), Some("5"), None]);

        let err = read_table(csv_upload("a,b\n1,2\n3,4,5\n")).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn chunks_are_bounded_and_ordered() {
        let text = "k,v\n1,a\n2,b\n3,c\n4,d\n5,e\n";
        let chunks = read_chunked(csv_upload(text), 2)
            .unwrap()
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let heights: Vec<usize> = chunks.iter().map(|c| c.height()).collect();
        assert_eq!(heights, vec![2, 2, 1]);
        assert_eq!(chunks[2].cell(0, 0), Some("5"));
    }

    #[test]
    fn exact_multiple_does_not_emit_trailing_empty_chunk() {
        let chunks = read_chunked(csv_upload("k,v\n1,a\n2,b\n"), 2)
            .unwrap()
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn header_only_file_yields_one_empty_chunk() {
        let chunks = read_chunked(csv_upload("NIF,PROTOCOLO\n"), 10)
            .unwrap()
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
        assert_eq!(chunks[0].headers(), ["NIF", "PROTOCOLO"]);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = read_chunked(csv_upload("a,b\n1,2\n"), 0).err().unwrap();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn parse_failure_stops_the_chunk_sequence() {
        let text = "a,b\n1,2\n3,4,5\n6,7\n";
        let mut chunks = read_chunked(csv_upload(text), 1).unwrap().into_iter();
        assert!(chunks.next().unwrap().is_ok());
        assert!(chunks.next().unwrap().is_err());
        assert!(chunks.next().is_none());
    }

    #[test]
    fn spreadsheet_cells_are_rendered_as_text() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "NIF").unwrap();
        sheet.write_string(0, 1, "IMPORTE").unwrap();
        sheet.write_string(0, 2, "ACTIVO").unwrap();
        sheet.write_number(1, 0, 12345.0).unwrap();
        sheet.write_number(1, 1, 2.5).unwrap();
        sheet.write_boolean(1, 2, true).unwrap();
        sheet.write_string(2, 0, "B2").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let table = read_table(Upload::from_bytes("libro.xlsx", bytes)).unwrap();
        assert_eq!(
            table,
            table_of(
                &["NIF", "IMPORTE", "ACTIVO"],
                &[["12345", "2.5", "true"], ["B2", "", ""]]
            )
        );
    }

    #[test]
    fn spreadsheet_ingest_is_a_single_chunk() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "NIF").unwrap();
        sheet.write_string(1, 0, "A1").unwrap();
        sheet.write_string(2, 0, "B2").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let ingest = read_chunked(Upload::from_bytes("grande.xlsx", bytes), 1).unwrap();
        assert!(matches!(ingest, Ingest::Whole(_)));
        assert_eq!(ingest.into_iter().count(), 1);
    }

    #[test]
    fn corrupt_spreadsheet_is_a_parse_error() {
        let err = read_table(Upload::from_bytes("roto.xlsx", b"not a zip".to_vec())).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }
}
