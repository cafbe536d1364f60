use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use clap::builder::TypedValueParser;

use crate::pipeline::CHUNK_SIZE;
use crate::reader::{ChunkReader, SourceFormat, Upload, read_table};
use crate::table::Table;

#[derive(Args, Debug)]
#[command(
    about = "Show the shape, columns and sample values of an input file",
    long_about = r#"Read a .csv or .xlsx file the same way `search` does and report what was understood: the format, the detected delimiter for CSV input, #shape(rows, cols), and a TSV summary listing each column's index, name, inferred type (num/date/str), non-empty count, and the first N values (default 3). Useful for checking that the NIF, NOMBRE, EXPEDIENTE, PROTOCOLO and FECHA columns are present before a long search."#
)]
pub struct InspectArgs {
    /// Input file (.csv or .xlsx)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Number of sample values to include in the preview column
    #[arg(short = 'n', long = "preview", value_name = "N", default_value_t = 3)]
    pub preview: usize,

    /// Rows read per chunk from CSV input
    #[arg(
        short = 'c',
        long = "chunk-size",
        value_name = "ROWS",
        default_value_t = CHUNK_SIZE,
        value_parser = clap::value_parser!(u64).range(1..).map(|v| v as usize)
    )]
    pub chunk_size: usize,
}

pub fn run(args: InspectArgs) -> Result<()> {
    let mut writer = BufWriter::new(io::stdout().lock());
    inspect_into(&args, &mut writer)?;
    writer.flush()?;
    Ok(())
}

fn inspect_into<W: Write>(args: &InspectArgs, writer: &mut W) -> Result<()> {
    let upload = Upload::from_path(&args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;
    let format = upload.format()?;

    writeln!(writer, "#format({})", format.label())?;

    let inspection = match format {
        SourceFormat::Delimited => {
            let mut reader = ChunkReader::new(upload, args.chunk_size)?;
            writeln!(
                writer,
                "#delimiter({})",
                describe_delimiter(reader.delimiter())
            )?;
            let mut inspection = Inspection::new(reader.headers(), args.preview);
            for chunk in reader.by_ref() {
                let chunk = chunk.with_context(|| format!("failed reading {}", args.file.display()))?;
                inspection.absorb(&chunk);
            }
            log::debug!("{}: {} chunks", args.file.display(), reader.chunks_read());
            inspection
        }
        SourceFormat::Spreadsheet => {
            let table = read_table(upload)
                .with_context(|| format!("failed reading {}", args.file.display()))?;
            let mut inspection = Inspection::new(table.headers(), args.preview);
            inspection.absorb(&table);
            inspection
        }
    };

    inspection.write(writer)?;
    Ok(())
}

fn describe_delimiter(delimiter: u8) -> String {
    match delimiter {
        b'\t' => "tab".to_string(),
        other => (other as char).to_string(),
    }
}

struct Inspection {
    names: Vec<String>,
    summaries: Vec<ColumnSummary>,
    preview_limit: usize,
    rows: usize,
}

impl Inspection {
    fn new(headers: &[String], preview_limit: usize) -> Self {
        Inspection {
            names: headers.to_vec(),
            summaries: headers
                .iter()
                .map(|_| ColumnSummary::new(preview_limit))
                .collect(),
            preview_limit,
            rows: 0,
        }
    }

    fn absorb(&mut self, table: &Table) {
        for (idx, summary) in self.summaries.iter_mut().enumerate() {
            for row in 0..table.height() {
                summary.update(table.cell(row, idx));
            }
        }
        self.rows += table.height();
    }

    fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "#shape({}, {})", self.rows, self.names.len())?;
        writeln!(
            writer,
            "index\tname\ttype\tnon_empty\tfirst{}",
            self.preview_limit
        )?;
        for (idx, (name, summary)) in self.names.iter().zip(&self.summaries).enumerate() {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}",
                idx + 1,
                name,
                summary.kind.label(),
                summary.non_empty,
                summary.preview_string()
            )?;
        }
        Ok(())
    }
}

struct ColumnSummary {
    preview_limit: usize,
    previews: Vec<String>,
    non_empty: usize,
    kind: ColumnKind,
}

impl ColumnSummary {
    fn new(preview_limit: usize) -> Self {
        ColumnSummary {
            preview_limit,
            previews: Vec::new(),
            non_empty: 0,
            kind: ColumnKind::Unknown,
        }
    }

    fn update(&mut self, value: Option<&str>) {
        if self.previews.len() < self.preview_limit {
            self.previews.push(value.unwrap_or("").to_string());
        }
        if let Some(value) = value {
            self.non_empty += 1;
            self.kind.observe(value);
        }
    }

    fn preview_string(&self) -> String {
        format!("[{}]", self.previews.join(", "))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ColumnKind {
    Unknown,
    Numeric,
    Date,
    Text,
}

impl ColumnKind {
    fn observe(&mut self, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return;
        }
        let seen = if trimmed.parse::<f64>().is_ok() {
            ColumnKind::Numeric
        } else if is_date(trimmed) {
            ColumnKind::Date
        } else {
            ColumnKind::Text
        };
        *self = match (*self, seen) {
            (ColumnKind::Unknown, seen) => seen,
            (current, seen) if current == seen => current,
            _ => ColumnKind::Text,
        };
    }

    fn label(self) -> &'static str {
        match self {
            ColumnKind::Numeric => "num",
            ColumnKind::Date => "date",
            ColumnKind::Unknown | ColumnKind::Text => "str",
        }
    }
}

fn is_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || NaiveDate::parse_from_str(value, "%d/%m/%Y").is_ok()
        || value
            .split_once('T')
            .is_some_and(|(date, _)| NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok())
}
