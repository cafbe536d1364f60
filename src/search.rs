use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::builder::TypedValueParser;
use clap::{ArgAction, Args};

use crate::export::{Download, downloads};
use crate::grid::{
    Edit, ExportSource, GridSink, TerminalGrid, parse_cell_edit, parse_row_append, parse_row_drop,
};
use crate::pipeline::{self, CHUNK_SIZE, KEY_COLUMN, MatchStatus, PipelineConfig};
use crate::progress::{LogProgress, NoProgress, ProgressSink};
use crate::reader::Upload;

#[derive(Args, Debug)]
#[command(
    about = "Find the rows of a large file whose NIF appears in a reference file",
    long_about = r#"Read the NIFs of the reference file, scan the large file for rows with one of those NIFs (200,000 rows at a time for CSV input), and left-join the matches onto the reference rows. Both inputs may be .csv (comma, semicolon or tab separated, detected automatically) or .xlsx. The result is previewed in the terminal and written as resultado_NIF.csv (semicolon separated) and resultado_NIF.xlsx.

Examples:
  nifjoin search nifs.xlsx protocolos.csv
  nifjoin search nifs.csv protocolos.csv -o out --set '2:FECHA=2021-03-04' --drop-row 5
  nifjoin search nifs.csv protocolos.csv --export original"#
)]
pub struct SearchArgs {
    /// Reference file with the NIFs to look up (.csv or .xlsx)
    #[arg(value_name = "REFERENCE")]
    pub reference: PathBuf,

    /// Large file to search (.csv is read in chunks; .xlsx is read whole)
    #[arg(value_name = "LARGE")]
    pub large: PathBuf,

    /// Directory receiving resultado_NIF.csv and resultado_NIF.xlsx
    #[arg(short = 'o', long = "out-dir", value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// Rows read per chunk from a CSV large file
    #[arg(
        short = 'c',
        long = "chunk-size",
        value_name = "ROWS",
        default_value_t = CHUNK_SIZE,
        value_parser = clap::value_parser!(u64).range(1..).map(|v| v as usize)
    )]
    pub chunk_size: usize,

    /// Column holding the NIF in both files
    #[arg(short = 'k', long = "key", value_name = "COLUMN", default_value = KEY_COLUMN)]
    pub key: String,

    /// Reference columns kept in the result, comma-separated
    #[arg(long = "reference-fields", value_name = "COLS", default_value = "NIF,NOMBRE,EXPEDIENTE")]
    pub reference_fields: String,

    /// Large-file columns kept in the result, comma-separated
    #[arg(long = "large-fields", value_name = "COLS", default_value = "NIF,PROTOCOLO,FECHA")]
    pub large_fields: String,

    /// Number of result rows shown in the preview
    #[arg(short = 'n', long = "preview-rows", value_name = "N", default_value_t = 20)]
    pub preview_rows: usize,

    /// Do not print the result preview
    #[arg(long = "no-preview")]
    pub no_preview: bool,

    /// Edit a result cell before export (1-based row), e.g. `3:FECHA=2020-01-01`; repeatable
    #[arg(long = "set", value_name = "ROW:COLUMN=VALUE", action = ArgAction::Append)]
    pub set: Vec<String>,

    /// Remove a result row (1-based, as displayed) before export; repeatable
    #[arg(long = "drop-row", value_name = "ROW", action = ArgAction::Append)]
    pub drop_row: Vec<String>,

    /// Add a row to the result, one `;`-separated value per column; repeatable
    #[arg(long = "append-row", value_name = "VALUES", action = ArgAction::Append)]
    pub append_row: Vec<String>,

    /// Export the edited table or the table as joined
    #[arg(long = "export", value_name = "SOURCE", default_value_t = ExportSource::Edited)]
    pub export: ExportSource,

    /// Do not log progress while scanning the large file
    #[arg(short = 'q', long = "no-progress")]
    pub no_progress: bool,
}

impl SearchArgs {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let config = PipelineConfig {
            key: self.key.clone(),
            reference_columns: parse_field_list(&self.reference_fields)?,
            large_columns: parse_field_list(&self.large_fields)?,
            chunk_size: self.chunk_size,
            ..PipelineConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn edits(&self) -> Result<Vec<Edit>> {
        let mut edits = Vec::new();
        for spec in &self.set {
            edits.push(parse_cell_edit(spec)?);
        }
        for spec in &self.drop_row {
            edits.push(parse_row_drop(spec)?);
        }
        edits.extend(self.append_row.iter().map(|spec| parse_row_append(spec)));
        Ok(edits)
    }
}

pub fn run(args: SearchArgs) -> Result<()> {
    let config = args.pipeline_config()?;
    let edits = args.edits()?;

    let reference = Upload::from_path(&args.reference)
        .with_context(|| format!("failed to open reference file {}", args.reference.display()))?;
    let large = Upload::from_path(&args.large)
        .with_context(|| format!("failed to open large file {}", args.large.display()))?;

    let mut progress: Box<dyn ProgressSink> = if args.no_progress {
        Box::new(NoProgress)
    } else {
        Box::new(LogProgress::default())
    };
    let report = pipeline::run(reference, large, &config, progress.as_mut()).with_context(|| {
        format!(
            "failed matching {} against {}",
            args.reference.display(),
            args.large.display()
        )
    })?;

    let mut out = BufWriter::new(io::stdout().lock());
    writeln!(out, "NIFs to search: {}", report.key_count)?;

    match report.status() {
        MatchStatus::Empty => {
            writeln!(out, "No matches found.")?;
            out.flush()?;
            return Ok(());
        }
        MatchStatus::Unmatched => {
            writeln!(
                out,
                "No row of {} matched; reference rows are kept with empty values.",
                args.large.display()
            )?;
        }
        MatchStatus::Matched => {}
    }
    writeln!(
        out,
        "Resulting records: {} ({} matching rows in {} chunks)",
        report.table.height(),
        report.matched_rows,
        report.chunks
    )?;

    let preview = if args.no_preview {
        None
    } else {
        Some(args.preview_rows)
    };
    let edited = TerminalGrid::new(&mut out, preview, edits).present(&report.table)?;
    let exported = args.export.pick(&report.table, &edited);

    let files = downloads(exported)?;
    for path in write_downloads(&args.out_dir, &files)? {
        writeln!(out, "wrote {}", path.display())?;
    }
    out.flush()?;
    Ok(())
}

fn parse_field_list(spec: &str) -> Result<Vec<String>> {
    let fields: Vec<String> = spec
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    if fields.is_empty() {
        bail!("column list must not be empty");
    }
    Ok(fields)
}

fn write_downloads(dir: &Path, files: &[Download]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let path = dir.join(file.file_name);
        fs::write(&path, &file.bytes)
            .with_context(|| format!("failed writing {}", path.display()))?;
        log::info!(
            "{}: {} bytes ({})",
            path.display(),
            file.bytes.len(),
            file.mime_type
        );
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::export::{CSV_FILE_NAME, XLSX_FILE_NAME};

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: SearchArgs,
    }

    fn parse(extra: &[&str]) -> SearchArgs {
        let mut argv = vec!["nifjoin", "nifs.csv", "grande.csv"];
        argv.extend_from_slice(extra);
        TestCli::parse_from(argv).args
    }

    #[test]
    fn defaults_match_the_fixed_contract() {
        let args = parse(&[]);
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.key, "NIF");
        assert_eq!(config.reference_columns, ["NIF", "NOMBRE", "EXPEDIENTE"]);
        assert_eq!(config.large_columns, ["NIF", "PROTOCOLO", "FECHA"]);
        assert_eq!(config.chunk_size, 200_000);
        assert_eq!(args.export, ExportSource::Edited);
    }

    #[test]
    fn zero_chunk_size_is_refused_by_the_parser() {
        let argv = ["nifjoin", "a.csv", "b.csv", "--chunk-size", "0"];
        assert!(TestCli::try_parse_from(argv).is_err());
    }

    #[test]
    fn field_lists_must_contain_the_key() {
        let args = parse(&["--large-fields", "PROTOCOLO,FECHA"]);
        assert!(args.pipeline_config().is_err());
    }

    #[test]
    fn writes_both_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("nifs.csv");
        let large = dir.path().join("grande.csv");
        fs::write(&reference, "NIF;NOMBRE;EXPEDIENTE\nA1;X;E1\nB2;Y;E2\n").unwrap();
        fs::write(&large, "NIF,PROTOCOLO,FECHA\nA1,P1,2020-01-01\nC3,P3,2022-01-01\n").unwrap();
        let out_dir = dir.path().join("out");

        let argv = vec![
            "nifjoin".to_string(),
            reference.display().to_string(),
            large.display().to_string(),
            "--out-dir".to_string(),
            out_dir.display().to_string(),
            "--chunk-size".to_string(),
            "1".to_string(),
            "--set".to_string(),
            "2:PROTOCOLO=manual".to_string(),
            "--no-preview".to_string(),
            "--no-progress".to_string(),
        ];
        run(TestCli::parse_from(argv).args).unwrap();

        let csv = fs::read_to_string(out_dir.join(CSV_FILE_NAME)).unwrap();
        assert_eq!(
            csv,
            "NIF;NOMBRE;EXPEDIENTE;PROTOCOLO;FECHA\nA1;X;E1;P1;2020-01-01\nB2;Y;E2;manual;\n"
        );
        assert!(out_dir.join(XLSX_FILE_NAME).exists());
    }

    #[test]
    fn original_export_ignores_edits() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("nifs.csv");
        let large = dir.path().join("grande.csv");
        fs::write(&reference, "NIF,NOMBRE,EXPEDIENTE\nA1,X,E1\n").unwrap();
        fs::write(&large, "NIF,PROTOCOLO,FECHA\nA1,P1,2020\n").unwrap();

        let argv = vec![
            "nifjoin".to_string(),
            reference.display().to_string(),
            large.display().to_string(),
            "-o".to_string(),
            dir.path().display().to_string(),
            "--drop-row".to_string(),
            "1".to_string(),
            "--export".to_string(),
            "original".to_string(),
            "--no-preview".to_string(),
            "-q".to_string(),
        ];
        run(TestCli::parse_from(argv).args).unwrap();

        let csv = fs::read_to_string(dir.path().join(CSV_FILE_NAME)).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }
}
