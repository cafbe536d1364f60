use crate::error::PipelineError;
use crate::filter::ChunkedFilter;
use crate::join::assemble;
use crate::keys::KeySet;
use crate::progress::{ProgressSink, capped_estimate};
use crate::reader::{Ingest, Upload, read_chunked, read_table};
use crate::table::Table;

pub const KEY_COLUMN: &str = "NIF";
pub const REFERENCE_COLUMNS: [&str; 3] = ["NIF", "NOMBRE", "EXPEDIENTE"];
pub const LARGE_COLUMNS: [&str; 3] = ["NIF", "PROTOCOLO", "FECHA"];
pub const CHUNK_SIZE: usize = 200_000;
/// Denominator used for progress while the number of chunks is unknown.
pub const ASSUMED_CHUNK_COUNT: usize = 50;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub key: String,
    pub reference_columns: Vec<String>,
    pub large_columns: Vec<String>,
    pub chunk_size: usize,
    pub assumed_chunk_count: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            key: KEY_COLUMN.to_string(),
            reference_columns: REFERENCE_COLUMNS.iter().map(|s| s.to_string()).collect(),
            large_columns: LARGE_COLUMNS.iter().map(|s| s.to_string()).collect(),
            chunk_size: CHUNK_SIZE,
            assumed_chunk_count: ASSUMED_CHUNK_COUNT,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "chunk size must be at least 1".to_string(),
            ));
        }
        if self.assumed_chunk_count == 0 {
            return Err(PipelineError::InvalidConfig(
                "assumed chunk count must be at least 1".to_string(),
            ));
        }
        for (label, columns) in [
            ("reference", &self.reference_columns),
            ("large", &self.large_columns),
        ] {
            if !columns.contains(&self.key) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} columns [{}] must include the key '{}'",
                    label,
                    columns.join(", "),
                    self.key
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    /// At least one reference row found a match.
    Matched,
    /// Rows exist, none of them matched.
    Unmatched,
    /// The result has no rows at all.
    Empty,
}

#[derive(Debug, Clone)]
pub struct MatchReport {
    pub table: Table,
    /// Distinct non-empty keys searched for.
    pub key_count: usize,
    /// Rows of the large file that matched a key.
    pub matched_rows: usize,
    /// Chunks read from the large file.
    pub chunks: usize,
}

impl MatchReport {
    pub fn status(&self) -> MatchStatus {
        if self.table.is_empty() {
            MatchStatus::Empty
        } else if self.matched_rows == 0 {
            MatchStatus::Unmatched
        } else {
            MatchStatus::Matched
        }
    }
}

/// Looks up every key of `reference` in `large` and left-joins the matches
/// back onto the reference rows. Nothing outside the two uploads and the
/// progress sink is touched, so a rerun with the same input gives the same
/// report.
pub fn run(
    reference: Upload,
    large: Upload,
    config: &PipelineConfig,
    progress: &mut dyn ProgressSink,
) -> Result<MatchReport, PipelineError> {
    config.validate()?;

    let reference_name = reference.name().to_string();
    let reference = read_table(reference)?.select(&config.reference_columns)?;
    let keys = KeySet::from_column(&reference, &config.key)?;
    log::info!(
        "{}: {} rows, {} distinct {} values to search",
        reference_name,
        reference.height(),
        keys.len(),
        config.key
    );
    if keys.is_empty() {
        log::warn!(
            "{} has no {} values; every row will be returned unmatched",
            reference_name,
            config.key
        );
    }

    let large_name = large.name().to_string();
    let ingest = read_chunked(large, config.chunk_size)?;
    let whole = matches!(ingest, Ingest::Whole(_));
    let assumed = config.assumed_chunk_count;
    let mut filter = ChunkedFilter::new(ingest, &config.key, &keys, &config.large_columns)
        .on_chunk(|done| {
            let fraction = if whole {
                1.0
            } else {
                capped_estimate(done, assumed)
            };
            progress.update(fraction);
        });

    let mut batches = Vec::new();
    for batch in filter.by_ref() {
        batches.push(batch?);
    }
    let chunks = filter.chunks_consumed();
    drop(filter);

    let matched_rows: usize = batches.iter().map(Table::height).sum();
    log::info!(
        "{}: {} chunks read, {} matching rows",
        large_name,
        chunks,
        matched_rows
    );

    let table = assemble(&reference, batches, &config.key, &config.large_columns)?;
    let report = MatchReport {
        table,
        key_count: keys.len(),
        matched_rows,
        chunks,
    };
    match report.status() {
        MatchStatus::Matched => log::info!("{} resulting rows", report.table.height()),
        MatchStatus::Unmatched => log::warn!(
            "no row of {} matched any {} value",
            large_name,
            config.key
        ),
        MatchStatus::Empty => log::warn!("{} has no rows", reference_name),
    }
    Ok(report)
}
