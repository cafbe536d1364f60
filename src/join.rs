use indexmap::IndexMap;

use crate::error::PipelineError;
use crate::table::{Cell, Table};

/// Concatenates the filtered batches in arrival order and left-joins them
/// onto `reference`. With no batches the large-table columns are still added,
/// all null.
pub fn assemble(
    reference: &Table,
    batches: Vec<Table>,
    key: &str,
    large_columns: &[String],
) -> Result<Table, PipelineError> {
    let matches = concat_batches(batches, key, large_columns)?;
    left_join(reference, &matches, key)
}

fn concat_batches(
    batches: Vec<Table>,
    key: &str,
    headers: &[String],
) -> Result<Table, PipelineError> {
    let mut combined = Table::new(headers.to_vec());
    for (idx, batch) in batches.into_iter().enumerate() {
        combined.append(batch).map_err(|batch| {
            PipelineError::join(
                key,
                format!(
                    "batch {} has columns [{}], expected [{}]",
                    idx + 1,
                    batch.headers().join(", "),
                    headers.join(", ")
                ),
            )
        })?;
    }
    Ok(combined)
}

/// Left outer join on `key`. Every left row appears once per matching right
/// row, in right-table order, or once with nulls when nothing matches. Null
/// keys never match.
pub fn left_join(left: &Table, right: &Table, key: &str) -> Result<Table, PipelineError> {
    let left_key = left
        .column_index(key)
        .map_err(|_| PipelineError::join(key, "column missing from the reference table"))?;
    let right_key = right
        .column_index(key)
        .map_err(|_| PipelineError::join(key, "column missing from the matched rows"))?;

    let include: Vec<usize> = (0..right.width()).filter(|&idx| idx != right_key).collect();
    let mut headers = left.headers().to_vec();
    for &idx in &include {
        let name = &right.headers()[idx];
        if headers.contains(name) {
            return Err(PipelineError::join(
                key,
                format!("column '{}' exists on both sides", name),
            ));
        }
        headers.push(name.clone());
    }

    let mut key_to_rows: IndexMap<&str, Vec<usize>> = IndexMap::new();
    for (idx, value) in right.column(key)?.iter().enumerate() {
        if let Some(value) = value.as_deref() {
            key_to_rows.entry(value).or_default().push(idx);
        }
    }

    let mut joined = Table::new(headers);
    for row_idx in 0..left.height() {
        let left_row: Vec<Cell> = left
            .row(row_idx)
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect();
        let matched = left
            .cell(row_idx, left_key)
            .and_then(|value| key_to_rows.get(value));
        match matched {
            Some(right_rows) => {
                for &right_idx in right_rows {
                    let mut row = left_row.clone();
                    row.extend(
                        include
                            .iter()
                            .map(|&col| right.cell(right_idx, col).map(str::to_string)),
                    );
                    joined.push_row(row);
                }
            }
            None => {
                let mut row = left_row;
                row.resize(row.len() + include.len(), None);
                joined.push_row(row);
            }
        }
    }
    Ok(joined)
}
