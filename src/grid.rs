use std::fmt;
use std::io::Write;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;

use crate::error::PipelineError;
use crate::pretty::render_table;
use crate::table::{Cell, Table, text_cell};

/// Which version of the result goes to the exporter.
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum ExportSource {
    /// The table after the user's edits
    #[default]
    Edited,
    /// The table as produced by the join
    Original,
}

impl fmt::Display for ExportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportSource::Edited => write!(f, "edited"),
            ExportSource::Original => write!(f, "original"),
        }
    }
}

impl ExportSource {
    pub fn pick<'t>(self, original: &'t Table, edited: &'t Table) -> &'t Table {
        match self {
            ExportSource::Edited => edited,
            ExportSource::Original => original,
        }
    }
}

/// A change made by the user in the result grid. Rows are 1-based positions
/// in the displayed table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    SetCell {
        row: usize,
        column: String,
        value: Cell,
    },
    DropRow(usize),
    AppendRow(Vec<Cell>),
}

static CELL_EDIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*(\d+)\s*:([^=]+)=(.*)$").expect("cell edit pattern is valid")
});

/// Parses `ROW:COLUMN=VALUE`; an empty value clears the cell.
pub fn parse_cell_edit(spec: &str) -> Result<Edit, PipelineError> {
    let captures = CELL_EDIT.captures(spec).ok_or_else(|| PipelineError::Edit {
        edit: spec.to_string(),
        message: "expected ROW:COLUMN=VALUE".to_string(),
    })?;
    let row = parse_row_number(spec, &captures[1])?;
    Ok(Edit::SetCell {
        row,
        column: captures[2].to_string(),
        value: text_cell(&captures[3]),
    })
}

pub fn parse_row_drop(spec: &str) -> Result<Edit, PipelineError> {
    Ok(Edit::DropRow(parse_row_number(spec, spec.trim())?))
}

/// Parses `VALUE;VALUE;...`, one value per result column.
pub fn parse_row_append(spec: &str) -> Edit {
    Edit::AppendRow(spec.split(';').map(text_cell).collect())
}

fn parse_row_number(spec: &str, token: &str) -> Result<usize, PipelineError> {
    match token.parse::<usize>() {
        Ok(0) => Err(PipelineError::Edit {
            edit: spec.to_string(),
            message: "rows are numbered from 1".to_string(),
        }),
        Ok(row) => Ok(row),
        Err(_) => Err(PipelineError::Edit {
            edit: spec.to_string(),
            message: format!("invalid row number '{}'", token),
        }),
    }
}

/// Applies cell edits in order, then drops rows (numbered as displayed),
/// then appends new rows.
pub fn apply_edits(table: &Table, edits: &[Edit]) -> Result<Table, PipelineError> {
    let mut edited = table.clone();
    let height = table.height();

    for edit in edits {
        if let Edit::SetCell { row, column, value } = edit {
            check_row(edit, *row, height)?;
            let col = edited.column_index(column)?;
            edited.set_cell(row - 1, col, value.clone());
        }
    }

    let mut drops = Vec::new();
    for edit in edits {
        if let Edit::DropRow(row) = edit {
            check_row(edit, *row, height)?;
            drops.push(*row - 1);
        }
    }
    drops.sort_unstable_by(|a, b| b.cmp(a));
    drops.dedup();
    for row in drops {
        edited.remove_row(row);
    }

    for edit in edits {
        if let Edit::AppendRow(values) = edit {
            if values.len() != edited.width() {
                return Err(PipelineError::Edit {
                    edit: describe(edit),
                    message: format!(
                        "expected {} values, got {}",
                        edited.width(),
                        values.len()
                    ),
                });
            }
            edited.push_row(values.clone());
        }
    }

    if !edits.is_empty() {
        log::info!(
            "applied {} edits, {} rows before, {} after",
            edits.len(),
            height,
            edited.height()
        );
    }
    Ok(edited)
}

fn check_row(edit: &Edit, row: usize, height: usize) -> Result<(), PipelineError> {
    if row == 0 || row > height {
        return Err(PipelineError::Edit {
            edit: describe(edit),
            message: format!("row {} out of range ({} rows)", row, height),
        });
    }
    Ok(())
}

fn describe(edit: &Edit) -> String {
    match edit {
        Edit::SetCell { row, column, value } => {
            format!("{}:{}={}", row, column, value.as_deref().unwrap_or(""))
        }
        Edit::DropRow(row) => row.to_string(),
        Edit::AppendRow(values) => values
            .iter()
            .map(|v| v.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join(";"),
    }
}

/// Shows the result to the user and hands back what should be exported.
pub trait GridSink {
    fn present(&mut self, table: &Table) -> Result<Table, PipelineError>;
}

/// Prints a preview of the result and replays edits given up front.
pub struct TerminalGrid<W: Write> {
    writer: W,
    preview_rows: Option<usize>,
    edits: Vec<Edit>,
}

impl<W: Write> TerminalGrid<W> {
    /// `preview_rows` of `None` disables the preview.
    pub fn new(writer: W, preview_rows: Option<usize>, edits: Vec<Edit>) -> Self {
        TerminalGrid {
            writer,
            preview_rows,
            edits,
        }
    }
}

impl<W: Write> GridSink for TerminalGrid<W> {
    fn present(&mut self, table: &Table) -> Result<Table, PipelineError> {
        let edited = apply_edits(table, &self.edits)?;
        if let Some(limit) = self.preview_rows {
            render_table(&mut self.writer, &edited, limit)
                .map_err(|e| PipelineError::io("preview", e))?;
        }
        Ok(edited)
    }
}
