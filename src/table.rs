use crate::error::PipelineError;

pub type Cell = Option<String>;

/// Column-oriented table of optional text cells. All columns have the same
/// length; empty text is stored as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    headers: Vec<String>,
    columns: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        let columns = headers.iter().map(|_| Vec::new()).collect();
        Table { headers, columns }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn height(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0
    }

    /// Appends one row. Callers guarantee `row.len() == self.width()`.
    pub fn push_row(&mut self, row: Vec<Cell>) {
        debug_assert_eq!(row.len(), self.width());
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value);
        }
    }

    pub fn remove_row(&mut self, row: usize) -> Vec<Cell> {
        self.columns.iter_mut().map(|c| c.remove(row)).collect()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, PipelineError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| PipelineError::missing_column(name, &self.headers))
    }

    pub fn column(&self, name: &str) -> Result<&[Cell], PipelineError> {
        let idx = self.column_index(name)?;
        Ok(&self.columns[idx])
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.columns
            .get(col)
            .and_then(|c| c.get(row))
            .and_then(|v| v.as_deref())
    }

    pub fn set_cell(&mut self, row: usize, col: usize, value: Cell) {
        self.columns[col][row] = value;
    }

    pub fn row(&self, row: usize) -> Vec<Option<&str>> {
        self.columns.iter().map(|c| c[row].as_deref()).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Option<&str>>> + '_ {
        (0..self.height()).map(move |idx| self.row(idx))
    }

    /// Projects onto `names`, in that order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Table, PipelineError> {
        let mut headers = Vec::with_capacity(names.len());
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let idx = self.column_index(name.as_ref())?;
            headers.push(self.headers[idx].clone());
            columns.push(self.columns[idx].clone());
        }
        Ok(Table { headers, columns })
    }

    /// Keeps the rows for which `keep(row_index)` holds, preserving order.
    pub fn retain_rows(&self, mut keep: impl FnMut(usize) -> bool) -> Table {
        let kept: Vec<usize> = (0..self.height()).filter(|&idx| keep(idx)).collect();
        let columns = self
            .columns
            .iter()
            .map(|column| kept.iter().map(|&idx| column[idx].clone()).collect())
            .collect();
        Table {
            headers: self.headers.clone(),
            columns,
        }
    }

    /// Moves the rows of `other` to the end of `self`. Both tables must carry
    /// identical headers.
    pub fn append(&mut self, other: Table) -> Result<(), Table> {
        if self.headers != other.headers {
            return Err(other);
        }
        for (column, extra) in self.columns.iter_mut().zip(other.columns) {
            column.extend(extra);
        }
        Ok(())
    }
}

/// Maps raw text to a cell, treating the empty string as missing.
pub fn text_cell(value: &str) -> Cell {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
pub(crate) fn table_of<R: AsRef<[&'static str]>>(headers: &[&str], rows: &[R]) -> Table {
    let mut table = Table::new(headers.iter().map(|h| h.to_string()).collect());
    for row in rows {
        let row = row.as_ref();
        assert_eq!(row.len(), table.width(), "ragged test row");
        table.push_row(row.iter().map(|v| text_cell(v)).collect());
    }
    table
}
