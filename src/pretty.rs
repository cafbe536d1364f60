use std::io::{self, Write};

use crate::table::Table;

/// Writes up to `limit` rows of `table` as an aligned, boxed grid. Nulls are
/// shown blank. A `#shown(n of m)` line follows when rows were left out.
pub fn render_table<W: Write>(writer: &mut W, table: &Table, limit: usize) -> io::Result<()> {
    if table.width() == 0 {
        return Ok(());
    }
    let shown = table.height().min(limit);
    let rows: Vec<Vec<&str>> = (0..shown)
        .map(|idx| {
            table
                .row(idx)
                .into_iter()
                .map(|v| v.unwrap_or(""))
                .collect()
        })
        .collect();
    let widths = compute_widths(table.headers(), &rows);

    print_separator(writer, &widths)?;
    let header: Vec<&str> = table.headers().iter().map(String::as_str).collect();
    print_row(writer, &header, &widths)?;
    print_separator(writer, &widths)?;
    for row in &rows {
        print_row(writer, row, &widths)?;
    }
    print_separator(writer, &widths)?;

    if shown < table.height() {
        writeln!(writer, "#shown({} of {})", shown, table.height())?;
    }
    writer.flush()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn compute_widths(headers: &[String], rows: &[Vec<&str>]) -> Vec<usize> {
    let mut widths: Vec<usize> = headers.iter().map(|h| display_width(h)).collect();
    for row in rows {
        for (idx, value) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(display_width(value));
        }
    }
    widths
}

fn print_separator<W: Write>(writer: &mut W, widths: &[usize]) -> io::Result<()> {
    write!(writer, "+")?;
    for width in widths {
        let segment = "-".repeat(width + 2);
        write!(writer, "{}+", segment)?;
    }
    writeln!(writer)
}

fn print_row<W: Write>(writer: &mut W, row: &[&str], widths: &[usize]) -> io::Result<()> {
    write!(writer, "|")?;
    for (idx, width) in widths.iter().enumerate() {
        let value = row.get(idx).copied().unwrap_or("");
        write!(writer, " {:<width$} |", value, width = width)?;
    }
    writeln!(writer)
}
