use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::model::ReconciliationRow;
use crate::util::ensure_parent_directory;

pub const AUDIT_COLUMNS: [&str; 10] = [
    "repeat_id",
    "difference_id",
    "decision",
    "match",
    "confidence",
    "reason",
    "evidence",
    "master_page",
    "master_group",
    "report_page",
];

fn optional_cell<T: ToString>(value: Option<T>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

/// Page references are written 1-based; absent values are empty cells.
fn audit_record(row: &ReconciliationRow) -> [String; 10] {
    [
        row.key.repeat_id.to_string(),
        row.key.difference_id.to_string(),
        row.decision.as_str().to_string(),
        row.matched.to_string(),
        optional_cell(row.confidence),
        row.reason.clone(),
        row.evidence.join(";"),
        optional_cell(row.master_page.map(|index| index + 1)),
        optional_cell(row.master_group.as_deref()),
        optional_cell(row.report_page.map(|index| index + 1)),
    ]
}

fn write_rows<'a, W: Write>(
    writer: W,
    rows: impl IntoIterator<Item = &'a ReconciliationRow>,
) -> Result<usize> {
    let mut csv_writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    // The header goes out even when there are no rows.
    csv_writer
        .write_record(AUDIT_COLUMNS)
        .context("failed to write csv header")?;

    let mut written = 0;
    for row in rows {
        csv_writer
            .write_record(audit_record(row))
            .with_context(|| format!("failed to write csv row for {}", row.key))?;
        written += 1;
    }

    csv_writer.flush().context("failed to flush csv output")?;
    Ok(written)
}

fn write_table<'a>(
    path: &Path,
    rows: impl IntoIterator<Item = &'a ReconciliationRow>,
) -> Result<usize> {
    ensure_parent_directory(path)?;
    let file = File::create(path)
        .with_context(|| format!("failed to create csv file: {}", path.display()))?;
    let written = write_rows(BufWriter::new(file), rows)
        .with_context(|| format!("failed to write csv file: {}", path.display()))?;
    info!(path = %path.display(), rows = written, "wrote csv table");
    Ok(written)
}

/// Full audit table, one line per row in reconciliation order.
pub fn write_audit_log(path: &Path, rows: &[ReconciliationRow]) -> Result<usize> {
    write_table(path, rows)
}

/// Same shape as the audit log, restricted to non-PASS rows.
pub fn write_exceptions(path: &Path, rows: &[ReconciliationRow]) -> Result<usize> {
    write_table(path, rows.iter().filter(|row| row.is_exception()))
}
