//! CSV tokenizing for uploaded savings files.
//!
//! Turns raw file bytes into flat rows keyed by column label. Aggregation is
//! left to [`crate::aggregator`]; this module only guarantees well-formed
//! tabular text.

use std::collections::BTreeMap;
use std::ops::Index;

use savings_core::error::{DashboardError, Result};
use tracing::debug;

// ── CsvRow ────────────────────────────────────────────────────────────────────

/// One data row: column label → trimmed cell value, plus the 1-based file
/// line the record starts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvRow {
    line: u64,
    cells: BTreeMap<String, String>,
}

impl CsvRow {
    pub fn new<I, K, V>(line: u64, cells: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            line,
            cells: cells
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells.get(column).map(String::as_str)
    }

    /// Column labels in sorted order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.cells.insert(column.into(), value.into());
    }
}

impl Index<&str> for CsvRow {
    type Output = String;

    fn index(&self, column: &str) -> &String {
        &self.cells[column]
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parse CSV bytes into rows.
///
/// The first record is the header row. The delimiter is detected from the
/// header line (`,` or `;`). Rows whose cells are all empty are skipped.
///
/// Fails with [`DashboardError::Parse`] when the bytes are not UTF-8, the
/// file has no header row, or a record has a different number of fields than
/// the header.
pub fn parse_rows(bytes: &[u8]) -> Result<Vec<CsvRow>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DashboardError::Parse(format!("file is not valid UTF-8: {e}")))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    if text.trim().is_empty() {
        return Err(DashboardError::Parse("file is empty".to_string()));
    }

    let delimiter = detect_delimiter(text);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| DashboardError::Parse(format!("failed to read header row: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    if headers.iter().all(String::is_empty) {
        return Err(DashboardError::Parse("missing header row".to_string()));
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| DashboardError::Parse(describe_error(&e)))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let line = record.position().map_or(0, |pos| pos.line());
        rows.push(CsvRow::new(
            line,
            headers.iter().map(String::as_str).zip(record.iter()),
        ));
    }

    debug!(
        columns = headers.len(),
        rows = rows.len(),
        delimiter = %(delimiter as char),
        "parsed CSV"
    );

    Ok(rows)
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Pick `;` when the header line has more semicolons than commas.
fn detect_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");
    let commas = header.matches(',').count();
    let semicolons = header.matches(';').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn describe_error(e: &csv::Error) -> String {
    match e.position() {
        Some(pos) => format!("line {}: {}", pos.line(), e),
        None => e.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
