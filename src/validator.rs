//! Equivalence checking of two output tables.
//!
//! Both files are read fully and compared row by row, field by field, at the
//! same ordinal position. Comparison is exact on the text: two runs agree
//! only when their outputs are byte-for-byte equivalent as CSV.
//!
//! Row indices are 0 for the header and 1-based for data rows. When one
//! table is longer, the first row present on only one side is reported once,
//! with `<missing>` standing in for the absent side.

use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Placeholder for a row or field present on only one side.
pub const MISSING: &str = "<missing>";

/// How many divergences to collect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportMode {
    /// Stop at the first divergence.
    #[default]
    FirstOnly,
    /// Collect every divergence.
    All,
}

/// One position where the tables disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Divergence {
    pub row_index: usize,
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {} [{}]: expected {:?}, got {:?}",
            self.row_index, self.field, self.expected, self.actual
        )
    }
}

/// Outcome of a comparison. A mismatch is a result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    Match,
    Mismatch(Vec<Divergence>),
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        matches!(self, Comparison::Match)
    }

    pub fn divergences(&self) -> &[Divergence] {
        match self {
            Comparison::Match => &[],
            Comparison::Mismatch(d) => d,
        }
    }

    /// Print every divergence to stderr.
    pub fn print_divergences(&self) {
        for d in self.divergences() {
            eprintln!("{d}");
        }
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self.divergences())
    }
}

/// Read both files and compare them.
///
/// # Errors
/// `SourceUnavailable` if either file cannot be read or parsed as CSV.
pub fn compare_files(
    expected: impl AsRef<Path>,
    actual: impl AsRef<Path>,
    mode: ReportMode,
) -> Result<Comparison> {
    let expected = read_table(expected.as_ref())?;
    let actual = read_table(actual.as_ref())?;
    Ok(compare_tables(&expected, &actual, mode))
}

/// Compare two in-memory tables; row 0 of each is its header.
pub fn compare_tables(expected: &[Vec<String>], actual: &[Vec<String>], mode: ReportMode) -> Comparison {
    let header = expected.first().or(actual.first());
    let field_name = |col: usize| {
        header
            .and_then(|h| h.get(col))
            .cloned()
            .unwrap_or_else(|| format!("column {}", col + 1))
    };

    let mut found = Vec::new();
    for (row_index, (e, a)) in expected.iter().zip(actual).enumerate() {
        for col in 0..e.len().max(a.len()) {
            let ev = e.get(col).map_or(MISSING, String::as_str);
            let av = a.get(col).map_or(MISSING, String::as_str);
            if ev != av {
                found.push(Divergence {
                    row_index,
                    field: field_name(col),
                    expected: ev.to_string(),
                    actual: av.to_string(),
                });
                if mode == ReportMode::FirstOnly {
                    return Comparison::Mismatch(found);
                }
            }
        }
    }

    let common = expected.len().min(actual.len());
    if expected.len() != actual.len() {
        let join = |rows: &[Vec<String>]| rows.get(common).map_or(MISSING.to_string(), |r| r.join(","));
        found.push(Divergence {
            row_index: common,
            field: "<row>".to_string(),
            expected: join(expected),
            actual: join(actual),
        });
    }

    debug!(rows_expected = expected.len(), rows_actual = actual.len(), divergences = found.len(), "tables compared");
    if found.is_empty() {
        Comparison::Match
    } else {
        Comparison::Mismatch(found)
    }
}

fn read_table(path: &Path) -> Result<Vec<Vec<String>>> {
    let unavailable = |reason: String| PipelineError::SourceUnavailable {
        path: path.to_path_buf(),
        reason,
    };
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| unavailable(e.to_string()))?;
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| unavailable(e.to_string()))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}
