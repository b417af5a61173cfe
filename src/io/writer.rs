//! Canonical CSV output.
//!
//! Format contract:
//! - header row, then one row per aggregate key in canonical order
//! - fixed column order (key columns, then [`MEASURE_COLUMNS`])
//! - money with exactly two fraction digits, never in exponent form
//! - `\n` line terminator, quoting only where CSV requires it
//!
//! Output is staged in a temporary file next to the destination and renamed
//! into place only after the last byte is flushed, so a failed run never
//! leaves a file that looks complete.
//!
//! [`MEASURE_COLUMNS`]: crate::schema::MEASURE_COLUMNS

use crate::error::{PipelineError, Result};
use crate::schema::{AggregateRow, GroupBy};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::Serialize;
use std::fs::create_dir_all;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `rows` to `path` as the canonical aggregate table.
///
/// Returns the number of data rows written.
///
/// # Errors
/// `DestinationUnwritable` if the directory or file cannot be created or
/// written; the destination is left untouched in that case.
pub fn write_aggregates<I>(path: impl AsRef<Path>, group_by: GroupBy, rows: I) -> Result<u64>
where
    I: IntoIterator<Item = AggregateRow>,
{
    let path = path.as_ref();
    let unwritable = |reason: String| PipelineError::DestinationUnwritable {
        path: path.to_path_buf(),
        reason,
    };

    let staged = stage_file(path)?;
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .quote_style(QuoteStyle::Necessary)
        .from_writer(staged);

    wtr.write_record(group_by.header())
        .map_err(|e| unwritable(format!("write header: {e}")))?;
    let mut written = 0u64;
    for row in rows {
        wtr.write_record(row.to_fields())
            .map_err(|e| unwritable(format!("write row #{}: {e}", written + 1)))?;
        written += 1;
    }
    let staged = wtr
        .into_inner()
        .map_err(|e| unwritable(format!("flush: {}", e.error())))?;
    publish(staged, path)?;
    Ok(written)
}

/// Write `value` as pretty JSON to `path`, with the same staging as the table.
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let mut staged = stage_file(path)?;
    write_json_body(&mut staged, value, path)?;
    publish(staged, path)
}

fn write_json_body<W: Write, T: Serialize>(out: &mut W, value: &T, path: &Path) -> Result<()> {
    let unwritable = |reason: String| PipelineError::DestinationUnwritable {
        path: path.to_path_buf(),
        reason,
    };
    serde_json::to_writer_pretty(&mut *out, value).map_err(|e| unwritable(format!("serialize: {e}")))?;
    out.write_all(b"\n").map_err(|e| unwritable(format!("write: {e}")))
}

fn stage_file(path: &Path) -> Result<NamedTempFile> {
    let unwritable = |reason: String| PipelineError::DestinationUnwritable {
        path: path.to_path_buf(),
        reason,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    create_dir_all(parent).map_err(|e| unwritable(format!("mkdir -p {}: {e}", parent.display())))?;
    NamedTempFile::new_in(parent).map_err(|e| unwritable(format!("create staging file: {e}")))
}

fn publish(mut staged: NamedTempFile, path: &Path) -> Result<()> {
    let unwritable = |reason: String| PipelineError::DestinationUnwritable {
        path: path.to_path_buf(),
        reason,
    };
    staged.flush().map_err(|e| unwritable(format!("flush: {e}")))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|e| unwritable(format!("sync: {e}")))?;
    staged.persist(path).map_err(|e| unwritable(format!("rename: {}", e.error)))?;
    Ok(())
}
