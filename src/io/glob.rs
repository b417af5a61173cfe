//! Input discovery.
//!
//! A data directory is expanded into a [`SourceSet`] of CSV files (plain or
//! compressed with a codec compiled into this build), sorted by path so the
//! file-list order, and with it the row order, is deterministic.

use crate::error::{PipelineError, Result};
use crate::io::compression::compressed_extensions;
use crate::schema::SourceSet;
use glob::{Pattern, glob};
use std::path::{Path, PathBuf};

/// Expand a glob pattern into a sorted vector of matching files.
///
/// Directories are skipped. Zero matches is an empty vector, not an error.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob(pattern)
        .map_err(|e| PipelineError::Config(format!("invalid glob pattern {pattern}: {e}")))?;

    let mut result = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| PipelineError::SourceUnavailable {
            path: e.path().to_path_buf(),
            reason: e.error().to_string(),
        })?;
        if path.is_file() {
            result.push(path);
        }
    }
    result.sort();
    Ok(result)
}

/// Every `*.csv` (and compressed `*.csv.<ext>`) file directly inside `dir`.
///
/// # Errors
/// `SourceUnavailable` when `dir` is not a directory or holds no input files.
pub fn discover_inputs(dir: impl AsRef<Path>) -> Result<SourceSet> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(PipelineError::SourceUnavailable {
            path: dir.to_path_buf(),
            reason: "not a directory".into(),
        });
    }

    let base = Pattern::escape(&dir.to_string_lossy());
    let mut paths = expand_glob(&format!("{base}/*.csv"))?;
    for ext in compressed_extensions() {
        paths.extend(expand_glob(&format!("{base}/*.csv{ext}"))?);
    }
    paths.sort();
    paths.dedup();

    if paths.is_empty() {
        return Err(PipelineError::SourceUnavailable {
            path: dir.to_path_buf(),
            reason: "no input files (*.csv) found".into(),
        });
    }
    tracing::debug!(dir = %dir.display(), files = paths.len(), "discovered inputs");
    Ok(SourceSet::new(paths))
}
