//! Streaming, chunked reader over an ordered set of CSV files.
//!
//! [`RowStream`] is a forward-only iterator of [`RawRow`]s. Each file is read
//! on its own thread that parses up to `chunk_size` rows at a time and hands
//! the chunk over a bounded channel. At most `read_ahead` files are in flight
//! and each channel holds at most `channel_capacity` chunks, so the resident
//! working set is bounded by
//! `read_ahead × (channel_capacity + 1) × chunk_size` rows regardless of the
//! size of the input. Files are always consumed in input-list order.
//!
//! Before the first row is handed out, the header of every file is checked
//! against [`INPUT_COLUMNS`] (surrounding whitespace and a UTF-8 BOM are
//! ignored). A mismatch anywhere fails the stream with `SchemaMismatch`
//! before any row of any file has been seen. A file that cannot be opened,
//! or whose header cannot be read, yields `SourceUnavailable` or is skipped,
//! depending on [`MissingSourcePolicy`]. A failure after the header, such as
//! a truncated compressed file, is `SourceCorrupt` and never skipped. Waiting
//! longer than `read_timeout` for a header or the next chunk yields
//! `ReadTimeout`.
//!
//! Dropping the stream disconnects every channel; reader threads notice on
//! their next send and exit, closing their files.

use crate::cancel::CancellationToken;
use crate::config::{MissingSourcePolicy, ReaderConfig};
use crate::error::{PipelineError, Result};
use crate::io::compression::open_decoded;
use crate::schema::{INPUT_COLUMNS, RawRow, SourceSet};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

/// Per-file outcome bookkeeping, shared with whoever drives the stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadReport {
    pub files_read: u64,
    pub skipped_files: Vec<PathBuf>,
}

/// Cloneable view of a stream's [`ReadReport`].
#[derive(Clone, Debug, Default)]
pub struct ReadReportHandle(Arc<Mutex<ReadReport>>);

impl ReadReportHandle {
    pub fn snapshot(&self) -> ReadReport {
        self.0.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn update(&self, f: impl FnOnce(&mut ReadReport)) {
        if let Ok(mut r) = self.0.lock() {
            f(&mut r);
        }
    }
}

enum FileMessage {
    Chunk(Vec<RawRow>),
    Failed(PipelineError),
    Finished { rows: u64 },
}

struct FileFeed {
    index: usize,
    path: PathBuf,
    rx: Receiver<FileMessage>,
}

/// Lazy sequence of raw rows over a [`SourceSet`].
pub struct RowStream {
    sources: SourceSet,
    cfg: ReaderConfig,
    cancel: CancellationToken,
    /// Indices into `sources` that passed the header check, in order.
    /// `None` until the check has run.
    readable: Option<Vec<usize>>,
    next_to_spawn: usize,
    in_flight: VecDeque<FileFeed>,
    buffered: std::vec::IntoIter<RawRow>,
    report: ReadReportHandle,
    done: bool,
}

impl RowStream {
    /// Prepare to read `sources`. Headers are checked and reader threads
    /// started on the first call to `next`.
    pub fn open(sources: SourceSet, cfg: ReaderConfig, cancel: CancellationToken) -> Result<Self> {
        Ok(Self {
            sources,
            cfg,
            cancel,
            readable: None,
            next_to_spawn: 0,
            in_flight: VecDeque::new(),
            buffered: Vec::new().into_iter(),
            report: ReadReportHandle::default(),
            done: false,
        })
    }

    pub fn report_handle(&self) -> ReadReportHandle {
        self.report.clone()
    }

    fn max_in_flight(&self) -> usize {
        if cfg!(feature = "parallel-io") {
            self.cfg.read_ahead.max(1)
        } else {
            1
        }
    }

    fn skippable(&self, err: &PipelineError) -> bool {
        matches!(err, PipelineError::SourceUnavailable { .. })
            && self.cfg.on_missing_source == MissingSourcePolicy::Skip
    }

    fn skip(&self, path: &Path, err: &PipelineError) {
        warn!(path = %path.display(), error = %err, "skipping unavailable source");
        let path = path.to_path_buf();
        self.report.update(|r| r.skipped_files.push(path));
    }

    /// Check every header, in order, on a helper thread so a stalled open
    /// still honours `read_timeout`.
    fn check_headers(&self) -> Result<Vec<usize>> {
        let (tx, rx) = bounded(1);
        let paths = self.sources.paths.clone();
        let cancel = self.cancel.clone();
        thread::Builder::new()
            .name("salesflow-header-check".into())
            .spawn(move || {
                for path in &paths {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if tx.send(open_csv(path).map(drop)).is_err() {
                        break;
                    }
                }
            })?;

        let timeout = self.cfg.read_timeout();
        let mut readable = Vec::with_capacity(self.sources.len());
        for (index, path) in self.sources.paths.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            match rx.recv_timeout(timeout) {
                Ok(Ok(())) => readable.push(index),
                Ok(Err(err)) if self.skippable(&err) => self.skip(path, &err),
                Ok(Err(err)) => return Err(err),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(PipelineError::ReadTimeout { path: path.clone(), timeout });
                }
                Err(RecvTimeoutError::Disconnected) => return Err(PipelineError::Cancelled),
            }
        }
        debug!(files = readable.len(), "headers checked");
        Ok(readable)
    }

    fn fill_in_flight(&mut self) -> Result<()> {
        let Some(readable) = &self.readable else {
            return Ok(());
        };
        while self.in_flight.len() < self.max_in_flight() && self.next_to_spawn < readable.len() {
            let index = readable[self.next_to_spawn];
            let path = self.sources.paths[index].clone();
            let (tx, rx) = bounded(self.cfg.channel_capacity.max(1));
            let chunk_size = self.cfg.chunk_size.max(1);
            let cancel = self.cancel.clone();
            let thread_path = path.clone();
            thread::Builder::new()
                .name(format!("salesflow-reader-{index}"))
                .spawn(move || read_file(index, &thread_path, chunk_size, &tx, &cancel))?;
            debug!(file = index, path = %path.display(), "reader started");
            self.in_flight.push_back(FileFeed { index, path, rx });
            self.next_to_spawn += 1;
        }
        Ok(())
    }

    /// Pull the next chunk into `buffered`. `Ok(false)` once every file is done.
    fn refill(&mut self) -> Result<bool> {
        if self.readable.is_none() {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            self.readable = Some(self.check_headers()?);
            self.fill_in_flight()?;
        }
        loop {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let Some(feed) = self.in_flight.front() else {
                return Ok(false);
            };
            let timeout = self.cfg.read_timeout();
            match feed.rx.recv_timeout(timeout) {
                Ok(FileMessage::Chunk(rows)) => {
                    self.buffered = rows.into_iter();
                    return Ok(true);
                }
                Ok(FileMessage::Finished { rows }) => {
                    info!(file = feed.index, path = %feed.path.display(), rows, "file read");
                    self.report.update(|r| r.files_read += 1);
                    self.advance()?;
                }
                Ok(FileMessage::Failed(err)) => {
                    // reader threads only send SourceUnavailable before their first chunk
                    if !self.skippable(&err) {
                        return Err(err);
                    }
                    RowStream::skip(self, &feed.path, &err);
                    self.advance()?;
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(PipelineError::ReadTimeout { path: feed.path.clone(), timeout });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PipelineError::Io(std::io::Error::other(format!(
                        "reader for {} exited without finishing",
                        feed.path.display()
                    ))));
                }
            }
        }
    }

    fn advance(&mut self) -> Result<()> {
        self.in_flight.pop_front();
        self.fill_in_flight()
    }
}

impl Iterator for RowStream {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(row) = self.buffered.next() {
                return Some(Ok(row));
            }
            match self.refill() {
                Ok(true) => continue,
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    self.in_flight.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Body of one reader thread. Send failures mean the consumer is gone.
fn read_file(
    index: usize,
    path: &Path,
    chunk_size: usize,
    tx: &Sender<FileMessage>,
    cancel: &CancellationToken,
) {
    let message = match stream_file(index, path, chunk_size, tx, cancel) {
        Ok(Some(rows)) => FileMessage::Finished { rows },
        Ok(None) => return,
        Err(e) => FileMessage::Failed(e),
    };
    let _ = tx.send(message);
}

/// Open `path`, decode it and consume a matching header.
///
/// Every failure here happens before the first data row: I/O and CSV errors
/// are `SourceUnavailable`, a wrong header is `SchemaMismatch`.
fn open_csv(path: &Path) -> Result<csv::Reader<Box<dyn Read>>> {
    let unavailable = |reason: String| PipelineError::SourceUnavailable {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| unavailable(e.to_string()))?;
    let decoded = open_decoded(file, path).map_err(|e| unavailable(e.to_string()))?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(decoded);

    let mut record = csv::ByteRecord::new();
    let has_header = rdr
        .read_byte_record(&mut record)
        .map_err(|e| unavailable(e.to_string()))?;
    let found: Vec<String> = if has_header { decode_fields(&record) } else { Vec::new() };
    check_header(path, &found)?;
    Ok(rdr)
}

/// `Ok(None)` when the consumer disconnected or the run was cancelled.
fn stream_file(
    index: usize,
    path: &Path,
    chunk_size: usize,
    tx: &Sender<FileMessage>,
    cancel: &CancellationToken,
) -> Result<Option<u64>> {
    let mut rdr = open_csv(path)?;
    let mut record = csv::ByteRecord::new();
    let mut rows = 0u64;
    let mut chunk = Vec::with_capacity(chunk_size);
    while rdr.read_byte_record(&mut record).map_err(|e| corrupt(path, rows, &e))? {
        let line = record.position().map_or(0, csv::Position::line);
        chunk.push(RawRow::new(index, line, decode_fields(&record)));
        rows += 1;
        if chunk.len() == chunk_size {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let full = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
            if tx.send(FileMessage::Chunk(full)).is_err() {
                return Ok(None);
            }
        }
    }
    if !chunk.is_empty() && tx.send(FileMessage::Chunk(chunk)).is_err() {
        return Ok(None);
    }
    Ok(Some(rows))
}

/// Invalid UTF-8 becomes U+FFFD; the cleaner rejects such fields.
fn decode_fields(record: &csv::ByteRecord) -> Vec<String> {
    record
        .iter()
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect()
}

fn check_header(path: &Path, found: &[String]) -> Result<()> {
    let normalized: Vec<&str> = found
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let f = if i == 0 { f.trim_start_matches('\u{feff}') } else { f.as_str() };
            f.trim()
        })
        .collect();
    if normalized == INPUT_COLUMNS {
        return Ok(());
    }
    Err(PipelineError::SchemaMismatch {
        path: path.to_path_buf(),
        expected: INPUT_COLUMNS.join(","),
        found: normalized.join(","),
    })
}

fn corrupt(path: &Path, rows: u64, e: &csv::Error) -> PipelineError {
    PipelineError::SourceCorrupt {
        path: path.to_path_buf(),
        reason: format!("after {rows} data rows: {e}"),
    }
}

/// Convenience for tests and tools: open `sources` with `cfg` and no
/// external cancellation.
pub fn read_rows(sources: SourceSet, cfg: ReaderConfig) -> Result<RowStream> {
    RowStream::open(sources, cfg, CancellationToken::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const HEADER: &str = "date,product_id,quantity,price,customer_id,region,category\n";

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, format!("{HEADER}{body}")).unwrap();
        p
    }

    fn small_cfg() -> ReaderConfig {
        ReaderConfig { chunk_size: 2, read_ahead: 2, channel_capacity: 1, ..ReaderConfig::default() }
    }

    #[test]
    fn preserves_order_within_and_across_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut body_a = String::new();
        let mut body_b = String::new();
        for i in 0..5 {
            body_a.push_str(&format!("2023-01-0{},A{i},1,1.00,C,North,Books\n", i + 1));
            body_b.push_str(&format!("2023-02-0{},B{i},1,1.00,C,South,Food\n", i + 1));
        }
        let a = write(tmp.path(), "a.csv", &body_a);
        let b = write(tmp.path(), "b.csv", &body_b);

        let rows: Vec<RawRow> = read_rows(SourceSet::new(vec![a, b]), small_cfg())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.fields[1].as_str()).collect();
        assert_eq!(ids, vec!["A0", "A1", "A2", "A3", "A4", "B0", "B1", "B2", "B3", "B4"]);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[5].file_index, 1);
    }

    #[test]
    fn header_mismatch_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("bad.csv");
        fs::write(&p, "date,product,quantity,price,customer_id,region,category\n").unwrap();
        let mut stream = read_rows(SourceSet::new(vec![p]), small_cfg()).unwrap();
        let err = stream.next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
        assert!(stream.next().is_none());
    }

    #[test]
    fn bad_header_in_a_later_file_fails_before_any_row() {
        let tmp = tempfile::tempdir().unwrap();
        let good = write(tmp.path(), "a.csv", "2023-01-01,P,1,1.00,C,North,Books\n");
        let bad = tmp.path().join("b.csv");
        fs::write(&bad, "date,product_id,qty,price,customer_id,region,category\n").unwrap();

        let mut stream = read_rows(SourceSet::new(vec![good, bad.clone()]), small_cfg()).unwrap();
        let err = stream.next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { ref path, .. } if *path == bad));
        assert!(stream.next().is_none());
    }

    #[test]
    fn full_channel_blocks_the_reader() {
        let tmp = tempfile::tempdir().unwrap();
        let mut body = String::new();
        for i in 0..50 {
            body.push_str(&format!("2023-01-01,P{i},1,1.00,C,North,Books\n"));
        }
        let a = write(tmp.path(), "a.csv", &body);
        let b = write(tmp.path(), "b.csv", &body);
        let cfg = ReaderConfig { chunk_size: 2, read_ahead: 1, channel_capacity: 1, ..ReaderConfig::default() };

        let mut stream = read_rows(SourceSet::new(vec![a, b]), cfg).unwrap();
        assert!(stream.next().unwrap().is_ok());
        thread::sleep(std::time::Duration::from_millis(100));

        // one file in flight, its channel full, the rest of it unread
        assert_eq!(stream.in_flight.len(), 1);
        assert!(stream.in_flight[0].rx.is_full());
        assert_eq!(stream.buffered.len(), 1);
        assert_eq!(stream.report_handle().snapshot().files_read, 0);

        let rest = stream.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(rest.len(), 99);
    }

    #[test]
    fn empty_file_has_no_header() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("empty.csv");
        fs::write(&p, "").unwrap();
        let err = read_rows(SourceSet::new(vec![p]), small_cfg())
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    }

    #[test]
    fn header_only_file_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write(tmp.path(), "h.csv", "");
        let stream = read_rows(SourceSet::new(vec![p]), small_cfg()).unwrap();
        let report = stream.report_handle();
        assert_eq!(stream.count(), 0);
        assert_eq!(report.snapshot().files_read, 1);
    }

    #[test]
    fn missing_file_fails_or_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let good = write(tmp.path(), "good.csv", "2023-01-01,P,1,1.00,C,North,Books\n");
        let missing = tmp.path().join("missing.csv");
        let set = SourceSet::new(vec![missing.clone(), good]);

        let err = read_rows(set.clone(), small_cfg())
            .unwrap()
            .find_map(|r| r.err())
            .unwrap();
        assert!(matches!(err, PipelineError::SourceUnavailable { ref path, .. } if *path == missing));

        let cfg = ReaderConfig { on_missing_source: MissingSourcePolicy::Skip, ..small_cfg() };
        let stream = read_rows(set, cfg).unwrap();
        let report = stream.report_handle();
        let rows: Vec<RawRow> = stream.collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(report.snapshot().skipped_files, vec![missing]);
    }

    #[test]
    fn cancelled_stream_stops() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write(tmp.path(), "a.csv", "2023-01-01,P,1,1.00,C,North,Books\n");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut stream = RowStream::open(SourceSet::new(vec![p]), small_cfg(), cancel).unwrap();
        assert!(matches!(stream.next(), Some(Err(PipelineError::Cancelled))));
    }

    #[cfg(unix)]
    #[test]
    fn stalled_source_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let fifo = tmp.path().join("stalled.csv");
        let made = std::process::Command::new("mkfifo").arg(&fifo).status();
        if !made.is_ok_and(|s| s.success()) {
            return;
        }
        let cfg = ReaderConfig { read_timeout_ms: 100, ..small_cfg() };
        let err = read_rows(SourceSet::new(vec![fifo]), cfg)
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PipelineError::ReadTimeout { .. }));
    }
}
