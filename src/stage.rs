//! Pull-based stage adapters.
//!
//! Each stage is an iterator wrapping the previous one, so only the item in
//! hand (plus the reader's bounded chunk buffers) is resident at any time.
//!
//! ```ignore
//! let mut cleaner = Cleaner::new(None);
//! for item in stream.clean(&mut cleaner).enrich() {
//!     match item? {
//!         Outcome::Accepted(rec) => aggregator.add(&rec)?,
//!         Outcome::Rejected(reason) => counts.record_rejection(reason),
//!     }
//! }
//! ```

use crate::clean::{Cleaner, Outcome};
use crate::error::Result;
use crate::schema::{EnrichedRecord, RawRow, Record};
use crate::transform::enrich;

/// One item per raw row read. Fatal errors pass through unchanged.
pub type Staged<T> = Result<Outcome<T>>;

/// Cleaner stage over a stream of raw rows.
pub struct Clean<'c, I> {
    inner: I,
    cleaner: &'c mut Cleaner,
}

impl<I> Iterator for Clean<'_, I>
where
    I: Iterator<Item = Result<RawRow>>,
{
    type Item = Staged<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.inner.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };
        Some(self.cleaner.clean(&row))
    }
}

/// Transformer stage over cleaned records.
pub struct Enrich<I> {
    inner: I,
}

impl<I> Iterator for Enrich<I>
where
    I: Iterator<Item = Staged<Record>>,
{
    type Item = Staged<EnrichedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.inner.next()?.map(|outcome| outcome.map(enrich)))
    }
}

pub trait StageExt: Iterator + Sized {
    fn clean(self, cleaner: &mut Cleaner) -> Clean<'_, Self>
    where
        Self: Iterator<Item = Result<RawRow>>,
    {
        Clean { inner: self, cleaner }
    }

    fn enrich(self) -> Enrich<Self>
    where
        Self: Iterator<Item = Staged<Record>>,
    {
        Enrich { inner: self }
    }
}

impl<I: Iterator> StageExt for I {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::schema::RejectReason;

    fn row(line: u64, fields: &str) -> Result<RawRow> {
        Ok(RawRow::new(0, line, fields.split(',').map(String::from).collect()))
    }

    #[test]
    fn stages_classify_every_row_once() {
        let rows = vec![
            row(2, "2023-01-01,P1,2,5.00,C1,North,Books"),
            row(3, "2023-01-01,,2,5.00,C1,North,Books"),
            row(4, "2023-04-01,P2,1,2.50,C2,East,Food"),
        ];
        let mut cleaner = Cleaner::new(None);
        let out: Vec<Staged<EnrichedRecord>> = rows.into_iter().clean(&mut cleaner).enrich().collect();
        assert_eq!(out.len(), 3);
        assert!(matches!(&out[0], Ok(Outcome::Accepted(e)) if e.line_total.to_string() == "10.00"));
        assert!(matches!(out[1], Ok(Outcome::Rejected(RejectReason::MissingField))));
        assert!(matches!(&out[2], Ok(Outcome::Accepted(e)) if e.quarter == 2));
    }

    #[test]
    fn errors_pass_through() {
        let rows: Vec<Result<RawRow>> = vec![Err(PipelineError::Cancelled)];
        let mut cleaner = Cleaner::new(None);
        let mut out = rows.into_iter().clean(&mut cleaner).enrich();
        assert!(matches!(out.next(), Some(Err(PipelineError::Cancelled))));
        assert!(out.next().is_none());
    }
}
