//! Derived fields: line total and calendar parts.

use crate::clean::Outcome;
use crate::schema::{EnrichedRecord, Record, RejectReason};
use chrono::Datelike;
use rust_decimal::Decimal;

/// Enrich one record. The only failure is a `quantity × price` product that
/// does not fit the decimal range, which rejects the record.
pub fn enrich(record: Record) -> Outcome<EnrichedRecord> {
    let Some(line_total) = Decimal::from(record.quantity).checked_mul(record.price) else {
        return Outcome::Rejected(RejectReason::ComputeOverflow);
    };
    let month = record.date.month();
    Outcome::Accepted(EnrichedRecord {
        year: record.date.year(),
        month,
        quarter: (month - 1) / 3 + 1,
        line_total,
        record,
    })
}
