//! Row validation and repair.
//!
//! [`parse_record`] applies the fixed rule set to one raw row. It is a pure
//! function: the verdict for a row never depends on other rows. [`Cleaner`]
//! adds the one stateful rule, duplicate detection, on top of it.
//!
//! Rules, first failure wins:
//! 1. fewer than seven fields, or an empty field → `MissingField`;
//!    more than seven fields → `InvalidType`
//! 2. a field that is not valid UTF-8 → `InvalidType`
//! 3. `date` not `YYYY-MM-DD` → `InvalidType`
//! 4. `quantity` not an integer → `InvalidType`; below 1 → `OutOfRange`
//! 5. `price` not a plain decimal → `InvalidType`; not positive → `OutOfRange`
//! 6. `region` / `category` outside their enumerations → `OutOfRange`
//! 7. a row fingerprint seen earlier in the run → `DuplicateKey` (opt-in)

use crate::config::{DedupConfig, DedupExhaustion};
use crate::error::{PipelineError, Result};
use crate::money::parse_decimal;
use crate::schema::{Category, INPUT_COLUMNS, RawRow, Record, Region, RejectReason};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::warn;

/// Classification of one unit of work by a stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    Accepted(T),
    Rejected(RejectReason),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self {
            Outcome::Accepted(v) => f(v),
            Outcome::Rejected(r) => Outcome::Rejected(r),
        }
    }
}

const REPLACEMENT: char = '\u{fffd}';

/// Apply the stateless rules to `row`.
pub fn parse_record(row: &RawRow) -> std::result::Result<Record, RejectReason> {
    let f = &row.fields;
    if f.len() < INPUT_COLUMNS.len() || f.iter().any(|v| v.trim().is_empty()) {
        return Err(RejectReason::MissingField);
    }
    if f.len() > INPUT_COLUMNS.len() || f.iter().any(|v| v.contains(REPLACEMENT)) {
        return Err(RejectReason::InvalidType);
    }

    let date = NaiveDate::parse_from_str(f[0].trim(), "%Y-%m-%d")
        .map_err(|_| RejectReason::InvalidType)?;

    let quantity: i64 = f[2].trim().parse().map_err(|_| RejectReason::InvalidType)?;
    if quantity < 1 {
        return Err(RejectReason::OutOfRange);
    }
    let quantity = u32::try_from(quantity).map_err(|_| RejectReason::OutOfRange)?;

    let price = parse_decimal(&f[3]).ok_or(RejectReason::InvalidType)?;
    if price <= Decimal::ZERO {
        return Err(RejectReason::OutOfRange);
    }

    let region: Region = f[5].parse().map_err(|_| RejectReason::OutOfRange)?;
    let category: Category = f[6].parse().map_err(|_| RejectReason::OutOfRange)?;

    Ok(Record {
        date,
        product_id: f[1].trim().to_string(),
        quantity,
        price,
        customer_id: f[4].trim().to_string(),
        region,
        category,
    })
}

/// 128-bit digest of the normalized record. Equal records (e.g. `10.5` and
/// `10.50`) share a fingerprint.
pub fn fingerprint(rec: &Record) -> u128 {
    let mut hasher = Sha256::new();
    for part in [
        rec.date.to_string(),
        rec.product_id.clone(),
        rec.quantity.to_string(),
        rec.price.normalize().to_string(),
        rec.customer_id.clone(),
        rec.region.to_string(),
        rec.category.to_string(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 16];
    head.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(head)
}

struct Dedup {
    seen: HashSet<u128>,
    cfg: DedupConfig,
}

/// Stateful cleaner: the stateless rules plus bounded duplicate detection.
pub struct Cleaner {
    dedup: Option<Dedup>,
    rows_seen: u64,
    degraded_at: Option<u64>,
}

impl Cleaner {
    pub fn new(dedup: Option<DedupConfig>) -> Self {
        Self {
            dedup: dedup.map(|cfg| Dedup { seen: HashSet::new(), cfg }),
            rows_seen: 0,
            degraded_at: None,
        }
    }

    /// Classify one row.
    ///
    /// # Errors
    /// Only `DedupCapacityExceeded`, when the fingerprint set is full and the
    /// configuration says to fail rather than degrade.
    pub fn clean(&mut self, row: &RawRow) -> Result<Outcome<Record>> {
        self.rows_seen += 1;
        let record = match parse_record(row) {
            Ok(r) => r,
            Err(reason) => return Ok(Outcome::Rejected(reason)),
        };

        let Some(dedup) = &mut self.dedup else {
            return Ok(Outcome::Accepted(record));
        };
        let key = fingerprint(&record);
        if dedup.seen.contains(&key) {
            return Ok(Outcome::Rejected(RejectReason::DuplicateKey));
        }
        if dedup.seen.len() < dedup.cfg.max_keys {
            dedup.seen.insert(key);
            return Ok(Outcome::Accepted(record));
        }

        match dedup.cfg.on_exhausted {
            DedupExhaustion::Fail => Err(PipelineError::DedupCapacityExceeded {
                max_keys: dedup.cfg.max_keys,
            }),
            DedupExhaustion::Degrade => {
                warn!(
                    row = self.rows_seen,
                    max_keys = dedup.cfg.max_keys,
                    "duplicate detection capacity reached; continuing without dedup"
                );
                self.degraded_at = Some(self.rows_seen);
                self.dedup = None;
                Ok(Outcome::Accepted(record))
            }
        }
    }

    /// Row number at which duplicate detection was switched off, if it was.
    pub fn dedup_degraded_at(&self) -> Option<u64> {
        self.degraded_at
    }
}
