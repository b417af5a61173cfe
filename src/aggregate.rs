//! Keyed running aggregates.
//!
//! The [`Aggregator`] owns one [`Bucket`] per [`AggregateKey`]. Buckets are
//! created by the first record of their key and never exposed until
//! [`Aggregator::finalize`] consumes the aggregator and emits the rows in key
//! order. Partial aggregators (one per parallel shard) combine with
//! [`Aggregator::merge`]; every measure merges associatively and
//! commutatively, so the merged result equals the sequential one.

use crate::combiners::{CombineFn, Count, Max, Mean, Min, Overflow, Sum};
use crate::error::{PipelineError, Result};
use crate::money::round_money;
use crate::schema::{AggregateKey, AggregateRow, EnrichedRecord, GroupBy};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Running accumulators for one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    count: u64,
    quantity: u64,
    revenue: Decimal,
    price: (Decimal, u64),
    min_price: Option<Decimal>,
    max_price: Option<Decimal>,
}

impl Default for Bucket {
    fn default() -> Self {
        Self {
            count: count().create(),
            quantity: Sum::<u64>::new().create(),
            revenue: Sum::<Decimal>::new().create(),
            price: Mean.create(),
            min_price: Min::<Decimal>::new().create(),
            max_price: Max::<Decimal>::new().create(),
        }
    }
}

type MeasureResult<T> = std::result::Result<T, &'static str>;

/// Tag an overflow with the measure it happened in.
fn measure<T>(r: std::result::Result<T, Overflow>, name: &'static str) -> MeasureResult<T> {
    r.map_err(|Overflow| name)
}

fn count() -> impl CombineFn<(), u64, u64> {
    Count
}

impl Bucket {
    /// Fold one record in. On overflow, returns the measure that overflowed;
    /// the bucket must then be discarded.
    pub fn add(&mut self, rec: &EnrichedRecord) -> MeasureResult<()> {
        let price = rec.record.price;
        measure(count().add_input(&mut self.count, ()), "record_count")?;
        measure(
            Sum::<u64>::new().add_input(&mut self.quantity, u64::from(rec.record.quantity)),
            "total_quantity",
        )?;
        measure(Sum::<Decimal>::new().add_input(&mut self.revenue, rec.line_total), "total_revenue")?;
        measure(Mean.add_input(&mut self.price, price), "avg_price")?;
        measure(Min::<Decimal>::new().add_input(&mut self.min_price, price), "min_price")?;
        measure(Max::<Decimal>::new().add_input(&mut self.max_price, price), "max_price")?;
        Ok(())
    }

    pub fn merge(&mut self, other: Bucket) -> MeasureResult<()> {
        measure(count().merge(&mut self.count, other.count), "record_count")?;
        measure(Sum::<u64>::new().merge(&mut self.quantity, other.quantity), "total_quantity")?;
        measure(Sum::<Decimal>::new().merge(&mut self.revenue, other.revenue), "total_revenue")?;
        measure(Mean.merge(&mut self.price, other.price), "avg_price")?;
        measure(Min::<Decimal>::new().merge(&mut self.min_price, other.min_price), "min_price")?;
        measure(Max::<Decimal>::new().merge(&mut self.max_price, other.max_price), "max_price")?;
        Ok(())
    }

    /// `None` for a bucket that never saw a record.
    fn finish(self, key: AggregateKey) -> Option<AggregateRow> {
        Some(AggregateRow {
            key,
            record_count: count().finish(self.count),
            total_quantity: Sum::<u64>::new().finish(self.quantity),
            total_revenue: round_money(Sum::<Decimal>::new().finish(self.revenue)),
            avg_price: Mean.finish(self.price)?,
            min_price: round_money(Min::<Decimal>::new().finish(self.min_price)?),
            max_price: round_money(Max::<Decimal>::new().finish(self.max_price)?),
        })
    }
}

/// Bounded map of running aggregates, one bucket per distinct key.
#[derive(Clone, Debug)]
pub struct Aggregator {
    group_by: GroupBy,
    buckets: HashMap<AggregateKey, Bucket>,
}

impl Aggregator {
    pub fn new(group_by: GroupBy) -> Self {
        Self { group_by, buckets: HashMap::new() }
    }

    pub fn group_by(&self) -> GroupBy {
        self.group_by
    }

    /// Number of distinct keys seen so far.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Update the bucket of `rec`'s key.
    ///
    /// # Errors
    /// `AggregateOverflow` if a measure leaves its numeric range.
    pub fn add(&mut self, rec: &EnrichedRecord) -> Result<()> {
        let key = self.group_by.key_of(rec);
        let bucket = self.buckets.entry(key).or_default();
        if let Err(measure) = bucket.add(rec) {
            return Err(PipelineError::AggregateOverflow {
                key: self.group_by.key_of(rec).to_string(),
                measure,
            });
        }
        Ok(())
    }

    /// Fold a partial aggregator into this one.
    ///
    /// # Errors
    /// `Config` when the groupings differ, `AggregateOverflow` on overflow.
    pub fn merge(&mut self, other: Aggregator) -> Result<()> {
        if other.group_by != self.group_by {
            return Err(PipelineError::Config(format!(
                "cannot merge aggregates grouped by {:?} into {:?}",
                other.group_by, self.group_by
            )));
        }
        for (key, bucket) in other.buckets {
            match self.buckets.get_mut(&key) {
                Some(mine) => {
                    if let Err(measure) = mine.merge(bucket) {
                        return Err(PipelineError::AggregateOverflow { key: key.to_string(), measure });
                    }
                }
                None => {
                    self.buckets.insert(key, bucket);
                }
            }
        }
        Ok(())
    }

    /// Consume the aggregator and emit one row per key, sorted by key.
    pub fn finalize(self) -> Vec<AggregateRow> {
        let mut rows: Vec<AggregateRow> = self
            .buckets
            .into_iter()
            .filter_map(|(key, bucket)| bucket.finish(key))
            .collect();
        rows.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        rows
    }
}

/// Aggregate a whole stream of enriched records.
pub fn aggregate_all<'a, I>(group_by: GroupBy, records: I) -> Result<Vec<AggregateRow>>
where
    I: IntoIterator<Item = &'a EnrichedRecord>,
{
    let mut agg = Aggregator::new(group_by);
    for rec in records {
        agg.add(rec)?;
    }
    Ok(agg.finalize())
}
