//! Per-bucket combiners.
//!
//! A [`CombineFn`] describes how values fold into an accumulator (`A`), how two
//! accumulators merge, and how an accumulator becomes the output (`O`). The
//! aggregator keeps one accumulator per key and merges partial accumulators
//! from parallel shards in shard order.
//!
//! Folding is fallible: an accumulator that would leave the range of its type
//! reports [`Overflow`] instead of wrapping or saturating.
//!
//! - [`Count`] -- number of inputs.
//! - [`Sum<T>`] -- checked sum.
//! - [`Min<T>`] / [`Max<T>`] -- extremes.
//! - [`Mean`] -- decimal mean, rounded to money precision.

mod basic;
mod statistical;

pub use basic::{Count, Max, Min, Sum};
pub use statistical::Mean;

use rust_decimal::Decimal;

/// An accumulator left the range of its type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Overflow;

/// Fallible fold of `V` values into an `A`, finished into an `O`.
pub trait CombineFn<V, A, O>: Send + Sync {
    fn create(&self) -> A;
    fn add_input(&self, acc: &mut A, v: V) -> Result<(), Overflow>;
    fn merge(&self, acc: &mut A, other: A) -> Result<(), Overflow>;
    fn finish(&self, acc: A) -> O;
}

/// Addition that reports overflow instead of wrapping.
pub trait CheckedAccumulate: Copy + Default {
    fn checked_accumulate(self, rhs: Self) -> Option<Self>;
}

impl CheckedAccumulate for u64 {
    fn checked_accumulate(self, rhs: Self) -> Option<Self> {
        self.checked_add(rhs)
    }
}

impl CheckedAccumulate for Decimal {
    fn checked_accumulate(self, rhs: Self) -> Option<Self> {
        self.checked_add(rhs)
    }
}
