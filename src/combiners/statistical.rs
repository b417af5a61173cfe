//! Statistical combiners: `Mean`

use super::{CombineFn, Overflow};
use crate::money::round_money;
use rust_decimal::Decimal;

/* ===================== Mean ===================== */

/// Exact decimal mean, rounded half-to-even to money precision on finish.
///
/// - Accumulator: `(sum, count)`
/// - Output: `Option<Decimal>`, `None` for an empty group
#[derive(Clone, Copy, Debug, Default)]
pub struct Mean;

impl CombineFn<Decimal, (Decimal, u64), Option<Decimal>> for Mean {
    fn create(&self) -> (Decimal, u64) {
        (Decimal::ZERO, 0)
    }

    fn add_input(&self, acc: &mut (Decimal, u64), v: Decimal) -> Result<(), Overflow> {
        acc.0 = acc.0.checked_add(v).ok_or(Overflow)?;
        acc.1 = acc.1.checked_add(1).ok_or(Overflow)?;
        Ok(())
    }

    fn merge(&self, acc: &mut (Decimal, u64), other: (Decimal, u64)) -> Result<(), Overflow> {
        acc.0 = acc.0.checked_add(other.0).ok_or(Overflow)?;
        acc.1 = acc.1.checked_add(other.1).ok_or(Overflow)?;
        Ok(())
    }

    fn finish(&self, acc: (Decimal, u64)) -> Option<Decimal> {
        if acc.1 == 0 {
            return None;
        }
        acc.0.checked_div(Decimal::from(acc.1)).map(round_money)
    }
}
