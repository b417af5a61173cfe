//! Basic combiners: Count, Sum, Min, Max

use super::{CheckedAccumulate, CombineFn, Overflow};
use std::marker::PhantomData;

/* ===================== Count ===================== */

/// Number of inputs per key.
#[derive(Clone, Copy, Debug, Default)]
pub struct Count;

impl<V> CombineFn<V, u64, u64> for Count {
    fn create(&self) -> u64 {
        0
    }

    fn add_input(&self, acc: &mut u64, _v: V) -> Result<(), Overflow> {
        *acc = acc.checked_add(1).ok_or(Overflow)?;
        Ok(())
    }

    fn merge(&self, acc: &mut u64, other: u64) -> Result<(), Overflow> {
        *acc = acc.checked_add(other).ok_or(Overflow)?;
        Ok(())
    }

    fn finish(&self, acc: u64) -> u64 {
        acc
    }
}

/* ===================== Sum<T> ===================== */

/// Checked sum of values per key.
///
/// - Accumulator: `T`
/// - Output: `T`
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum<T>(PhantomData<T>);
impl<T> Sum<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> CombineFn<T, T, T> for Sum<T>
where
    T: CheckedAccumulate + Send + Sync,
{
    fn create(&self) -> T {
        T::default()
    }

    fn add_input(&self, acc: &mut T, v: T) -> Result<(), Overflow> {
        *acc = acc.checked_accumulate(v).ok_or(Overflow)?;
        Ok(())
    }

    fn merge(&self, acc: &mut T, other: T) -> Result<(), Overflow> {
        self.add_input(acc, other)
    }

    fn finish(&self, acc: T) -> T {
        acc
    }
}

/* ===================== Min<T> / Max<T> ===================== */

/// Minimum value per key. Empty groups finish as `None`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Min<T>(PhantomData<T>);
impl<T> Min<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> CombineFn<T, Option<T>, Option<T>> for Min<T>
where
    T: Ord + Send + Sync,
{
    fn create(&self) -> Option<T> {
        None
    }

    fn add_input(&self, acc: &mut Option<T>, v: T) -> Result<(), Overflow> {
        match acc {
            Some(cur) if *cur <= v => {}
            _ => *acc = Some(v),
        }
        Ok(())
    }

    fn merge(&self, acc: &mut Option<T>, other: Option<T>) -> Result<(), Overflow> {
        match other {
            Some(v) => self.add_input(acc, v),
            None => Ok(()),
        }
    }

    fn finish(&self, acc: Option<T>) -> Option<T> {
        acc
    }
}

/// Maximum value per key. Empty groups finish as `None`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Max<T>(PhantomData<T>);
impl<T> Max<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> CombineFn<T, Option<T>, Option<T>> for Max<T>
where
    T: Ord + Send + Sync,
{
    fn create(&self) -> Option<T> {
        None
    }

    fn add_input(&self, acc: &mut Option<T>, v: T) -> Result<(), Overflow> {
        match acc {
            Some(cur) if *cur >= v => {}
            _ => *acc = Some(v),
        }
        Ok(())
    }

    fn merge(&self, acc: &mut Option<T>, other: Option<T>) -> Result<(), Overflow> {
        match other {
            Some(v) => self.add_input(acc, v),
            None => Ok(()),
        }
    }

    fn finish(&self, acc: Option<T>) -> Option<T> {
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn fold<V, A, O>(c: &impl CombineFn<V, A, O>, vs: Vec<V>) -> Result<O, Overflow> {
        let mut acc = c.create();
        for v in vs {
            c.add_input(&mut acc, v)?;
        }
        Ok(c.finish(acc))
    }

    #[test]
    fn count_and_sum() {
        assert_eq!(fold(&Count, vec!["a", "b", "c"]), Ok(3));
        assert_eq!(fold(&Sum::<u64>::new(), vec![1, 2, 3]), Ok(6));
        assert_eq!(
            fold(&Sum::<Decimal>::new(), vec![Decimal::new(10, 1), Decimal::new(25, 2)]),
            Ok(Decimal::new(125, 2))
        );
    }

    #[test]
    fn sum_reports_overflow() {
        assert_eq!(fold(&Sum::<u64>::new(), vec![u64::MAX, 1]), Err(Overflow));
        assert_eq!(fold(&Sum::<Decimal>::new(), vec![Decimal::MAX, Decimal::ONE]), Err(Overflow));
    }

    #[test]
    fn min_max_merge_partials() {
        let min = Min::<u32>::new();
        let mut left = None;
        min.add_input(&mut left, 5).unwrap();
        let mut right = None;
        min.add_input(&mut right, 2).unwrap();
        min.merge(&mut left, right).unwrap();
        min.merge(&mut left, None).unwrap();
        assert_eq!(min.finish(left), Some(2));

        assert_eq!(fold(&Max::<u32>::new(), vec![3, 9, 4]), Ok(Some(9)));
        assert_eq!(fold(&Max::<u32>::new(), vec![]), Ok(None));
    }
}
