//! Summary statistics and outlier rejection over trial samples.

use ordered_float::OrderedFloat;
use serde::Serialize;

/// Flags the outliers among `values`.
///
/// A value is an outlier when it lies more than `sigma` standard deviations
/// from the mean of the *other* values, with that standard deviation floored
/// at 1% of their mean. Fewer than three values are never judged.
pub fn outlier_flags(values: &[f64], sigma: f64) -> Vec<bool> {
    if values.len() < 3 {
        return vec![false; values.len()];
    }
    (0..values.len())
        .map(|i| {
            let others: Vec<f64> = values
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, v)| *v)
                .collect();
            let mean = mean(&others);
            let spread = stdev(&others).max(mean.abs() * 0.01);
            (values[i] - mean).abs() > sigma * spread
        })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; `0.0` for fewer than two values.
pub fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<OrderedFloat<f64>> = values.iter().copied().map(OrderedFloat).collect();
    sorted.sort_unstable();
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2].0,
        _ => (sorted[n / 2 - 1].0 + sorted[n / 2].0) / 2.0,
    }
}

/// Distribution of one metric.
///
/// `mean` covers every successful trial; every other field covers only the
/// trials retained after outlier rejection (`trimmed_mean` is their mean).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Stats {
    pub mean: f64,
    pub trimmed_mean: f64,
    pub median: f64,
    pub stdev: f64,
    pub min: f64,
    pub max: f64,
}

impl Stats {
    pub fn new(successful: &[f64], retained: &[f64]) -> Self {
        let min = retained.iter().copied().map(OrderedFloat).min().map_or(0.0, |v| v.0);
        let max = retained.iter().copied().map(OrderedFloat).max().map_or(0.0, |v| v.0);
        Self {
            mean: mean(successful),
            trimmed_mean: mean(retained),
            median: median(retained),
            stdev: stdev(retained),
            min,
            max,
        }
    }
}
