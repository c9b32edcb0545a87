//! Technical indicator primitives powered by the `ta` crate
//!
//! Thin wrappers that return one value per input bar, with `None` during
//! the warmup period. Strategies consume these over their trailing window.

use ta::indicators::{RelativeStrengthIndex, SimpleMovingAverage};
use ta::Next;

/// Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let out = indicator.next(value);
            if i + 1 >= period {
                Some(out)
            } else {
                None
            }
        })
        .collect()
}

/// Relative Strength Index
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match RelativeStrengthIndex::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let out = indicator.next(value);
            if i + 1 > period {
                Some(out)
            } else {
                None
            }
        })
        .collect()
}

/// Highest value over the trailing `period` bars, per bar
pub fn rolling_max(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                None
            } else {
                values[i + 1 - period..=i]
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max)
                    .into()
            }
        })
        .collect()
}

/// Lowest value over the trailing `period` bars, per bar
pub fn rolling_min(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                None
            } else {
                values[i + 1 - period..=i]
                    .iter()
                    .copied()
                    .fold(f64::INFINITY, f64::min)
                    .into()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sma_warmup_and_values() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = sma(&values, 3);

        assert_eq!(out.len(), 5);
        assert!(out[0].is_none());
        assert!(out[1].is_none());
        assert_relative_eq!(out[2].unwrap(), 2.0);
        assert_relative_eq!(out[3].unwrap(), 3.0);
        assert_relative_eq!(out[4].unwrap(), 4.0);
    }

    #[test]
    fn rolling_extremes() {
        let values = [3.0, 1.0, 4.0, 1.5, 9.0];
        let max = rolling_max(&values, 3);
        let min = rolling_min(&values, 3);

        assert_eq!(max[4], Some(9.0));
        assert_eq!(max[3], Some(4.0));
        assert_eq!(min[2], Some(1.0));
        assert!(max[1].is_none());
    }

    #[test]
    fn rsi_warmup_length() {
        let values: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&values, 14);

        assert_eq!(out.len(), 30);
        assert!(out[13].is_none());
        assert!(out[14].is_some());
        // Monotonically rising series pushes RSI to the top of its range
        assert!(out[29].unwrap() > 70.0);
    }

    #[test]
    fn empty_inputs_yield_empty_outputs() {
        assert!(sma(&[], 5).is_empty());
        assert!(rsi(&[1.0], 0).is_empty());
        assert!(rolling_max(&[], 3).is_empty());
    }
}
