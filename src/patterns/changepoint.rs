//! Change-point detection via pruned exact dynamic programming (PELT).
//!
//! Finds the partition of a metric's non-null history minimizing
//! `sum(segment SSE) + penalty * (segment count - 1)`, where a segment's SSE
//! is its within-segment variance times its length. The pruned DP is exact:
//! the returned partition is globally optimal for the given penalty.

use crate::core::{DateRange, SeriesAccessor};
use crate::error::{InsightError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Direction of a mean shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftDirection {
    Increase,
    Decrease,
}

/// A detected shift in a metric's mean level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePoint {
    /// First date of the new level.
    pub date: NaiveDate,
    /// Index of that date within the non-null observation sequence.
    pub index: usize,
    /// Mean of the segment before the boundary.
    pub before_mean: f64,
    /// Mean of the segment after the boundary.
    pub after_mean: f64,
    /// `after_mean - before_mean`.
    pub magnitude: f64,
    pub direction: ShiftDirection,
}

/// Detect change points in one metric over the given range.
///
/// A strictly constant series yields no change points for any positive
/// penalty, and raising the penalty never increases the number detected.
pub fn change_points<A>(
    accessor: &A,
    metric: &str,
    penalty: f64,
    range: &DateRange,
) -> Result<Vec<ChangePoint>>
where
    A: SeriesAccessor + ?Sized,
{
    if !(penalty > 0.0) {
        return Err(InsightError::InvalidParameter(
            "penalty must be positive".to_string(),
        ));
    }

    let series = accessor.get_series(metric, range)?;
    let observed = series.observed();
    let dates: Vec<NaiveDate> = observed.iter().map(|(d, _)| *d).collect();
    let values: Vec<f64> = observed.iter().map(|(_, v)| *v).collect();

    let segments = optimal_segments(&values, penalty);
    debug!(metric, n = values.len(), segments = segments.len(), "change-point detection");

    let mut result = Vec::new();
    for pair in segments.windows(2) {
        let (before_start, boundary) = pair[0];
        let (_, after_end) = pair[1];
        let before_mean = segment_mean(&values, before_start, boundary);
        let after_mean = segment_mean(&values, boundary, after_end);
        let magnitude = after_mean - before_mean;
        result.push(ChangePoint {
            date: dates[boundary],
            index: boundary,
            before_mean,
            after_mean,
            magnitude,
            direction: if magnitude > 0.0 {
                ShiftDirection::Increase
            } else {
                ShiftDirection::Decrease
            },
        });
    }
    Ok(result)
}

fn segment_mean(values: &[f64], start: usize, end: usize) -> f64 {
    values[start..end].iter().sum::<f64>() / (end - start) as f64
}

/// Optimal `(start, end)` segmentation of `values` under the SSE + penalty
/// cost, via PELT with candidate pruning.
pub fn optimal_segments(values: &[f64], penalty: f64) -> Vec<(usize, usize)> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![(0, 1)];
    }

    // Prefix sums make any segment's SSE O(1):
    // SSE(s, t) = sum(x^2) - (sum(x))^2 / len.
    let mut cum = vec![0.0; n + 1];
    let mut cum_sq = vec![0.0; n + 1];
    for (i, &v) in values.iter().enumerate() {
        cum[i + 1] = cum[i] + v;
        cum_sq[i + 1] = cum_sq[i] + v * v;
    }
    let sse = |s: usize, t: usize| -> f64 {
        let len = (t - s) as f64;
        let sum = cum[t] - cum[s];
        (cum_sq[t] - cum_sq[s] - sum * sum / len).max(0.0)
    };

    // f[t] = minimal cost of segmenting values[0..t], with the penalty
    // charged per segment; seeding f[0] = -penalty cancels the charge for
    // the first segment.
    let mut f = vec![f64::INFINITY; n + 1];
    f[0] = -penalty;
    let mut prev = vec![0usize; n + 1];
    let mut candidates: Vec<usize> = vec![0];

    for t in 1..=n {
        let mut best_cost = f64::INFINITY;
        let mut best_start = 0;
        for &s in &candidates {
            let total = f[s] + sse(s, t) + penalty;
            if total < best_cost {
                best_cost = total;
                best_start = s;
            }
        }
        f[t] = best_cost;
        prev[t] = best_start;

        // PELT pruning: a start that cannot beat the current optimum even
        // without its penalty can never become optimal later.
        candidates.retain(|&s| f[s] + sse(s, t) <= f[t]);
        candidates.push(t);
    }

    // Backtrack boundaries.
    let mut boundaries = Vec::new();
    let mut t = n;
    while t > 0 {
        let s = prev[t];
        if s > 0 {
            boundaries.push(s);
        }
        t = s;
    }
    boundaries.reverse();

    let mut segments = Vec::with_capacity(boundaries.len() + 1);
    let mut start = 0;
    for &b in &boundaries {
        segments.push((start, b));
        start = b;
    }
    segments.push((start, n));
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DailyMetricSeries, MetricTable};
    use approx::assert_relative_eq;

    fn table_with(values: Vec<Option<f64>>) -> MetricTable {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut t = MetricTable::new();
        t.insert(
            "hrv",
            DailyMetricSeries::from_pairs(
                values
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (start + chrono::Duration::days(i as i64), v))
                    .collect(),
            )
            .unwrap(),
        );
        t
    }

    #[test]
    fn constant_series_has_no_change_points() {
        let t = table_with(vec![Some(5.0); 40]);
        for penalty in [0.1, 1.0, 5.0, 100.0] {
            let cps = change_points(&t, "hrv", penalty, &DateRange::all()).unwrap();
            assert!(cps.is_empty(), "penalty {penalty}");
        }
    }

    #[test]
    fn level_shift_detected_at_boundary() {
        let mut values: Vec<Option<f64>> = vec![Some(70.0); 50];
        values.extend(vec![Some(90.0); 50]);
        let t = table_with(values);

        let cps = change_points(&t, "hrv", 5.0, &DateRange::all()).unwrap();
        assert_eq!(cps.len(), 1);
        let cp = &cps[0];
        assert_eq!(cp.index, 50);
        assert_relative_eq!(cp.before_mean, 70.0, epsilon = 1e-9);
        assert_relative_eq!(cp.after_mean, 90.0, epsilon = 1e-9);
        assert_relative_eq!(cp.magnitude, 20.0, epsilon = 1e-9);
        assert_eq!(cp.direction, ShiftDirection::Increase);
        assert_eq!(
            cp.date,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(50)
        );
    }

    #[test]
    fn downward_shift_has_decrease_direction() {
        let mut values: Vec<Option<f64>> = vec![Some(90.0); 30];
        values.extend(vec![Some(60.0); 30]);
        let t = table_with(values);

        let cps = change_points(&t, "hrv", 5.0, &DateRange::all()).unwrap();
        assert_eq!(cps.len(), 1);
        assert_eq!(cps[0].direction, ShiftDirection::Decrease);
        assert!(cps[0].magnitude < 0.0);
    }

    #[test]
    fn three_levels_give_two_change_points() {
        let mut values: Vec<Option<f64>> = vec![Some(0.0); 20];
        values.extend(vec![Some(10.0); 20]);
        values.extend(vec![Some(0.0); 20]);
        let t = table_with(values);

        let cps = change_points(&t, "hrv", 5.0, &DateRange::all()).unwrap();
        assert_eq!(cps.len(), 2);
        assert_eq!(cps[0].index, 20);
        assert_eq!(cps[1].index, 40);
        // Adjacent-segment means, not remainder-of-series means.
        assert_relative_eq!(cps[0].after_mean, 10.0, epsilon = 1e-9);
        assert_relative_eq!(cps[1].before_mean, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn nulls_are_excluded_from_the_sequence() {
        let mut values: Vec<Option<f64>> = vec![Some(10.0); 20];
        values.push(None);
        values.extend(vec![Some(30.0); 20]);
        let t = table_with(values);

        let cps = change_points(&t, "hrv", 2.0, &DateRange::all()).unwrap();
        assert_eq!(cps.len(), 1);
        // Index is within the non-null sequence.
        assert_eq!(cps[0].index, 20);
    }

    #[test]
    fn higher_penalty_never_adds_change_points() {
        let values: Vec<Option<f64>> = (0..80)
            .map(|i| Some((i / 17) as f64 * 8.0 + ((i * 7) % 3) as f64))
            .collect();
        let t = table_with(values);

        let mut previous = usize::MAX;
        for penalty in [0.5, 2.0, 8.0, 32.0, 128.0] {
            let count = change_points(&t, "hrv", penalty, &DateRange::all())
                .unwrap()
                .len();
            assert!(count <= previous, "penalty {penalty} increased count");
            previous = count;
        }
    }

    #[test]
    fn huge_penalty_suppresses_clear_shift() {
        let mut values: Vec<Option<f64>> = vec![Some(0.0); 10];
        values.extend(vec![Some(100.0); 10]);
        let t = table_with(values);

        let cps = change_points(&t, "hrv", 1_000_000.0, &DateRange::all()).unwrap();
        assert!(cps.is_empty());
    }

    #[test]
    fn non_positive_penalty_is_rejected() {
        let t = table_with(vec![Some(1.0); 10]);
        for bad in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                change_points(&t, "hrv", bad, &DateRange::all()),
                Err(InsightError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn segmentation_is_optimal_on_a_small_series() {
        // Brute-force check: enumerate all partitions of a short series and
        // compare costs against the DP answer.
        let values = vec![1.0, 1.2, 0.8, 9.0, 9.4, 8.6, 4.0, 4.2];
        let penalty = 2.0;

        let sse = |s: &[f64]| -> f64 {
            let m = s.iter().sum::<f64>() / s.len() as f64;
            s.iter().map(|v| (v - m).powi(2)).sum()
        };

        let n = values.len();
        let mut best = f64::INFINITY;
        // Each bitmask encodes boundary positions between elements.
        for mask in 0u32..(1 << (n - 1)) {
            let mut cost = 0.0;
            let mut start = 0;
            let mut boundaries = 0;
            for pos in 0..n {
                let is_boundary = pos < n - 1 && mask & (1 << pos) != 0;
                if is_boundary {
                    cost += sse(&values[start..=pos]);
                    start = pos + 1;
                    boundaries += 1;
                }
            }
            cost += sse(&values[start..]);
            cost += penalty * boundaries as f64;
            best = best.min(cost);
        }

        let segments = optimal_segments(&values, penalty);
        let dp_cost: f64 = segments
            .iter()
            .map(|&(s, e)| sse(&values[s..e]))
            .sum::<f64>()
            + penalty * (segments.len() - 1) as f64;
        assert_relative_eq!(dp_cost, best, epsilon = 1e-9);
    }

    #[test]
    fn empty_and_single_point_series() {
        assert!(optimal_segments(&[], 1.0).is_empty());
        assert_eq!(optimal_segments(&[3.0], 1.0), vec![(0, 1)]);
    }
}
