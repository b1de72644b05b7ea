//! Correlation queries between metric pairs: rank, lagged, partial, and
//! pairwise-matrix forms.
//!
//! Every query pulls its own series through the accessor and pairs values on
//! the intersection of simultaneously non-null dates; `n` in every result is
//! exactly that intersection size.

use crate::core::{DailyMetricSeries, DateRange, SeriesAccessor};
use crate::correlation::spearman::{spearman, spearman_with_df, MIN_SAMPLES};
use crate::error::{InsightError, Result};
use crate::utils::ols;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rank correlation of one candidate against the target metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub metric: String,
    pub rho: f64,
    pub p_value: f64,
    pub n: usize,
}

/// Correlation at one lag offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LagCorrelation {
    pub lag: u32,
    pub rho: f64,
    pub p_value: f64,
    pub n: usize,
}

/// Lag sweep between two metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaggedCorrelationResult {
    pub metric_x: String,
    pub metric_y: String,
    pub lags: Vec<LagCorrelation>,
    /// Lag with maximum |rho|; ties break toward the smaller lag.
    pub best_lag: u32,
}

/// Partial correlation after removing the controls' linear influence.
///
/// `rho`/`p_value` are NaN when the residuals are rank-degenerate; that case
/// is reported, not raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialCorrelationResult {
    pub metric_x: String,
    pub metric_y: String,
    pub rho: f64,
    pub p_value: f64,
    pub n: usize,
    pub controlled_for: Vec<String>,
}

/// Symmetric pairwise correlation matrix with unit diagonal.
///
/// Cells of underpowered (n < 3) or degenerate pairs are NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub metrics: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
    pub p_values: Vec<Vec<f64>>,
    pub n_matrix: Vec<Vec<usize>>,
}

/// Values of both series on the dates where each is non-null.
fn paired(a: &DailyMetricSeries, b: &DailyMetricSeries) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (date, va) in a.observed() {
        if let Some(Some(vb)) = b.value_on(date) {
            xs.push(va);
            ys.push(vb);
        }
    }
    (xs, ys)
}

/// X shifted back by `lag` days against Y on the same calendar date.
fn paired_at_lag(x: &DailyMetricSeries, y: &DailyMetricSeries, lag: u32) -> (Vec<f64>, Vec<f64>) {
    let offset = Duration::days(i64::from(lag));
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (date, vy) in y.observed() {
        if let Some(Some(vx)) = x.value_on(date - offset) {
            xs.push(vx);
            ys.push(vy);
        }
    }
    (xs, ys)
}

/// Spearman rank correlations between a target metric and each candidate.
///
/// Results are sorted by |rho| descending. A candidate whose paired sample is
/// smaller than 3 surfaces `InsufficientData`; a rank-degenerate candidate is
/// silently skipped.
pub fn rank_correlations<A>(
    accessor: &A,
    target: &str,
    candidates: &[&str],
    range: &DateRange,
) -> Result<Vec<CorrelationResult>>
where
    A: SeriesAccessor + ?Sized,
{
    let target_series = accessor.get_series(target, range)?;
    let mut results = Vec::new();

    for &candidate in candidates {
        if candidate == target {
            continue;
        }
        let candidate_series = accessor.get_series(candidate, range)?;
        let (xs, ys) = paired(&target_series, &candidate_series);
        if let Some(r) = spearman(&xs, &ys)? {
            results.push(CorrelationResult {
                metric: candidate.to_string(),
                rho: r.rho,
                p_value: r.p_value,
                n: xs.len(),
            });
        }
    }

    results.sort_by(|a, b| {
        b.rho
            .abs()
            .partial_cmp(&a.rho.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    debug!(target, candidates = candidates.len(), kept = results.len(), "rank correlations");
    Ok(results)
}

/// Correlate X shifted back by 0..=max_lag days against Y.
///
/// Lag 0 equals the plain rank correlation of X and Y. Lags with fewer than
/// 3 pairs or degenerate ranks are omitted; the call fails with
/// `InsufficientData` only when no lag survives.
pub fn lagged_correlation<A>(
    accessor: &A,
    metric_x: &str,
    metric_y: &str,
    max_lag: u32,
    range: &DateRange,
) -> Result<LaggedCorrelationResult>
where
    A: SeriesAccessor + ?Sized,
{
    if max_lag < 1 {
        return Err(InsightError::InvalidParameter(
            "max_lag must be at least 1".to_string(),
        ));
    }

    let x = accessor.get_series(metric_x, range)?;
    let y = accessor.get_series(metric_y, range)?;

    let mut lags = Vec::new();
    let mut largest_n = 0usize;
    for lag in 0..=max_lag {
        let (xs, ys) = paired_at_lag(&x, &y, lag);
        largest_n = largest_n.max(xs.len());
        if xs.len() < MIN_SAMPLES {
            continue;
        }
        if let Some(r) = spearman(&xs, &ys)? {
            lags.push(LagCorrelation {
                lag,
                rho: r.rho,
                p_value: r.p_value,
                n: xs.len(),
            });
        }
    }

    if lags.is_empty() {
        return Err(InsightError::InsufficientData {
            needed: MIN_SAMPLES,
            got: largest_n,
        });
    }

    // Ascending lag order plus strict comparison break ties toward the
    // smaller lag.
    let mut best_lag = lags[0].lag;
    let mut best_abs = lags[0].rho.abs();
    for entry in &lags[1..] {
        if entry.rho.abs() > best_abs {
            best_abs = entry.rho.abs();
            best_lag = entry.lag;
        }
    }

    Ok(LaggedCorrelationResult {
        metric_x: metric_x.to_string(),
        metric_y: metric_y.to_string(),
        lags,
        best_lag,
    })
}

/// Partial rank correlation of X and Y controlling for `controls`.
///
/// Rows are dates where X, Y, and every control are simultaneously non-null.
/// Both sides are residualized against the controls by least squares, then
/// rank-correlated; the p-value uses `n - |controls| - 2` degrees of freedom,
/// which must be positive. With no controls this reduces to the plain rank
/// correlation.
pub fn partial_correlation<A>(
    accessor: &A,
    metric_x: &str,
    metric_y: &str,
    controls: &[&str],
    range: &DateRange,
) -> Result<PartialCorrelationResult>
where
    A: SeriesAccessor + ?Sized,
{
    let x = accessor.get_series(metric_x, range)?;
    let y = accessor.get_series(metric_y, range)?;
    let control_series: Vec<DailyMetricSeries> = controls
        .iter()
        .map(|c| accessor.get_series(c, range))
        .collect::<Result<_>>()?;

    // Complete rows only: every requested column non-null on the date.
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut control_cols = vec![Vec::new(); controls.len()];
    'dates: for (date, vx) in x.observed() {
        let Some(Some(vy)) = y.value_on(date) else {
            continue;
        };
        let mut row = Vec::with_capacity(controls.len());
        for series in &control_series {
            match series.value_on(date) {
                Some(Some(v)) => row.push(v),
                _ => continue 'dates,
            }
        }
        xs.push(vx);
        ys.push(vy);
        for (col, v) in control_cols.iter_mut().zip(row) {
            col.push(v);
        }
    }

    let n = xs.len();
    let needed = controls.len() + 3; // df = n - |C| - 2 must be > 0
    if n < needed {
        return Err(InsightError::InsufficientData { needed, got: n });
    }
    let df = n - controls.len() - 2;

    let resid_x = ols::residuals(&xs, &control_cols)?;
    let resid_y = ols::residuals(&ys, &control_cols)?;

    let (rho, p_value) = match spearman_with_df(&resid_x, &resid_y, df)? {
        Some(r) => (r.rho, r.p_value),
        None => (f64::NAN, f64::NAN),
    };

    debug!(metric_x, metric_y, n, controls = controls.len(), "partial correlation");
    Ok(PartialCorrelationResult {
        metric_x: metric_x.to_string(),
        metric_y: metric_y.to_string(),
        rho,
        p_value,
        n,
        controlled_for: controls.iter().map(|c| c.to_string()).collect(),
    })
}

/// Pairwise Spearman matrix over an arbitrary metric list.
///
/// Each unordered pair is computed once and mirrored; the diagonal is 1 with
/// p-value 0 and `n` equal to the metric's own non-null count.
pub fn correlation_matrix<A>(
    accessor: &A,
    metrics: &[&str],
    range: &DateRange,
) -> Result<CorrelationMatrix>
where
    A: SeriesAccessor + ?Sized,
{
    if metrics.len() < 2 {
        return Err(InsightError::InvalidParameter(
            "correlation matrix needs at least 2 metrics".to_string(),
        ));
    }

    let series: Vec<DailyMetricSeries> = metrics
        .iter()
        .map(|m| accessor.get_series(m, range))
        .collect::<Result<_>>()?;

    let k = metrics.len();
    let mut matrix = vec![vec![f64::NAN; k]; k];
    let mut p_values = vec![vec![f64::NAN; k]; k];
    let mut n_matrix = vec![vec![0usize; k]; k];

    for i in 0..k {
        matrix[i][i] = 1.0;
        p_values[i][i] = 0.0;
        n_matrix[i][i] = series[i].observed_len();

        for j in (i + 1)..k {
            let (xs, ys) = paired(&series[i], &series[j]);
            n_matrix[i][j] = xs.len();
            n_matrix[j][i] = xs.len();
            if xs.len() < MIN_SAMPLES {
                continue;
            }
            if let Some(r) = spearman(&xs, &ys)? {
                matrix[i][j] = r.rho;
                matrix[j][i] = r.rho;
                p_values[i][j] = r.p_value;
                p_values[j][i] = r.p_value;
            }
        }
    }

    Ok(CorrelationMatrix {
        metrics: metrics.iter().map(|m| m.to_string()).collect(),
        matrix,
        p_values,
        n_matrix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MetricTable;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        // Day 1 = 2024-03-01; offsets past month end stay valid.
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + Duration::days(i64::from(day) - 1)
    }

    fn series_of(values: Vec<Option<f64>>) -> DailyMetricSeries {
        DailyMetricSeries::from_pairs(
            values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (d(i as u32 + 1), v))
                .collect(),
        )
        .unwrap()
    }

    fn table() -> MetricTable {
        let mut t = MetricTable::new();
        // sleep and readiness rise together; stress moves opposite.
        t.insert(
            "sleep_hours",
            series_of(vec![
                Some(6.0),
                Some(6.5),
                Some(7.0),
                Some(7.5),
                Some(8.0),
                Some(8.5),
                Some(9.0),
                Some(9.5),
            ]),
        );
        t.insert(
            "readiness",
            series_of(vec![
                Some(60.0),
                Some(62.0),
                Some(65.0),
                Some(70.0),
                Some(74.0),
                Some(80.0),
                Some(85.0),
                Some(90.0),
            ]),
        );
        t.insert(
            "stress_minutes",
            series_of(vec![
                Some(80.0),
                Some(75.0),
                Some(71.0),
                Some(60.0),
                Some(52.0),
                Some(45.0),
                Some(30.0),
                Some(20.0),
            ]),
        );
        t
    }

    #[test]
    fn rank_correlations_sorted_by_strength() {
        let t = table();
        let results = rank_correlations(
            &t,
            "sleep_hours",
            &["readiness", "stress_minutes"],
            &DateRange::all(),
        )
        .unwrap();

        assert_eq!(results.len(), 2);
        assert_relative_eq!(results[0].rho.abs(), 1.0, epsilon = 1e-10);
        assert_eq!(results[0].n, 8);
    }

    #[test]
    fn rank_correlations_intersect_non_null_dates() {
        let mut t = table();
        t.insert(
            "spotty",
            series_of(vec![
                Some(1.0),
                None,
                Some(3.0),
                None,
                Some(5.0),
                None,
                Some(7.0),
                None,
            ]),
        );
        let results =
            rank_correlations(&t, "sleep_hours", &["spotty"], &DateRange::all()).unwrap();
        assert_eq!(results[0].n, 4);
    }

    #[test]
    fn rank_correlations_skip_self_pairing() {
        let t = table();
        let results = rank_correlations(
            &t,
            "sleep_hours",
            &["sleep_hours", "readiness"],
            &DateRange::all(),
        )
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metric, "readiness");
    }

    #[test]
    fn rank_correlations_surface_insufficient_data() {
        let mut t = table();
        t.insert(
            "sparse",
            series_of(vec![Some(1.0), Some(2.0), None, None, None, None, None, None]),
        );
        let err =
            rank_correlations(&t, "sleep_hours", &["sparse"], &DateRange::all()).unwrap_err();
        assert_eq!(err, InsightError::InsufficientData { needed: 3, got: 2 });
    }

    #[test]
    fn rank_correlations_skip_degenerate_candidates() {
        let mut t = table();
        t.insert("flat", series_of(vec![Some(4.0); 8]));
        let results = rank_correlations(&t, "sleep_hours", &["flat"], &DateRange::all()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn lag_zero_matches_plain_correlation() {
        let t = table();
        let lagged =
            lagged_correlation(&t, "sleep_hours", "readiness", 3, &DateRange::all()).unwrap();
        let plain =
            rank_correlations(&t, "sleep_hours", &["readiness"], &DateRange::all()).unwrap();

        let lag0 = lagged.lags.iter().find(|l| l.lag == 0).unwrap();
        assert_relative_eq!(lag0.rho, plain[0].rho, epsilon = 1e-12);
        assert_eq!(lag0.n, plain[0].n);
    }

    #[test]
    fn lagged_correlation_finds_shifted_driver() {
        // y is x delayed by two days, with noise-free alignment.
        let x: Vec<Option<f64>> = (0..14).map(|i| Some(((i * 13) % 7) as f64)).collect();
        let y: Vec<Option<f64>> = (0..14)
            .map(|i| {
                if i >= 2 {
                    Some((((i - 2) * 13) % 7) as f64)
                } else {
                    None
                }
            })
            .collect();
        let mut t = MetricTable::new();
        t.insert("driver", series_of(x));
        t.insert("response", series_of(y));

        let result = lagged_correlation(&t, "driver", "response", 5, &DateRange::all()).unwrap();
        assert_eq!(result.best_lag, 2);
        let best = result.lags.iter().find(|l| l.lag == 2).unwrap();
        assert_relative_eq!(best.rho, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn lagged_correlation_rejects_zero_max_lag() {
        let t = table();
        assert!(matches!(
            lagged_correlation(&t, "sleep_hours", "readiness", 0, &DateRange::all()),
            Err(InsightError::InvalidParameter(_))
        ));
    }

    #[test]
    fn partial_with_no_controls_equals_plain() {
        let t = table();
        let partial =
            partial_correlation(&t, "sleep_hours", "readiness", &[], &DateRange::all()).unwrap();
        let plain =
            rank_correlations(&t, "sleep_hours", &["readiness"], &DateRange::all()).unwrap();

        assert_relative_eq!(partial.rho, plain[0].rho, epsilon = 1e-9);
        assert_relative_eq!(partial.p_value, plain[0].p_value, epsilon = 1e-9);
        assert!(partial.controlled_for.is_empty());
    }

    #[test]
    fn partial_with_no_controls_handles_inverse_relationship() {
        // Perfectly anti-monotone pair: residualizing against nothing must
        // still produce full-length residuals, rho -1, p 0.
        let n = 8;
        let mut t = MetricTable::new();
        t.insert("x", series_of((0..n).map(|i| Some(i as f64)).collect()));
        t.insert(
            "y",
            series_of((0..n).map(|i| Some(100.0 - 3.0 * i as f64)).collect()),
        );

        let result = partial_correlation(&t, "x", "y", &[], &DateRange::all()).unwrap();
        assert_eq!(result.n, 8);
        assert_relative_eq!(result.rho, -1.0, epsilon = 1e-10);
        assert_relative_eq!(result.p_value, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn partial_removes_a_shared_driver() {
        // a and b are both linear in the confounder, plus independent
        // wiggles; controlling for it should collapse |rho| well below the
        // raw correlation.
        let n = 40;
        let confounder: Vec<Option<f64>> = (0..n).map(|i| Some(i as f64)).collect();
        let a: Vec<Option<f64>> = (0..n)
            .map(|i| Some(2.0 * i as f64 + ((i * 17) % 5) as f64))
            .collect();
        let b: Vec<Option<f64>> = (0..n)
            .map(|i| Some(3.0 * i as f64 + ((i * 11) % 7) as f64))
            .collect();

        let mut t = MetricTable::new();
        t.insert("a", series_of(a));
        t.insert("b", series_of(b));
        t.insert("confounder", series_of(confounder));

        let raw = rank_correlations(&t, "a", &["b"], &DateRange::all()).unwrap();
        let controlled =
            partial_correlation(&t, "a", "b", &["confounder"], &DateRange::all()).unwrap();

        assert!(raw[0].rho.abs() > 0.9);
        assert!(controlled.rho.abs() < 0.5);
        assert_eq!(controlled.controlled_for, vec!["confounder"]);
    }

    #[test]
    fn partial_enforces_degrees_of_freedom() {
        let mut t = MetricTable::new();
        t.insert("a", series_of(vec![Some(1.0), Some(2.0), Some(3.0)]));
        t.insert("b", series_of(vec![Some(2.0), Some(1.0), Some(3.0)]));
        t.insert("c", series_of(vec![Some(9.0), Some(4.0), Some(6.0)]));

        // n = 3, one control -> df = -? needs n >= 4.
        let err = partial_correlation(&t, "a", "b", &["c"], &DateRange::all()).unwrap_err();
        assert_eq!(err, InsightError::InsufficientData { needed: 4, got: 3 });
    }

    #[test]
    fn matrix_is_symmetric_with_unit_diagonal() {
        let t = table();
        let m = correlation_matrix(
            &t,
            &["sleep_hours", "readiness", "stress_minutes"],
            &DateRange::all(),
        )
        .unwrap();

        assert_eq!(m.metrics.len(), 3);
        for i in 0..3 {
            assert_relative_eq!(m.matrix[i][i], 1.0, epsilon = 1e-12);
            assert_relative_eq!(m.p_values[i][i], 0.0, epsilon = 1e-12);
            assert_eq!(m.n_matrix[i][i], 8);
            for j in 0..3 {
                if m.matrix[i][j].is_nan() {
                    assert!(m.matrix[j][i].is_nan());
                } else {
                    assert_relative_eq!(m.matrix[i][j], m.matrix[j][i], epsilon = 1e-12);
                }
                assert_eq!(m.n_matrix[i][j], m.n_matrix[j][i]);
            }
        }
        // Opposite movers correlate negatively.
        assert!(m.matrix[0][2] < -0.9);
    }

    #[test]
    fn matrix_requires_two_metrics() {
        let t = table();
        assert!(matches!(
            correlation_matrix(&t, &["sleep_hours"], &DateRange::all()),
            Err(InsightError::InvalidParameter(_))
        ));
    }

    #[test]
    fn unknown_metric_propagates() {
        let t = table();
        assert_eq!(
            rank_correlations(&t, "sleep_hours", &["typo"], &DateRange::all()).unwrap_err(),
            InsightError::UnknownMetric("typo".to_string())
        );
    }
}
