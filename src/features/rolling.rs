//! Causal per-date feature computation.
//!
//! Every computation here only looks at dates `<= d` (or exactly `d - k` for
//! lags). Windows are calendar spans, not row counts: a missing day shrinks
//! the sample inside the window but never shifts the window boundary.

use crate::core::DailyMetricSeries;
use crate::utils::stats;
use chrono::NaiveDate;

/// Rolling mean over the calendar span `[d - window + 1, d]`.
///
/// Requires at least one non-null value in the span, null otherwise.
pub fn rolling_mean(series: &DailyMetricSeries, date: NaiveDate, window: u32) -> Option<f64> {
    let values = series.window_values(date, window);
    if values.is_empty() {
        None
    } else {
        Some(stats::mean(&values))
    }
}

/// Rolling sample standard deviation over `[d - window + 1, d]`.
///
/// Requires at least two non-null values in the span, null otherwise.
pub fn rolling_std(series: &DailyMetricSeries, date: NaiveDate, window: u32) -> Option<f64> {
    let values = series.window_values(date, window);
    if values.len() < 2 {
        None
    } else {
        Some(stats::std_dev(&values))
    }
}

/// `value(d) - rolling_mean_7(d)`, null if either operand is null.
pub fn delta_vs_rm7(series: &DailyMetricSeries, date: NaiveDate) -> Option<f64> {
    let value = series.value_on(date).flatten()?;
    let rm7 = rolling_mean(series, date, 7)?;
    Some(value - rm7)
}

/// The raw value at exactly `d - k` days; never interpolated.
pub fn lag(series: &DailyMetricSeries, date: NaiveDate, k: u32) -> Option<f64> {
    series
        .value_on(date - chrono::Duration::days(i64::from(k)))
        .flatten()
}

/// OLS slope of (day-index, value) over the most recent `window` non-null
/// points at dates `<= d`; null with fewer than two points.
pub fn trend_slope(series: &DailyMetricSeries, date: NaiveDate, window: u32) -> Option<f64> {
    let recent = series.recent_observed(date, window as usize);
    if recent.len() < 2 {
        return None;
    }
    let origin = recent[0].0;
    let xs: Vec<f64> = recent
        .iter()
        .map(|(d, _)| (*d - origin).num_days() as f64)
        .collect();
    let ys: Vec<f64> = recent.iter().map(|(_, v)| *v).collect();
    stats::ols_slope(&xs, &ys)
}
