//! Batch materialization of derived feature rows.

use crate::core::{DailyMetricSeries, DateRange, SeriesAccessor};
use crate::error::Result;
use crate::features::rolling;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// The full rolling-window set used by default.
pub const DEFAULT_WINDOWS: [u32; 4] = [3, 7, 14, 28];

/// Deepest lag materialized by default.
pub const DEFAULT_LAG_DEPTH: u32 = 7;

/// Configuration for feature materialization.
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    /// Rolling windows, in days. Metric-dependent subsets of {3, 7, 14, 28}.
    pub windows: Vec<u32>,
    /// Lags 1..=lag_depth are materialized.
    pub lag_depth: u32,
    /// Number of recent non-null points the trend slope is fitted over.
    pub trend_window: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            windows: DEFAULT_WINDOWS.to_vec(),
            lag_depth: DEFAULT_LAG_DEPTH,
            trend_window: 7,
        }
    }
}

impl FeatureConfig {
    pub fn windows(mut self, windows: Vec<u32>) -> Self {
        self.windows = windows;
        self
    }

    pub fn lag_depth(mut self, depth: u32) -> Self {
        self.lag_depth = depth;
        self
    }

    pub fn trend_window(mut self, window: u32) -> Self {
        self.trend_window = window;
        self
    }

    /// Calendar days of history needed before a target date.
    fn lead_in_days(&self) -> i64 {
        let deepest = self
            .windows
            .iter()
            .copied()
            .chain([self.lag_depth, self.trend_window])
            .max()
            .unwrap_or(0);
        i64::from(deepest)
    }
}

/// Derived features for one (metric, date).
///
/// Maps are keyed by window/lag depth and only hold computable entries, so a
/// null feature is simply absent. Ordered keys keep recomputation output
/// byte-identical for identical input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatureSet {
    pub date: NaiveDate,
    /// Rolling mean per window.
    pub rolling_mean: BTreeMap<u32, f64>,
    /// Rolling sample standard deviation per window.
    pub rolling_std: BTreeMap<u32, f64>,
    /// Value minus the 7-day rolling mean.
    pub delta_vs_rm7: Option<f64>,
    /// Raw value `k` days back, per lag depth.
    pub lags: BTreeMap<u32, f64>,
    /// OLS slope over the most recent trend window.
    pub trend_slope: Option<f64>,
}

/// Compute the feature row for one date of one metric's series.
pub fn compute_row(
    series: &DailyMetricSeries,
    date: NaiveDate,
    config: &FeatureConfig,
) -> DerivedFeatureSet {
    let mut rolling_mean = BTreeMap::new();
    let mut rolling_std = BTreeMap::new();
    for &w in &config.windows {
        if let Some(m) = rolling::rolling_mean(series, date, w) {
            rolling_mean.insert(w, m);
        }
        if let Some(s) = rolling::rolling_std(series, date, w) {
            rolling_std.insert(w, s);
        }
    }

    let mut lags = BTreeMap::new();
    for k in 1..=config.lag_depth {
        if let Some(v) = rolling::lag(series, date, k) {
            lags.insert(k, v);
        }
    }

    DerivedFeatureSet {
        date,
        rolling_mean,
        rolling_std,
        delta_vs_rm7: rolling::delta_vs_rm7(series, date),
        lags,
        trend_slope: rolling::trend_slope(series, date, config.trend_window),
    }
}

/// One derived feature column, addressable for re-export as a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureColumn {
    RollingMean(u32),
    RollingStd(u32),
    DeltaVsRm7,
    Lag(u32),
    TrendSlope,
}

impl FeatureColumn {
    fn extract(&self, row: &DerivedFeatureSet) -> Option<f64> {
        match self {
            FeatureColumn::RollingMean(w) => row.rolling_mean.get(w).copied(),
            FeatureColumn::RollingStd(w) => row.rolling_std.get(w).copied(),
            FeatureColumn::DeltaVsRm7 => row.delta_vs_rm7,
            FeatureColumn::Lag(k) => row.lags.get(k).copied(),
            FeatureColumn::TrendSlope => row.trend_slope,
        }
    }
}

/// Destination for materialized feature rows.
pub trait FeatureStore {
    /// Insert or overwrite the row for (metric, row.date).
    fn upsert(&mut self, metric: &str, row: DerivedFeatureSet);

    /// The stored row for (metric, date), if any.
    fn get(&self, metric: &str, date: NaiveDate) -> Option<&DerivedFeatureSet>;
}

/// In-memory feature store.
///
/// Doubles as a read model: a stored feature column can be re-exposed as a
/// [`DailyMetricSeries`] so derived features are first-class inputs to the
/// correlation engine.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFeatureStore {
    rows: BTreeMap<String, BTreeMap<NaiveDate, DerivedFeatureSet>>,
}

impl InMemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored rows for a metric, in date order.
    pub fn rows(&self, metric: &str) -> Vec<&DerivedFeatureSet> {
        self.rows
            .get(metric)
            .map(|m| m.values().collect())
            .unwrap_or_default()
    }

    /// A stored feature column as a daily series. Dates with a row but
    /// without the feature carry a null value.
    pub fn feature_series(&self, metric: &str, column: FeatureColumn) -> DailyMetricSeries {
        let pairs: Vec<(NaiveDate, Option<f64>)> = self
            .rows
            .get(metric)
            .map(|m| {
                m.values()
                    .map(|row| (row.date, column.extract(row)))
                    .collect()
            })
            .unwrap_or_default();
        // Rows are stored keyed by date, so pairs are already ordered.
        DailyMetricSeries::from_pairs(pairs).unwrap_or_else(|_| DailyMetricSeries::empty())
    }
}

impl FeatureStore for InMemoryFeatureStore {
    fn upsert(&mut self, metric: &str, row: DerivedFeatureSet) {
        self.rows
            .entry(metric.to_string())
            .or_default()
            .insert(row.date, row);
    }

    fn get(&self, metric: &str, date: NaiveDate) -> Option<&DerivedFeatureSet> {
        self.rows.get(metric)?.get(&date)
    }
}

/// One date that failed during batch computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFailure {
    pub metric: String,
    pub date: NaiveDate,
    pub reason: String,
}

/// Outcome of a batch feature computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Rows successfully written, across all requested metrics.
    pub dates_processed: usize,
    /// Dates skipped, with reasons. Never aborts the rest of the batch.
    pub failures: Vec<FeatureFailure>,
}

/// Materialize feature rows for `metrics` over `range`.
///
/// Pulls enough lead-in history to fill the deepest window, writes one row
/// per in-range date through `store`, and reports per-date failures instead
/// of aborting on the first one. Recomputation over identical raw input is
/// idempotent. Unknown metric names fail the whole call up front.
pub fn compute_features<A, S>(
    accessor: &A,
    store: &mut S,
    metrics: &[&str],
    range: &DateRange,
    config: &FeatureConfig,
) -> Result<BatchReport>
where
    A: SeriesAccessor + ?Sized,
    S: FeatureStore + ?Sized,
{
    let mut report = BatchReport::default();

    for &metric in metrics {
        let series = accessor.get_series(metric, &range.with_lead_in(config.lead_in_days()))?;
        let mut written = 0usize;

        for point in series.points() {
            if !range.contains(point.date) {
                continue;
            }
            if let Some(v) = point.value {
                if !v.is_finite() {
                    report.failures.push(FeatureFailure {
                        metric: metric.to_string(),
                        date: point.date,
                        reason: format!("non-finite value {v}"),
                    });
                    continue;
                }
            }
            store.upsert(metric, compute_row(&series, point.date, config));
            written += 1;
        }

        debug!(metric, rows = written, "materialized feature rows");
        report.dates_processed += written;
    }

    info!(
        metrics = metrics.len(),
        dates_processed = report.dates_processed,
        failures = report.failures.len(),
        "feature batch complete"
    );
    Ok(report)
}
