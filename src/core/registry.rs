//! Metric registry and the series-accessor boundary.

use crate::core::series::{DailyMetricSeries, DateRange};
use crate::error::{InsightError, Result};
use std::collections::BTreeMap;

/// Supplies date-ordered daily series for named metrics.
///
/// This is the boundary to the surrounding service (SQL tables, API caches,
/// materialized feature rows). Lookups of unregistered names fail with
/// [`InsightError::UnknownMetric`] instead of returning empty data, so typos
/// surface at the boundary rather than as silently empty analyses.
pub trait SeriesAccessor {
    /// The series for `metric` restricted to `range`, full history when the
    /// range is unbounded.
    fn get_series(&self, metric: &str, range: &DateRange) -> Result<DailyMetricSeries>;

    /// Registered metric names, sorted.
    fn metric_names(&self) -> Vec<String>;
}

/// An immutable in-memory snapshot of metric series.
///
/// Every analytical request works against one of these; there is no shared
/// mutable cache across requests.
#[derive(Debug, Clone, Default)]
pub struct MetricTable {
    series: BTreeMap<String, DailyMetricSeries>,
}

impl MetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a metric series, replacing any previous series of that name.
    pub fn insert(&mut self, metric: impl Into<String>, series: DailyMetricSeries) {
        self.series.insert(metric.into(), series);
    }

    /// Build a table from `(name, series)` pairs.
    pub fn from_series(
        entries: impl IntoIterator<Item = (String, DailyMetricSeries)>,
    ) -> Self {
        Self {
            series: entries.into_iter().collect(),
        }
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.series.contains_key(metric)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl SeriesAccessor for MetricTable {
    fn get_series(&self, metric: &str, range: &DateRange) -> Result<DailyMetricSeries> {
        let series = self
            .series
            .get(metric)
            .ok_or_else(|| InsightError::UnknownMetric(metric.to_string()))?;
        Ok(series.slice(range))
    }

    fn metric_names(&self) -> Vec<String> {
        self.series.keys().cloned().collect()
    }
}
