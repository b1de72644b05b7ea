//! Daily metric series and date-range types.

use crate::error::{InsightError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One observation: a calendar date and a possibly-null value.
///
/// A present date with a `None` value means the day was recorded but the
/// metric itself was unavailable. Days without any record are simply absent
/// from the series, never stored as zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

/// An inclusive calendar date range. `None` bounds mean "unbounded", so
/// `DateRange::all()` selects the full available history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Full available history.
    pub fn all() -> Self {
        Self::default()
    }

    /// Both bounds set (inclusive).
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Open-ended range starting at `start`.
    pub fn from(start: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Open-ended range ending at `end`.
    pub fn until(end: NaiveDate) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    /// Whether `date` falls within the range.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }

    /// Range with the start bound pushed back by `days` (for rolling-window
    /// lead-in history). Unbounded starts stay unbounded.
    pub fn with_lead_in(&self, days: i64) -> Self {
        Self {
            start: self.start.map(|s| s - chrono::Duration::days(days)),
            end: self.end,
        }
    }
}

/// A date-ordered sequence of daily observations for one metric.
///
/// Dates are strictly increasing and unique; construction validates this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetricSeries {
    points: Vec<DailyPoint>,
}

impl DailyMetricSeries {
    /// Create a series from date-ordered points.
    pub fn new(points: Vec<DailyPoint>) -> Result<Self> {
        for pair in points.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(InsightError::InvalidParameter(
                    "series dates must be strictly increasing".to_string(),
                ));
            }
        }
        Ok(Self { points })
    }

    /// Create a series from `(date, value)` pairs, sorting by date first.
    pub fn from_pairs(mut pairs: Vec<(NaiveDate, Option<f64>)>) -> Result<Self> {
        pairs.sort_by_key(|(d, _)| *d);
        Self::new(
            pairs
                .into_iter()
                .map(|(date, value)| DailyPoint { date, value })
                .collect(),
        )
    }

    /// An empty series.
    pub fn empty() -> Self {
        Self { points: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[DailyPoint] {
        &self.points
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// The value recorded on an exact date. Outer `None` means the date is
    /// absent; inner `None` means recorded-but-null.
    pub fn value_on(&self, date: NaiveDate) -> Option<Option<f64>> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|i| self.points[i].value)
    }

    /// Non-null observations as `(date, value)` pairs, in date order.
    pub fn observed(&self) -> Vec<(NaiveDate, f64)> {
        self.points
            .iter()
            .filter_map(|p| p.value.map(|v| (p.date, v)))
            .collect()
    }

    /// Count of non-null observations.
    pub fn observed_len(&self) -> usize {
        self.points.iter().filter(|p| p.value.is_some()).count()
    }

    /// The sub-series falling inside `range`.
    pub fn slice(&self, range: &DateRange) -> Self {
        Self {
            points: self
                .points
                .iter()
                .filter(|p| range.contains(p.date))
                .copied()
                .collect(),
        }
    }

    /// Non-null values within the calendar span `[end - days + 1, end]`.
    ///
    /// The span is calendar-based: absent days shrink the sample but never
    /// shift the window boundary.
    pub fn window_values(&self, end: NaiveDate, days: u32) -> Vec<f64> {
        let start = end - chrono::Duration::days(i64::from(days) - 1);
        self.points
            .iter()
            .filter(|p| p.date >= start && p.date <= end)
            .filter_map(|p| p.value)
            .collect()
    }

    /// The most recent `count` non-null observations at dates `<= end`,
    /// in date order.
    pub fn recent_observed(&self, end: NaiveDate, count: usize) -> Vec<(NaiveDate, f64)> {
        let mut recent: Vec<(NaiveDate, f64)> = self
            .points
            .iter()
            .rev()
            .filter(|p| p.date <= end)
            .filter_map(|p| p.value.map(|v| (p.date, v)))
            .take(count)
            .collect();
        recent.reverse();
        recent
    }
}
