//! Core data model: daily series, date ranges, and the accessor boundary.

pub mod registry;
pub mod series;

pub use registry::{MetricTable, SeriesAccessor};
pub use series::{DailyMetricSeries, DailyPoint, DateRange};
