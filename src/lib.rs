//! # vital-insights
//!
//! Statistical pattern detection over personal daily health metrics.
//!
//! Provides per-metric feature engineering (rolling means and deviations,
//! deltas, lags, trend slopes), rank-based correlation analysis (including
//! lagged and partial variants plus full matrices), change-point detection,
//! robust anomaly flagging, and weekly k-means clustering. All computation
//! is deterministic for a given input and seed.

#![allow(clippy::needless_range_loop)]

pub mod core;
pub mod correlation;
pub mod error;
pub mod features;
pub mod patterns;
pub mod utils;

pub use error::{InsightError, Result};

pub mod prelude {
    pub use crate::core::{DailyMetricSeries, DateRange, MetricTable, SeriesAccessor};
    pub use crate::correlation::{
        correlation_matrix, lagged_correlation, partial_correlation, rank_correlations,
    };
    pub use crate::error::{InsightError, Result};
    pub use crate::features::{compute_features, FeatureConfig, InMemoryFeatureStore};
    pub use crate::patterns::{anomalies, change_points, weekly_clusters};
}
