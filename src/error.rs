//! Error types for the vital-insights library.

use thiserror::Error;

/// Result type alias for analytical operations.
pub type Result<T> = std::result::Result<T, InsightError>;

/// Errors that can occur during feature engineering or pattern analysis.
///
/// All errors are local to a single request; none are fatal to the process.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InsightError {
    /// Input data is empty.
    #[error("empty input data")]
    EmptyData,

    /// Sample size below the statistical minimum for the requested test.
    #[error("insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Metric name not present in the series registry.
    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Dimension mismatch between data structures.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Numerically degenerate input (e.g. a singular regression system).
    #[error("numerically degenerate input: {0}")]
    NumericDegenerate(String),
}
