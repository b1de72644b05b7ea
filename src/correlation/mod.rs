//! Correlation engine: rank, lagged, partial, and matrix correlations.

pub mod engine;
pub mod spearman;

pub use engine::{
    correlation_matrix, lagged_correlation, partial_correlation, rank_correlations,
    CorrelationMatrix, CorrelationResult, LagCorrelation, LaggedCorrelationResult,
    PartialCorrelationResult,
};
pub use spearman::{spearman, Spearman, MIN_SAMPLES};
