//! Feature engineering: rolling statistics, deltas, lags, and trend slopes
//! derived per metric per date, plus batch materialization.

pub mod engine;
pub mod rolling;

pub use engine::{
    compute_features, compute_row, BatchReport, DerivedFeatureSet, FeatureColumn, FeatureConfig,
    FeatureFailure, FeatureStore, InMemoryFeatureStore, DEFAULT_LAG_DEPTH, DEFAULT_WINDOWS,
};
