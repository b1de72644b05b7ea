//! Pattern detection: change points, anomalies, and weekly clustering.

pub mod anomaly;
pub mod changepoint;
pub mod clustering;

pub use anomaly::{anomalies, Anomaly, AnomalyDirection, DEFAULT_THRESHOLD};
pub use changepoint::{change_points, ChangePoint, ShiftDirection};
pub use clustering::{
    weekly_clusters, WeeklyClusterAssignment, WeeklyClusterResult, DEFAULT_SEED,
};
