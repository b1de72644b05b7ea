//! Robust z-score anomaly detection.
//!
//! Baseline: the trailing 28-calendar-day window ending at (and including)
//! the flagged date, falling back to the full requested history while the
//! series spans fewer than 28 days. The z-score is the modified
//! (median/MAD) form, with the mean-absolute-deviation fallback when the MAD
//! collapses to zero; a baseline with zero spread in both senses suppresses
//! flags entirely rather than dividing by zero.

use crate::core::{DateRange, SeriesAccessor};
use crate::error::{InsightError, Result};
use crate::utils::stats;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Trailing baseline window, in calendar days.
pub const BASELINE_WINDOW_DAYS: u32 = 28;

/// Default |z| threshold for flagging.
pub const DEFAULT_THRESHOLD: f64 = 3.0;

/// Minimum observed values before detection is meaningful.
const MIN_OBSERVATIONS: usize = 3;

/// Scale factor making the MAD consistent with a normal std dev.
const MAD_SCALE: f64 = 0.6745;

/// Scale factor for the mean-absolute-deviation fallback.
const MEAN_AD_SCALE: f64 = 1.253_314;

/// Direction of an anomalous deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyDirection {
    High,
    Low,
}

/// One flagged observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub date: NaiveDate,
    pub value: f64,
    pub z_score: f64,
    pub direction: AnomalyDirection,
}

/// Flag dates whose robust z-score exceeds `threshold` in magnitude.
pub fn anomalies<A>(
    accessor: &A,
    metric: &str,
    threshold: f64,
    range: &DateRange,
) -> Result<Vec<Anomaly>>
where
    A: SeriesAccessor + ?Sized,
{
    if !(threshold > 0.0) {
        return Err(InsightError::InvalidParameter(
            "threshold must be positive".to_string(),
        ));
    }

    let series = accessor.get_series(metric, range)?;
    let observed = series.observed();
    if observed.len() < MIN_OBSERVATIONS {
        return Err(InsightError::InsufficientData {
            needed: MIN_OBSERVATIONS,
            got: observed.len(),
        });
    }

    let span_days = match (series.first_date(), series.last_date()) {
        (Some(first), Some(last)) => (last - first).num_days() + 1,
        _ => 0,
    };
    let use_global = span_days < i64::from(BASELINE_WINDOW_DAYS);
    let global_baseline: Vec<f64> = observed.iter().map(|(_, v)| *v).collect();

    let mut flags = Vec::new();
    for &(date, value) in &observed {
        let baseline = if use_global {
            global_baseline.clone()
        } else {
            series.window_values(date, BASELINE_WINDOW_DAYS)
        };
        if baseline.len() < MIN_OBSERVATIONS {
            continue;
        }
        let Some(z) = robust_z(value, &baseline) else {
            continue;
        };
        if z.abs() >= threshold {
            flags.push(Anomaly {
                date,
                value,
                z_score: z,
                direction: if z > 0.0 {
                    AnomalyDirection::High
                } else {
                    AnomalyDirection::Low
                },
            });
        }
    }

    debug!(metric, n = observed.len(), flagged = flags.len(), "anomaly detection");
    Ok(flags)
}

/// Modified z-score of `value` against `baseline`.
///
/// `None` when the baseline has zero spread by both the MAD and the
/// mean-absolute-deviation measure.
fn robust_z(value: f64, baseline: &[f64]) -> Option<f64> {
    let med = stats::median(baseline);
    let mad = stats::median_abs_deviation(baseline);
    if mad > 1e-10 {
        return Some(MAD_SCALE * (value - med) / mad);
    }
    let mean_ad =
        baseline.iter().map(|x| (x - med).abs()).sum::<f64>() / baseline.len() as f64;
    if mean_ad > 1e-10 {
        return Some((value - med) / (MEAN_AD_SCALE * mean_ad));
    }
    None
}
