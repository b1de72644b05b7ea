//! Spearman rank correlation with two-sided significance.

use crate::error::{InsightError, Result};
use crate::utils::stats::average_ranks;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Minimum paired sample size for a rank correlation.
pub const MIN_SAMPLES: usize = 3;

/// A rank correlation coefficient with its two-sided p-value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spearman {
    pub rho: f64,
    pub p_value: f64,
}

/// Spearman rank correlation between paired samples.
///
/// Ranks use the average-tie convention; the p-value tests rho against zero
/// via a Student-t statistic with `n - 2` degrees of freedom.
///
/// Returns `Ok(None)` when either side has zero rank variance (all values
/// tied), so numerically degenerate input is resolved silently rather than
/// raised. Fails with `InsufficientData` when `n < 3`.
pub fn spearman(x: &[f64], y: &[f64]) -> Result<Option<Spearman>> {
    spearman_with_df(x, y, x.len().saturating_sub(2))
}

/// Spearman correlation whose p-value uses caller-supplied degrees of
/// freedom (partial correlation adjusts for the number of controls).
pub fn spearman_with_df(x: &[f64], y: &[f64], df: usize) -> Result<Option<Spearman>> {
    if x.len() != y.len() {
        return Err(InsightError::DimensionMismatch {
            expected: x.len(),
            got: y.len(),
        });
    }
    if x.len() < MIN_SAMPLES {
        return Err(InsightError::InsufficientData {
            needed: MIN_SAMPLES,
            got: x.len(),
        });
    }

    let Some(rho) = rank_rho(x, y) else {
        return Ok(None);
    };
    Ok(Some(Spearman {
        rho,
        p_value: two_sided_p(rho, df),
    }))
}

/// Pearson correlation of the two samples' average-tied ranks.
///
/// `None` when either rank vector has zero variance.
fn rank_rho(x: &[f64], y: &[f64]) -> Option<f64> {
    let rx = average_ranks(x);
    let ry = average_ranks(y);
    let n = rx.len() as f64;

    let mean_x = rx.iter().sum::<f64>() / n;
    let mean_y = ry.iter().sum::<f64>() / n;

    let mut ss_x = 0.0;
    let mut ss_y = 0.0;
    let mut ss_xy = 0.0;
    for (a, b) in rx.iter().zip(ry.iter()) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        ss_x += dx * dx;
        ss_y += dy * dy;
        ss_xy += dx * dy;
    }

    if ss_x < 1e-12 || ss_y < 1e-12 {
        return None;
    }
    // Clamp against floating-point drift just past +/-1.
    Some((ss_xy / (ss_x * ss_y).sqrt()).clamp(-1.0, 1.0))
}

/// Two-sided p-value for rho via the t-statistic `rho * sqrt(df / (1-rho^2))`.
fn two_sided_p(rho: f64, df: usize) -> f64 {
    if df == 0 {
        return f64::NAN;
    }
    let denom = 1.0 - rho * rho;
    if denom < 1e-12 {
        // |rho| == 1: perfectly monotone.
        return 0.0;
    }
    let t = rho * (df as f64 / denom).sqrt();
    match StudentsT::new(0.0, 1.0, df as f64) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => f64::NAN,
    }
}
