//! Multi-regressor least squares used to residualize metrics for partial
//! correlation.
//!
//! Solves the normal equations with a Cholesky decomposition; the design
//! matrix always carries an intercept column.

use crate::error::{InsightError, Result};

/// Fitted least-squares coefficients.
#[derive(Debug, Clone)]
pub struct LinearFit {
    /// Intercept term.
    pub intercept: f64,
    /// One coefficient per regressor column, in input order.
    pub coefficients: Vec<f64>,
}

impl LinearFit {
    /// Fitted values for the given regressor columns.
    pub fn predict(&self, columns: &[Vec<f64>]) -> Result<Vec<f64>> {
        if columns.len() != self.coefficients.len() {
            return Err(InsightError::DimensionMismatch {
                expected: self.coefficients.len(),
                got: columns.len(),
            });
        }
        let n = columns.first().map_or(0, |c| c.len());
        let mut fitted = vec![self.intercept; n];
        for (coef, col) in self.coefficients.iter().zip(columns) {
            if col.len() != n {
                return Err(InsightError::DimensionMismatch {
                    expected: n,
                    got: col.len(),
                });
            }
            for (f, x) in fitted.iter_mut().zip(col) {
                *f += coef * x;
            }
        }
        Ok(fitted)
    }
}

/// Fit `y = intercept + X beta` where `columns` are the regressor columns.
///
/// An empty column set degenerates to fitting the mean of `y`.
pub fn fit(y: &[f64], columns: &[Vec<f64>]) -> Result<LinearFit> {
    let n = y.len();
    if n == 0 {
        return Err(InsightError::EmptyData);
    }
    for col in columns {
        if col.len() != n {
            return Err(InsightError::DimensionMismatch {
                expected: n,
                got: col.len(),
            });
        }
    }

    let k = columns.len();
    if k == 0 {
        return Ok(LinearFit {
            intercept: y.iter().sum::<f64>() / n as f64,
            coefficients: Vec::new(),
        });
    }

    // Normal equations X'X beta = X'y over [1, x_1, .., x_k].
    let p = k + 1;
    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];

    for obs in 0..n {
        xtx[0][0] += 1.0;
        for i in 0..k {
            let xi = columns[i][obs];
            xtx[0][i + 1] += xi;
            xtx[i + 1][0] += xi;
            for j in 0..k {
                xtx[i + 1][j + 1] += xi * columns[j][obs];
            }
        }
        xty[0] += y[obs];
        for i in 0..k {
            xty[i + 1] += columns[i][obs] * y[obs];
        }
    }

    // Small ridge on the diagonal for numerical stability.
    for i in 0..p {
        xtx[i][i] += 1e-8;
    }

    let beta = solve_symmetric(&xtx, &xty).ok_or_else(|| {
        InsightError::NumericDegenerate("regression system is not positive definite".to_string())
    })?;

    Ok(LinearFit {
        intercept: beta[0],
        coefficients: beta[1..].to_vec(),
    })
}

/// Residuals `y - y_hat` after removing the least-squares fit on `columns`.
pub fn residuals(y: &[f64], columns: &[Vec<f64>]) -> Result<Vec<f64>> {
    let fit = fit(y, columns)?;
    if columns.is_empty() {
        // Mean-only fit: predict cannot infer the row count without columns.
        return Ok(y.iter().map(|yi| yi - fit.intercept).collect());
    }
    let fitted = fit.predict(columns)?;
    Ok(y.iter().zip(fitted.iter()).map(|(yi, fi)| yi - fi).collect())
}

/// Solve `A x = b` for symmetric positive definite `A` via Cholesky.
fn solve_symmetric(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    if n == 0 || a.len() != n {
        return None;
    }

    // A = L L'
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    // L z = b
    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i][j] * z[j];
        }
        z[i] = sum / l[i][i];
    }

    // L' x = z
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = z[i];
        for j in (i + 1)..n {
            sum -= l[j][i] * x[j];
        }
        x[i] = sum / l[i][i];
    }

    Some(x)
}
