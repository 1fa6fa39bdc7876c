//! # Regresión Lineal
//! src/models/linear.rs
//!
//! Mínimos cuadrados ordinarios resolviendo las ecuaciones normales
//! `(XᵀX) w = Xᵀy` por eliminación gaussiana con pivoteo parcial.

use crate::error::{JobError, Result};
use crate::models::frame::Matrix;
use crate::models::Estimator;
use serde::{Deserialize, Serialize};

/// Hiperparámetros aceptados al crear el modelo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinearParams {
    pub fit_intercept: bool,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self { fit_intercept: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    pub params: LinearParams,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LinearRegression {
    pub fn new(params: LinearParams) -> Self {
        Self {
            params,
            coefficients: Vec::new(),
            intercept: 0.0,
        }
    }
}

impl Estimator for LinearRegression {
    fn fit(&mut self, x: &Matrix, y: &[f64]) -> Result<()> {
        let design: Matrix = x
            .iter()
            .map(|row| {
                let mut r = row.clone();
                if self.params.fit_intercept {
                    r.push(1.0);
                }
                r
            })
            .collect();

        let weights = least_squares(&design, y)?;

        if self.params.fit_intercept {
            let (coef, intercept) = weights.split_at(weights.len() - 1);
            self.coefficients = coef.to_vec();
            self.intercept = intercept[0];
        } else {
            self.coefficients = weights;
            self.intercept = 0.0;
        }

        Ok(())
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>> {
        x.iter()
            .map(|row| {
                if row.len() != self.coefficients.len() {
                    return Err(JobError::InvalidData(format!(
                        "expected {} features, got {}",
                        self.coefficients.len(),
                        row.len()
                    )));
                }
                Ok(dot(row, &self.coefficients) + self.intercept)
            })
            .collect()
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Resuelve mínimos cuadrados. Si `XᵀX` es singular se reintenta con una
/// pequeña regularización en la diagonal.
fn least_squares(x: &Matrix, y: &[f64]) -> Result<Vec<f64>> {
    let n_features = x.first().map(|r| r.len()).unwrap_or(0);
    if n_features == 0 {
        return Err(JobError::InvalidData("no features to fit".to_string()));
    }

    let mut xtx = vec![vec![0.0; n_features]; n_features];
    let mut xty = vec![0.0; n_features];
    for (row, target) in x.iter().zip(y) {
        for i in 0..n_features {
            xty[i] += row[i] * target;
            for j in 0..n_features {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }

    if let Some(w) = solve(xtx.clone(), xty.clone()) {
        return Ok(w);
    }

    let trace: f64 = (0..n_features).map(|i| xtx[i][i]).sum();
    let ridge = 1e-8 * trace.max(1.0);
    for (i, row) in xtx.iter_mut().enumerate() {
        row[i] += ridge;
    }

    solve(xtx, xty).ok_or_else(|| JobError::InvalidData("singular design matrix".to_string()))
}

fn solve(mut a: Matrix, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut w = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * w[k]).sum();
        w[row] = (b[row] - tail) / a[row][row];
    }

    Some(w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_exact_line() {
        let mut model = LinearRegression::new(LinearParams::default());
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        model.fit(&x, &[2.0, 4.0, 6.0]).unwrap();

        let pred = model.predict(&vec![vec![4.0]]).unwrap();
        assert!((pred[0] - 8.0).abs() < 1e-6);
        assert!(model.intercept.abs() < 1e-6);
    }

    #[test]
    fn test_two_features_with_intercept() {
        // y = 3a - b + 5
        let x = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![2.0, 3.0],
            vec![4.0, 1.0],
            vec![-1.0, 2.0],
        ];
        let y: Vec<f64> = x.iter().map(|r| 3.0 * r[0] - r[1] + 5.0).collect();

        let mut model = LinearRegression::new(LinearParams::default());
        model.fit(&x, &y).unwrap();

        assert!((model.coefficients[0] - 3.0).abs() < 1e-6);
        assert!((model.coefficients[1] + 1.0).abs() < 1e-6);
        assert!((model.intercept - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_without_intercept() {
        let mut model = LinearRegression::new(LinearParams { fit_intercept: false });
        model.fit(&vec![vec![1.0], vec![2.0]], &[3.0, 6.0]).unwrap();
        assert_eq!(model.intercept, 0.0);
        assert!((model.coefficients[0] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicated_column_still_fits() {
        let x = vec![vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]];
        let mut model = LinearRegression::new(LinearParams::default());
        model.fit(&x, &[2.0, 4.0, 6.0]).unwrap();

        let pred = model.predict(&vec![vec![4.0, 4.0]]).unwrap();
        assert!((pred[0] - 8.0).abs() < 1e-3);
    }

    #[test]
    fn test_predict_wrong_width() {
        let mut model = LinearRegression::new(LinearParams::default());
        model.fit(&vec![vec![1.0], vec![2.0]], &[1.0, 2.0]).unwrap();
        assert!(model.predict(&vec![vec![1.0, 2.0]]).is_err());
    }
}
