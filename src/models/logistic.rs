//! # Regresión Logística
//! src/models/logistic.rs
//!
//! Descenso de gradiente por lotes sobre features estandarizadas con
//! penalización L2 (`1 / (c * n)`). Más de dos clases se resuelven
//! uno-contra-resto. `predict` devuelve etiquetas de clase.

use crate::error::{JobError, Result};
use crate::models::frame::Matrix;
use crate::models::linear::dot;
use crate::models::Estimator;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogisticParams {
    pub c: f64,
    pub max_iter: usize,
    pub learning_rate: f64,
    pub fit_intercept: bool,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            learning_rate: 0.1,
            fit_intercept: true,
        }
    }
}

/// Tope de iteraciones de descenso de gradiente
pub const MAX_ITER: usize = 1_000_000;

impl LogisticParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.c > 0.0) {
            return Err(JobError::InvalidArgument("c must be > 0".to_string()));
        }
        if self.max_iter == 0 || self.max_iter > MAX_ITER {
            return Err(JobError::InvalidArgument(format!(
                "max_iter must be between 1 and {}",
                MAX_ITER
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(JobError::InvalidArgument("learning_rate must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Media y desviación por columna
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Scaler {
    pub fn fit(x: &Matrix) -> Self {
        let n = x.len() as f64;
        let width = x.first().map(|r| r.len()).unwrap_or(0);

        let means: Vec<f64> = (0..width)
            .map(|j| x.iter().map(|r| r[j]).sum::<f64>() / n)
            .collect();
        let stds = (0..width)
            .map(|j| {
                let var = x.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / n;
                // Columnas constantes se dejan sin escalar
                if var > 0.0 {
                    var.sqrt()
                } else {
                    1.0
                }
            })
            .collect();

        Self { means, stds }
    }

    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.means.len() {
            return Err(JobError::InvalidData(format!(
                "expected {} features, got {}",
                self.means.len(),
                row.len()
            )));
        }
        Ok(row
            .iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Etiquetas distintas, ordenadas
pub(crate) fn distinct_classes(y: &[f64]) -> Result<Vec<f64>> {
    let mut classes = y.to_vec();
    classes.sort_by(f64::total_cmp);
    classes.dedup();
    if classes.len() < 2 {
        return Err(JobError::InvalidData(
            "classification needs at least two distinct target values".to_string(),
        ));
    }
    Ok(classes)
}

/// Índice de la clase positiva de cada modelo binario
pub(crate) fn positive_classes(classes: &[f64]) -> Vec<usize> {
    if classes.len() == 2 {
        vec![1]
    } else {
        (0..classes.len()).collect()
    }
}

/// Elige la etiqueta a partir de las probabilidades de cada modelo binario
pub(crate) fn pick_label(classes: &[f64], probabilities: &[f64]) -> f64 {
    if classes.len() == 2 {
        if probabilities[0] >= 0.5 {
            classes[1]
        } else {
            classes[0]
        }
    } else {
        let best = probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        classes[best]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub params: LogisticParams,
    pub classes: Vec<f64>,
    pub scaler: Scaler,
    pub weights: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

impl LogisticRegression {
    pub fn new(params: LogisticParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            scaler: Scaler::default(),
            weights: Vec::new(),
            intercepts: Vec::new(),
        }
    }

    fn fit_binary(&self, x: &Matrix, t: &[f64]) -> (Vec<f64>, f64) {
        let n = x.len() as f64;
        let width = x.first().map(|r| r.len()).unwrap_or(0);
        let lambda = 1.0 / (self.params.c * n);
        let lr = self.params.learning_rate;

        let mut w = vec![0.0; width];
        let mut b = 0.0;

        for _ in 0..self.params.max_iter {
            let mut grad_w = vec![0.0; width];
            let mut grad_b = 0.0;

            for (row, target) in x.iter().zip(t) {
                let err = sigmoid(dot(row, &w) + b) - target;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }

            for (wj, g) in w.iter_mut().zip(&grad_w) {
                *wj -= lr * (g / n + lambda * *wj);
            }
            if self.params.fit_intercept {
                b -= lr * grad_b / n;
            }
        }

        (w, b)
    }
}

impl Estimator for LogisticRegression {
    fn fit(&mut self, x: &Matrix, y: &[f64]) -> Result<()> {
        let classes = distinct_classes(y)?;
        let scaler = Scaler::fit(x);
        let scaled = x
            .iter()
            .map(|row| scaler.transform(row))
            .collect::<Result<Matrix>>()?;

        let mut weights = Vec::new();
        let mut intercepts = Vec::new();
        for positive in positive_classes(&classes) {
            let t: Vec<f64> = y
                .iter()
                .map(|v| if *v == classes[positive] { 1.0 } else { 0.0 })
                .collect();
            let (w, b) = self.fit_binary(&scaled, &t);
            weights.push(w);
            intercepts.push(b);
        }

        self.classes = classes;
        self.scaler = scaler;
        self.weights = weights;
        self.intercepts = intercepts;
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>> {
        x.iter()
            .map(|row| {
                let scaled = self.scaler.transform(row)?;
                let probabilities: Vec<f64> = self
                    .weights
                    .iter()
                    .zip(&self.intercepts)
                    .map(|(w, b)| sigmoid(dot(&scaled, w) + b))
                    .collect();
                Ok(pick_label(&self.classes, &probabilities))
            })
            .collect()
    }
}
