//! # Gradient Boosting
//! src/models/boosting.rs
//!
//! Ensambles de árboles de regresión de profundidad limitada.
//!
//! - Regresión: pérdida cuadrática, inicializa en la media.
//! - Clasificación: pérdida logística, uno-contra-resto para más de dos
//!   clases, hojas con un paso de Newton `Σr / Σp(1-p)`.

use crate::error::{JobError, Result};
use crate::models::frame::Matrix;
use crate::models::logistic::{distinct_classes, pick_label, positive_classes, sigmoid};
use crate::models::Estimator;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_split: 2,
        }
    }
}

/// Límites de los hiperparámetros; un ensamble más grande no entra en memoria
pub const MAX_ESTIMATORS: usize = 10_000;
pub const MAX_DEPTH: usize = 32;

impl BoostingParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 || self.n_estimators > MAX_ESTIMATORS {
            return Err(JobError::InvalidArgument(format!(
                "n_estimators must be between 1 and {}",
                MAX_ESTIMATORS
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(JobError::InvalidArgument("learning_rate must be > 0".to_string()));
        }
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH {
            return Err(JobError::InvalidArgument(format!(
                "max_depth must be between 1 and {}",
                MAX_DEPTH
            )));
        }
        if self.min_samples_split < 2 {
            return Err(JobError::InvalidArgument("min_samples_split must be >= 2".to_string()));
        }
        Ok(())
    }
}

// ==================== Árbol de regresión ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn eval(&self, row: &[f64]) -> f64 {
        match self {
            Node::Leaf { value } => *value,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.eval(row)
                } else {
                    right.eval(row)
                }
            }
        }
    }
}

struct TreeBuilder<'a> {
    x: &'a Matrix,
    residuals: &'a [f64],
    max_depth: usize,
    min_samples_split: usize,
    leaf_value: &'a dyn Fn(&[usize]) -> f64,
}

impl TreeBuilder<'_> {
    fn build(&self, samples: &mut [usize], depth: usize) -> Node {
        if depth >= self.max_depth || samples.len() < self.min_samples_split {
            return Node::Leaf {
                value: (self.leaf_value)(samples),
            };
        }

        let Some((feature, threshold)) = self.best_split(samples) else {
            return Node::Leaf {
                value: (self.leaf_value)(samples),
            };
        };

        // Particionar in-place: izquierda = valores <= threshold
        let mut boundary = 0;
        for i in 0..samples.len() {
            if self.x[samples[i]][feature] <= threshold {
                samples.swap(i, boundary);
                boundary += 1;
            }
        }
        let (left, right) = samples.split_at_mut(boundary);

        Node::Split {
            feature,
            threshold,
            left: Box::new(self.build(left, depth + 1)),
            right: Box::new(self.build(right, depth + 1)),
        }
    }

    /// Split con menor suma de errores cuadráticos, si mejora al nodo
    fn best_split(&self, samples: &[usize]) -> Option<(usize, f64)> {
        let width = self.x.first().map(|r| r.len()).unwrap_or(0);
        let n = samples.len() as f64;
        let total: f64 = samples.iter().map(|&i| self.residuals[i]).sum();
        let total_sq: f64 = samples.iter().map(|&i| self.residuals[i].powi(2)).sum();
        let parent_sse = total_sq - total * total / n;

        let mut best: Option<(usize, f64, f64)> = None;
        let mut order = samples.to_vec();

        for feature in 0..width {
            order.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

            let mut sum_left = 0.0;
            let mut sq_left = 0.0;
            for k in 1..order.len() {
                let r = self.residuals[order[k - 1]];
                sum_left += r;
                sq_left += r * r;

                let prev = self.x[order[k - 1]][feature];
                let next = self.x[order[k]][feature];
                if prev == next {
                    continue;
                }

                let n_left = k as f64;
                let n_right = n - n_left;
                let sum_right = total - sum_left;
                let sq_right = total_sq - sq_left;
                let sse = (sq_left - sum_left * sum_left / n_left)
                    + (sq_right - sum_right * sum_right / n_right);

                if best.map_or(true, |(_, _, b)| sse < b) {
                    best = Some((feature, (prev + next) / 2.0, sse));
                }
            }
        }

        best.filter(|(_, _, sse)| parent_sse - sse > 1e-12)
            .map(|(feature, threshold, _)| (feature, threshold))
    }
}

fn fit_tree(
    x: &Matrix,
    residuals: &[f64],
    params: &BoostingParams,
    leaf_value: &dyn Fn(&[usize]) -> f64,
) -> Node {
    let builder = TreeBuilder {
        x,
        residuals,
        max_depth: params.max_depth,
        min_samples_split: params.min_samples_split,
        leaf_value,
    };
    let mut samples: Vec<usize> = (0..x.len()).collect();
    builder.build(&mut samples, 0)
}

fn check_width(row: &[f64], width: usize) -> Result<()> {
    if row.len() != width {
        return Err(JobError::InvalidData(format!(
            "expected {} features, got {}",
            width,
            row.len()
        )));
    }
    Ok(())
}

/// Ensamble aditivo: `init + lr * Σ árbol(x)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ensemble {
    pub init: f64,
    pub trees: Vec<Node>,
}

impl Ensemble {
    fn raw(&self, row: &[f64], learning_rate: f64) -> f64 {
        self.init + learning_rate * self.trees.iter().map(|t| t.eval(row)).sum::<f64>()
    }
}

// ==================== Regresión ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    pub params: BoostingParams,
    pub width: usize,
    pub ensemble: Option<Ensemble>,
}

impl GradientBoostingRegressor {
    pub fn new(params: BoostingParams) -> Self {
        Self {
            params,
            width: 0,
            ensemble: None,
        }
    }
}

impl Estimator for GradientBoostingRegressor {
    fn fit(&mut self, x: &Matrix, y: &[f64]) -> Result<()> {
        let n = y.len() as f64;
        let init = y.iter().sum::<f64>() / n;
        let lr = self.params.learning_rate;

        let mut current = vec![init; y.len()];
        let mut trees = Vec::new();

        for _ in 0..self.params.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&current).map(|(t, p)| t - p).collect();
            let mean = |idx: &[usize]| {
                idx.iter().map(|&i| residuals[i]).sum::<f64>() / idx.len().max(1) as f64
            };
            let tree = fit_tree(x, &residuals, &self.params, &mean);

            for (i, row) in x.iter().enumerate() {
                current[i] += lr * tree.eval(row);
            }
            trees.push(tree);
        }

        self.width = x.first().map(|r| r.len()).unwrap_or(0);
        self.ensemble = Some(Ensemble { init, trees });
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>> {
        let ensemble = self
            .ensemble
            .as_ref()
            .ok_or_else(|| JobError::Internal("regressor has no fitted ensemble".to_string()))?;

        x.iter()
            .map(|row| {
                check_width(row, self.width)?;
                Ok(ensemble.raw(row, self.params.learning_rate))
            })
            .collect()
    }
}

// ==================== Clasificación ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    pub params: BoostingParams,
    pub width: usize,
    pub classes: Vec<f64>,
    pub ensembles: Vec<Ensemble>,
}

impl GradientBoostingClassifier {
    pub fn new(params: BoostingParams) -> Self {
        Self {
            params,
            width: 0,
            classes: Vec::new(),
            ensembles: Vec::new(),
        }
    }

    fn fit_binary(&self, x: &Matrix, t: &[f64]) -> Ensemble {
        let n = t.len() as f64;
        let p = (t.iter().sum::<f64>() / n).clamp(1e-6, 1.0 - 1e-6);
        let init = (p / (1.0 - p)).ln();
        let lr = self.params.learning_rate;

        let mut raw = vec![init; t.len()];
        let mut trees = Vec::new();

        for _ in 0..self.params.n_estimators {
            let probs: Vec<f64> = raw.iter().map(|f| sigmoid(*f)).collect();
            let residuals: Vec<f64> = t.iter().zip(&probs).map(|(y, p)| y - p).collect();
            let newton = |idx: &[usize]| {
                let num: f64 = idx.iter().map(|&i| residuals[i]).sum();
                let den: f64 = idx.iter().map(|&i| probs[i] * (1.0 - probs[i])).sum();
                if den.abs() < 1e-12 {
                    0.0
                } else {
                    num / den
                }
            };
            let tree = fit_tree(x, &residuals, &self.params, &newton);

            for (i, row) in x.iter().enumerate() {
                raw[i] += lr * tree.eval(row);
            }
            trees.push(tree);
        }

        Ensemble { init, trees }
    }
}

impl Estimator for GradientBoostingClassifier {
    fn fit(&mut self, x: &Matrix, y: &[f64]) -> Result<()> {
        let classes = distinct_classes(y)?;

        let ensembles = positive_classes(&classes)
            .into_iter()
            .map(|positive| {
                let t: Vec<f64> = y
                    .iter()
                    .map(|v| if *v == classes[positive] { 1.0 } else { 0.0 })
                    .collect();
                self.fit_binary(x, &t)
            })
            .collect();

        self.width = x.first().map(|r| r.len()).unwrap_or(0);
        self.classes = classes;
        self.ensembles = ensembles;
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>> {
        if self.ensembles.is_empty() {
            return Err(JobError::Internal("classifier has no fitted ensembles".to_string()));
        }

        x.iter()
            .map(|row| {
                check_width(row, self.width)?;
                let probabilities: Vec<f64> = self
                    .ensembles
                    .iter()
                    .map(|e| sigmoid(e.raw(row, self.params.learning_rate)))
                    .collect();
                Ok(pick_label(&self.classes, &probabilities))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Matrix, Vec<f64>) {
        let x: Matrix = (0..20).map(|i| vec![i as f64]).collect();
        let y = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();
        (x, y)
    }

    #[test]
    fn test_regressor_learns_step() {
        let (x, y) = step_data();
        let mut model = GradientBoostingRegressor::new(BoostingParams::default());
        model.fit(&x, &y).unwrap();

        let pred = model.predict(&vec![vec![2.0], vec![17.0]]).unwrap();
        assert!((pred[0] - 1.0).abs() < 0.05, "got {}", pred[0]);
        assert!((pred[1] - 5.0).abs() < 0.05, "got {}", pred[1]);
    }

    #[test]
    fn test_regressor_unfitted_predict_fails() {
        let model = GradientBoostingRegressor::new(BoostingParams::default());
        assert!(model.predict(&vec![vec![1.0]]).is_err());
    }

    #[test]
    fn test_classifier_binary() {
        let x: Matrix = (0..20).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 0.0 } else { 1.0 }).collect();

        let mut model = GradientBoostingClassifier::new(BoostingParams::default());
        model.fit(&x, &y).unwrap();
        assert_eq!(model.ensembles.len(), 1);

        let pred = model.predict(&x).unwrap();
        assert_eq!(pred, y);
    }

    #[test]
    fn test_classifier_multiclass() {
        let x: Matrix = (0..30).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..30).map(|i| (i / 10) as f64).collect();

        let mut model = GradientBoostingClassifier::new(BoostingParams::default());
        model.fit(&x, &y).unwrap();
        assert_eq!(model.ensembles.len(), 3);

        let pred = model.predict(&vec![vec![3.0], vec![14.0], vec![27.0]]).unwrap();
        assert_eq!(pred, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_constant_target_yields_leaf() {
        let x: Matrix = (0..5).map(|i| vec![i as f64]).collect();
        let tree = fit_tree(&x, &[0.0; 5], &BoostingParams::default(), &|_| 0.0);
        assert_eq!(tree, Node::Leaf { value: 0.0 });
    }

    #[test]
    fn test_invalid_params() {
        let params = BoostingParams {
            min_samples_split: 1,
            ..BoostingParams::default()
        };
        assert!(params.validate().is_err());
        assert!(BoostingParams::default().validate().is_ok());
    }

    #[test]
    fn test_oversized_ensemble_rejected() {
        let params = BoostingParams {
            n_estimators: MAX_ESTIMATORS + 1,
            ..BoostingParams::default()
        };
        assert!(matches!(params.validate(), Err(JobError::InvalidArgument(_))));

        let params = BoostingParams {
            max_depth: MAX_DEPTH + 1,
            ..BoostingParams::default()
        };
        assert!(matches!(params.validate(), Err(JobError::InvalidArgument(_))));

        let params = BoostingParams {
            n_estimators: MAX_ESTIMATORS,
            max_depth: MAX_DEPTH,
            ..BoostingParams::default()
        };
        assert!(params.validate().is_ok());
    }
}
