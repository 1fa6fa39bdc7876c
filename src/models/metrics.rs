//! # Métricas de Evaluación
//! src/models/metrics.rs
//!
//! Conjunto cerrado de métricas aceptadas por el job `test`.

use crate::error::{JobError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Accuracy,
    MeanSquaredError,
    MeanAbsoluteError,
    R2,
    F1,
    Precision,
    Recall,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Accuracy,
        Metric::MeanSquaredError,
        Metric::MeanAbsoluteError,
        Metric::R2,
        Metric::F1,
        Metric::Precision,
        Metric::Recall,
    ];

    /// Acepta `mean-squared-error` y `Mean_Squared_Error` por igual
    pub fn from_name(name: &str) -> Result<Self> {
        let normalized = name.trim().to_lowercase().replace('-', "_");
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| JobError::UnknownMetric(name.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::MeanSquaredError => "mean_squared_error",
            Metric::MeanAbsoluteError => "mean_absolute_error",
            Metric::R2 => "r2",
            Metric::F1 => "f1",
            Metric::Precision => "precision",
            Metric::Recall => "recall",
        }
    }

    pub fn score(&self, predictions: &[f64], truth: &[f64]) -> Result<f64> {
        if predictions.len() != truth.len() {
            return Err(JobError::InvalidData(format!(
                "{} predictions for {} targets",
                predictions.len(),
                truth.len()
            )));
        }
        if truth.is_empty() {
            return Err(JobError::InvalidData("nothing to score".to_string()));
        }

        let n = truth.len() as f64;
        let pairs = || predictions.iter().zip(truth);

        let score = match self {
            Metric::Accuracy => pairs().filter(|(p, t)| p == t).count() as f64 / n,
            Metric::MeanSquaredError => pairs().map(|(p, t)| (p - t).powi(2)).sum::<f64>() / n,
            Metric::MeanAbsoluteError => pairs().map(|(p, t)| (p - t).abs()).sum::<f64>() / n,
            Metric::R2 => {
                let mean = truth.iter().sum::<f64>() / n;
                let ss_res: f64 = pairs().map(|(p, t)| (t - p).powi(2)).sum();
                let ss_tot: f64 = truth.iter().map(|t| (t - mean).powi(2)).sum();
                if ss_tot == 0.0 {
                    if ss_res == 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    1.0 - ss_res / ss_tot
                }
            }
            Metric::F1 | Metric::Precision | Metric::Recall => {
                classification_score(*self, predictions, truth)
            }
        };

        Ok(score)
    }
}

struct Counts {
    tp: f64,
    fp: f64,
    fn_: f64,
}

impl Counts {
    fn for_label(label: f64, predictions: &[f64], truth: &[f64]) -> Self {
        let mut counts = Counts { tp: 0.0, fp: 0.0, fn_: 0.0 };
        for (p, t) in predictions.iter().zip(truth) {
            match (*p == label, *t == label) {
                (true, true) => counts.tp += 1.0,
                (true, false) => counts.fp += 1.0,
                (false, true) => counts.fn_ += 1.0,
                (false, false) => {}
            }
        }
        counts
    }

    fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    fn f1(&self) -> f64 {
        ratio(2.0 * self.tp, 2.0 * self.tp + self.fp + self.fn_)
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Binaria con etiqueta positiva 1 si las etiquetas están en {0, 1};
/// si no, promedio macro sobre todas las etiquetas vistas.
fn classification_score(metric: Metric, predictions: &[f64], truth: &[f64]) -> f64 {
    let mut labels: Vec<f64> = predictions.iter().chain(truth).copied().collect();
    labels.sort_by(f64::total_cmp);
    labels.dedup();

    let pick = |c: &Counts| match metric {
        Metric::Precision => c.precision(),
        Metric::Recall => c.recall(),
        _ => c.f1(),
    };

    if labels.iter().all(|l| *l == 0.0 || *l == 1.0) {
        return pick(&Counts::for_label(1.0, predictions, truth));
    }

    let total: f64 = labels
        .iter()
        .map(|l| pick(&Counts::for_label(*l, predictions, truth)))
        .sum();
    total / labels.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_normalizes() {
        assert_eq!(Metric::from_name("mean-squared-error").unwrap(), Metric::MeanSquaredError);
        assert_eq!(Metric::from_name("Accuracy").unwrap(), Metric::Accuracy);
        assert!(matches!(
            Metric::from_name("auc").unwrap_err(),
            JobError::UnknownMetric(ref m) if m == "auc"
        ));
    }

    #[test]
    fn test_regression_metrics() {
        let pred = [1.0, 2.0, 4.0];
        let truth = [1.0, 2.0, 3.0];
        assert!((Metric::MeanSquaredError.score(&pred, &truth).unwrap() - 1.0 / 3.0).abs() < 1e-12);
        assert!((Metric::MeanAbsoluteError.score(&pred, &truth).unwrap() - 1.0 / 3.0).abs() < 1e-12);
        assert!((Metric::R2.score(&truth, &truth).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_binary_classification_metrics() {
        let pred = [1.0, 1.0, 0.0, 0.0];
        let truth = [1.0, 0.0, 1.0, 0.0];
        assert_eq!(Metric::Accuracy.score(&pred, &truth).unwrap(), 0.5);
        assert_eq!(Metric::Precision.score(&pred, &truth).unwrap(), 0.5);
        assert_eq!(Metric::Recall.score(&pred, &truth).unwrap(), 0.5);
        assert_eq!(Metric::F1.score(&pred, &truth).unwrap(), 0.5);
    }

    #[test]
    fn test_macro_average_for_multiclass() {
        let pred = [1.0, 2.0, 3.0];
        let truth = [1.0, 2.0, 3.0];
        assert_eq!(Metric::F1.score(&pred, &truth).unwrap(), 1.0);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(Metric::Accuracy.score(&[1.0], &[1.0, 0.0]).is_err());
    }
}
