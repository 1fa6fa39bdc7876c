//! # Modelos
//!
//! Conjunto cerrado de clases de modelo. Cada `ModelKind` resuelve en
//! tiempo de compilación a un constructor, `fit` y `predict`; nombres de
//! clase desconocidos se rechazan con `UnknownKind`.
//!
//! ## Clases soportadas
//!
//! - `Linear regression`
//! - `Gradient Boosting regression`
//! - `Logistic regression`
//! - `Gradient Boosting classifier`

pub mod boosting;
pub mod frame;
pub mod linear;
pub mod logistic;
pub mod metrics;

pub use frame::{Frame, Matrix};
pub use metrics::Metric;

use crate::error::{JobError, Result};
use boosting::{BoostingParams, GradientBoostingClassifier, GradientBoostingRegressor};
use linear::{LinearParams, LinearRegression};
use logistic::{LogisticParams, LogisticRegression};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Contrato común de todos los modelos
pub trait Estimator {
    fn fit(&mut self, x: &Matrix, y: &[f64]) -> Result<()>;
    fn predict(&self, x: &Matrix) -> Result<Vec<f64>>;
}

/// Clase de modelo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "Linear regression")]
    LinearRegression,
    #[serde(rename = "Gradient Boosting regression")]
    GradientBoostingRegression,
    #[serde(rename = "Logistic regression")]
    LogisticRegression,
    #[serde(rename = "Gradient Boosting classifier")]
    GradientBoostingClassifier,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::LinearRegression,
        ModelKind::GradientBoostingRegression,
        ModelKind::LogisticRegression,
        ModelKind::GradientBoostingClassifier,
    ];

    pub fn from_name(name: &str) -> Result<Self> {
        ModelKind::ALL
            .into_iter()
            .find(|k| k.as_str() == name)
            .ok_or_else(|| JobError::UnknownKind(name.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::LinearRegression => "Linear regression",
            ModelKind::GradientBoostingRegression => "Gradient Boosting regression",
            ModelKind::LogisticRegression => "Logistic regression",
            ModelKind::GradientBoostingClassifier => "Gradient Boosting classifier",
        }
    }

    /// Nombres de todas las clases, en el orden de `ALL`
    pub fn names() -> Vec<&'static str> {
        ModelKind::ALL.iter().map(|k| k.as_str()).collect()
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Modelo concreto (variante etiquetada)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum Model {
    LinearRegression(LinearRegression),
    GradientBoostingRegression(GradientBoostingRegressor),
    LogisticRegression(LogisticRegression),
    GradientBoostingClassifier(GradientBoostingClassifier),
}

fn parse_params<P: DeserializeOwned + Default>(params: &Value) -> Result<P> {
    match params {
        Value::Null => Ok(P::default()),
        Value::Object(map) if map.is_empty() => Ok(P::default()),
        other => serde_json::from_value(other.clone())
            .map_err(|e| JobError::InvalidArgument(format!("invalid params: {}", e))),
    }
}

impl Model {
    /// Construye un modelo sin entrenar con los hiperparámetros dados
    pub fn new(kind: ModelKind, params: &Value) -> Result<Self> {
        let model = match kind {
            ModelKind::LinearRegression => {
                Model::LinearRegression(LinearRegression::new(parse_params::<LinearParams>(params)?))
            }
            ModelKind::LogisticRegression => {
                let p: LogisticParams = parse_params(params)?;
                p.validate()?;
                Model::LogisticRegression(LogisticRegression::new(p))
            }
            ModelKind::GradientBoostingRegression => {
                let p: BoostingParams = parse_params(params)?;
                p.validate()?;
                Model::GradientBoostingRegression(GradientBoostingRegressor::new(p))
            }
            ModelKind::GradientBoostingClassifier => {
                let p: BoostingParams = parse_params(params)?;
                p.validate()?;
                Model::GradientBoostingClassifier(GradientBoostingClassifier::new(p))
            }
        };
        Ok(model)
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Model::LinearRegression(_) => ModelKind::LinearRegression,
            Model::GradientBoostingRegression(_) => ModelKind::GradientBoostingRegression,
            Model::LogisticRegression(_) => ModelKind::LogisticRegression,
            Model::GradientBoostingClassifier(_) => ModelKind::GradientBoostingClassifier,
        }
    }

    fn estimator(&self) -> &dyn Estimator {
        match self {
            Model::LinearRegression(m) => m,
            Model::GradientBoostingRegression(m) => m,
            Model::LogisticRegression(m) => m,
            Model::GradientBoostingClassifier(m) => m,
        }
    }

    fn estimator_mut(&mut self) -> &mut dyn Estimator {
        match self {
            Model::LinearRegression(m) => m,
            Model::GradientBoostingRegression(m) => m,
            Model::LogisticRegression(m) => m,
            Model::GradientBoostingClassifier(m) => m,
        }
    }
}

/// Estado persistido de un artefacto: el modelo y las columnas con que se entrenó
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub model: Model,
    pub features: Vec<String>,
}

impl ModelState {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            features: Vec::new(),
        }
    }

    /// Entrena con las columnas de `features` (todas las que no son target)
    pub fn fit(&mut self, features: &Frame, y: &[f64]) -> Result<()> {
        let names = features.column_names();
        let x = features.matrix(&names)?;
        self.model.estimator_mut().fit(&x, y)?;
        self.features = names;
        Ok(())
    }

    /// Predice usando las columnas registradas al entrenar
    pub fn predict(&self, data: &Frame) -> Result<Vec<f64>> {
        if self.features.is_empty() {
            return Err(JobError::Internal("model state has no feature columns".to_string()));
        }
        let x = data.matrix(&self.features)?;
        self.model.estimator().predict(&x)
    }
}
