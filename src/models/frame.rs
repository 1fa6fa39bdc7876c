//! # Datos Tabulares
//! src/models/frame.rs
//!
//! Entrada de train/test/predict: un objeto JSON `{columna: [números...]}`.
//! Todas las columnas deben tener el mismo largo y al menos una fila.

use crate::error::{JobError, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Tabla orientada a columnas
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    columns: BTreeMap<String, Vec<f64>>,
    rows: usize,
}

/// Matriz por filas: `rows[i][j]` es la feature `j` de la muestra `i`
pub type Matrix = Vec<Vec<f64>>;

impl Frame {
    /// Parsea un objeto JSON de columnas
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| JobError::InvalidData("data must be an object of columns".to_string()))?;

        if object.is_empty() {
            return Err(JobError::InvalidData("data has no columns".to_string()));
        }

        let mut columns = BTreeMap::new();
        let mut rows: Option<usize> = None;

        for (name, column) in object {
            let values = column.as_array().ok_or_else(|| {
                JobError::InvalidData(format!("column '{}' must be an array", name))
            })?;

            let parsed = values
                .iter()
                .map(|v| {
                    v.as_f64().ok_or_else(|| {
                        JobError::InvalidData(format!("column '{}' contains a non-numeric value", name))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;

            match rows {
                None => rows = Some(parsed.len()),
                Some(n) if n != parsed.len() => {
                    return Err(JobError::InvalidData(format!(
                        "column '{}' has {} rows, expected {}",
                        name,
                        parsed.len(),
                        n
                    )));
                }
                Some(_) => {}
            }

            columns.insert(name.clone(), parsed);
        }

        let rows = rows.unwrap_or(0);
        if rows == 0 {
            return Err(JobError::InvalidData("data has no rows".to_string()));
        }

        Ok(Self { columns, rows })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Nombres de columnas en orden lexicográfico
    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    /// Separa la columna objetivo del resto
    pub fn split_target(mut self, target: &str) -> Result<(Frame, Vec<f64>)> {
        let y = self
            .columns
            .remove(target)
            .ok_or_else(|| JobError::MissingTargetColumn(target.to_string()))?;

        if self.columns.is_empty() {
            return Err(JobError::InvalidData("data has no feature columns".to_string()));
        }

        Ok((self, y))
    }

    /// Construye la matriz de features en el orden pedido
    pub fn matrix(&self, features: &[String]) -> Result<Matrix> {
        let selected = features
            .iter()
            .map(|name| {
                self.columns.get(name).ok_or_else(|| {
                    JobError::InvalidData(format!("missing feature column '{}'", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((0..self.rows)
            .map(|i| selected.iter().map(|col| col[i]).collect())
            .collect())
    }
}
