//! # Registros del Registro de Artefactos
//! src/registry/record.rs
//!
//! Metadatos de un artefacto. El modelo en sí vive en un blob separado,
//! referenciado por su digest.

use crate::models::ModelKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Updates recordados por artefacto para reconocer reentregas
pub const APPLIED_TASKS_LIMIT: usize = 64;

/// Referencia a un payload almacenado
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRef {
    /// SHA256 en hexadecimal del blob comprimido
    pub digest: String,

    /// Tamaño del blob en bytes
    pub size: u64,
}

/// Artefacto almacenado, identificado por `(name, version)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub kind: ModelKind,

    pub trained: bool,

    pub payload: PayloadRef,

    /// Último puntaje de cada métrica evaluada con `test`
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,

    /// Se incrementa en cada update
    pub revision: u64,

    /// Orden de creación dentro del registro
    pub seq: u64,

    /// Tarea que creó el artefacto (clave de idempotencia de `create`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_task: Option<String>,

    /// Tareas que aplicaron los últimos updates, de la más vieja a la más
    /// nueva. Acotado a `APPLIED_TASKS_LIMIT`.
    #[serde(default, skip_serializing_if = "VecDeque::is_empty")]
    pub applied_tasks: VecDeque<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Coincidencia exacta de clave (una versión None solo coincide con None)
    pub fn is_key(&self, name: &str, version: Option<&str>) -> bool {
        self.name == name && self.version.as_deref() == version
    }

    /// Si `task_id` ya aplicó un update a este artefacto
    pub fn has_applied(&self, task_id: &str) -> bool {
        self.applied_tasks.iter().any(|t| t == task_id)
    }

    /// Registra `task_id` como aplicado, olvidando el más viejo si hace falta
    pub fn record_applied(&mut self, task_id: &str) {
        if self.applied_tasks.len() >= APPLIED_TASKS_LIMIT {
            self.applied_tasks.pop_front();
        }
        self.applied_tasks.push_back(task_id.to_string());
    }

    /// `name` o `name@version`
    pub fn label(&self) -> String {
        match &self.version {
            Some(v) => format!("{}@{}", self.name, v),
            None => self.name.clone(),
        }
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            name: self.name.clone(),
            version: self.version.clone(),
            class: self.kind,
            trained: self.trained,
            revision: self.revision,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Entrada del listado de modelos
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub class: ModelKind,
    pub trained: bool,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Foto del registro en un instante. No es una vista viva: se puede
/// recorrer tantas veces como se quiera y siempre da lo mismo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Listing {
    entries: Vec<ArtifactSummary>,
}

impl Listing {
    pub fn new(entries: Vec<ArtifactSummary>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ArtifactSummary> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }
}

impl<'a> IntoIterator for &'a Listing {
    type Item = &'a ArtifactSummary;
    type IntoIter = std::slice::Iter<'a, ArtifactSummary>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for Listing {
    type Item = ArtifactSummary;
    type IntoIter = std::vec::IntoIter<ArtifactSummary>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
