//! # Taxonomía de Errores
//! src/error.rs
//!
//! Todos los fallos que pueden ocurrir dentro de un job, en el registro de
//! artefactos o en el despacho. Los errores de validación son deterministas
//! y nunca se reintentan; `Storage` es el único transitorio.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resultado estándar del crate
pub type Result<T> = std::result::Result<T, JobError>;

/// Errores del sistema de jobs y del registro
#[derive(Debug, Error)]
pub enum JobError {
    #[error("unknown model class: {0}")]
    UnknownKind(String),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("model {} doesn't exist", display_key(.name, .version.as_deref()))]
    NotFound {
        name: String,
        version: Option<String>,
    },

    #[error("model {} already exists", display_key(.name, .version.as_deref()))]
    DuplicateName {
        name: String,
        version: Option<String>,
    },

    #[error("no '{0}' column in data")]
    MissingTargetColumn(String),

    #[error("model {0} has not been trained")]
    ModelNotTrained(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("task {task_id} exceeded its deadline of {timeout_ms} ms")]
    Timeout { task_id: String, timeout_ms: u64 },

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Backend temporalmente inaccesible (disco, archivo bloqueado, ...)
    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

fn display_key(name: &str, version: Option<&str>) -> String {
    match version {
        Some(v) => format!("{}@{}", name, v),
        None => name.to_string(),
    }
}

/// Clase de error tal como la ve un cliente al consultar una tarea
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownKind,
    UnknownMetric,
    NotFound,
    DuplicateName,
    MissingTargetColumn,
    ModelNotTrained,
    UnknownTask,
    Timeout,
    Dispatch,
    InvalidArgument,
    InvalidData,
    Storage,
    Internal,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::UnknownKind(_) => ErrorKind::UnknownKind,
            JobError::UnknownMetric(_) => ErrorKind::UnknownMetric,
            JobError::NotFound { .. } => ErrorKind::NotFound,
            JobError::DuplicateName { .. } => ErrorKind::DuplicateName,
            JobError::MissingTargetColumn(_) => ErrorKind::MissingTargetColumn,
            JobError::ModelNotTrained(_) => ErrorKind::ModelNotTrained,
            JobError::UnknownTask(_) => ErrorKind::UnknownTask,
            JobError::Timeout { .. } => ErrorKind::Timeout,
            JobError::Dispatch(_) => ErrorKind::Dispatch,
            JobError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            JobError::InvalidData(_) => ErrorKind::InvalidData,
            JobError::Storage(_) => ErrorKind::Storage,
            JobError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Solo los fallos del backend se reintentan
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Storage(_))
    }

    pub fn not_found(name: &str, version: Option<&str>) -> Self {
        JobError::NotFound {
            name: name.to_string(),
            version: version.map(str::to_string),
        }
    }
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        JobError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::MissingTargetColumn).unwrap();
        assert_eq!(json, "\"missing_target_column\"");
    }

    #[test]
    fn test_only_storage_is_transient() {
        assert!(JobError::Storage("disk full".into()).is_transient());
        assert!(!JobError::UnknownKind("Tree".into()).is_transient());
        assert!(!JobError::not_found("m1", None).is_transient());
        assert!(!JobError::Internal("boom".into()).is_transient());
    }

    #[test]
    fn test_not_found_message_includes_version() {
        let err = JobError::not_found("m1", Some("v2"));
        assert_eq!(err.to_string(), "model m1@v2 doesn't exist");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: JobError = io.into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
