//! # Tipos y Estructuras para el Sistema de Jobs
//! src/jobs/types.rs
//!
//! Define los tipos fundamentales para el manejo de tareas asíncronas:
//! la petición que viaja por la cola, el registro que guarda el store de
//! resultados y la foto que ve quien consulta.

use crate::error::{ErrorKind, JobError};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Estado de una tarea. Las transiciones son monótonas:
/// PENDING → RUNNING → {SUCCESS, FAILURE}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    /// En cola esperando un worker
    Pending,

    /// Reclamada por un worker
    Running,

    Success,

    Failure,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

/// Tipo de job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Create,
    Train,
    Test,
    Predict,
    Delete,
    Classes,
    Models,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Create => "create",
            TaskKind::Train => "train",
            TaskKind::Test => "test",
            TaskKind::Predict => "predict",
            TaskKind::Delete => "delete",
            TaskKind::Classes => "classes",
            TaskKind::Models => "models",
        }
    }

    /// Jobs que escriben en el registro
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            TaskKind::Create | TaskKind::Train | TaskKind::Test | TaskKind::Delete
        )
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Petición de job con sus argumentos
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobRequest {
    Create {
        /// Sin nombre, el registro asigna uno sintético
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        /// Clase de modelo, p. ej. `"Linear regression"`
        class: String,
        #[serde(default)]
        params: Value,
    },
    Train {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        data: Value,
    },
    Test {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        metric: String,
        data: Value,
    },
    Predict {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        data: Value,
    },
    Delete {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    Classes,
    Models,
}

impl JobRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            JobRequest::Create { .. } => TaskKind::Create,
            JobRequest::Train { .. } => TaskKind::Train,
            JobRequest::Test { .. } => TaskKind::Test,
            JobRequest::Predict { .. } => TaskKind::Predict,
            JobRequest::Delete { .. } => TaskKind::Delete,
            JobRequest::Classes => TaskKind::Classes,
            JobRequest::Models => TaskKind::Models,
        }
    }

    /// Nombre del artefacto afectado, si lo hay
    pub fn target(&self) -> Option<&str> {
        match self {
            JobRequest::Create { name, .. } => name.as_deref(),
            JobRequest::Train { name, .. }
            | JobRequest::Test { name, .. }
            | JobRequest::Predict { name, .. }
            | JobRequest::Delete { name, .. } => Some(name),
            JobRequest::Classes | JobRequest::Models => None,
        }
    }
}

/// Error de una tarea tal como se guarda y se reporta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&JobError> for TaskError {
    fn from(e: &JobError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<JobError> for TaskError {
    fn from(e: JobError) -> Self {
        TaskError::from(&e)
    }
}

/// Registro de una tarea en el store de resultados
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,

    pub kind: TaskKind,

    pub request: JobRequest,

    pub state: TaskState,

    /// Presente solo en SUCCESS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Presente solo en FAILURE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    /// Worker que tiene reclamada la tarea
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,

    /// Número de entrega con que se reclamó por última vez (0 = nunca)
    #[serde(default)]
    pub delivery: u32,

    /// Plazo de reporte en milisegundos
    pub timeout_ms: u64,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Crea un registro en estado PENDING
    pub fn new(task_id: String, request: JobRequest, timeout: Duration) -> Self {
        Self {
            task_id,
            kind: request.kind(),
            request,
            state: TaskState::Pending,
            result: None,
            error: None,
            worker: None,
            delivery: 0,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Momento a partir del cual una tarea sin terminar se reporta como timeout
    pub fn deadline(&self) -> DateTime<Utc> {
        i64::try_from(self.timeout_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|delta| self.created_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && now > self.deadline()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Marca la tarea como reclamada por `worker` en la entrega `delivery`
    pub fn mark_running(&mut self, worker: &str, delivery: u32) {
        self.state = TaskState::Running;
        self.worker = Some(worker.to_string());
        self.delivery = delivery;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_success(&mut self, result: Value) {
        self.state = TaskState::Success;
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failure(&mut self, error: TaskError) {
        self.state = TaskState::Failure;
        self.result = None;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    fn timeout_error(&self) -> TaskError {
        TaskError::from(JobError::Timeout {
            task_id: self.task_id.clone(),
            timeout_ms: self.timeout_ms,
        })
    }

    /// Marca la tarea como vencida
    pub fn mark_timeout(&mut self) {
        let error = self.timeout_error();
        self.mark_failure(error);
    }

    /// Foto para quien consulta. Una tarea vencida sin estado terminal se
    /// reporta como FAILURE/timeout sin modificar el registro.
    pub fn snapshot(&self, now: DateTime<Utc>) -> TaskSnapshot {
        let mut snapshot = TaskSnapshot {
            task_id: self.task_id.clone(),
            kind: self.kind,
            state: self.state,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            finished_at: self.finished_at,
        };

        if self.is_overdue(now) {
            snapshot.state = TaskState::Failure;
            snapshot.result = None;
            snapshot.error = Some(self.timeout_error());
        }

        snapshot
    }
}

/// Respuesta de `poll`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,

    pub kind: TaskKind,

    pub state: TaskState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_state_serialization() {
        let json = serde_json::to_string(&TaskState::Running).unwrap();
        assert_eq!(json, "\"RUNNING\"");
    }

    #[test]
    fn test_request_deserialization() {
        let request: JobRequest = serde_json::from_value(json!({
            "kind": "create",
            "class": "Linear regression",
            "name": "m1"
        }))
        .unwrap();
        assert_eq!(request.kind(), TaskKind::Create);
        assert_eq!(request.target(), Some("m1"));

        let request: JobRequest = serde_json::from_value(json!({"kind": "classes"})).unwrap();
        assert_eq!(request, JobRequest::Classes);
        assert!(!request.kind().is_mutating());
    }

    #[test]
    fn test_request_unknown_kind_rejected() {
        let result: Result<JobRequest, _> = serde_json::from_value(json!({"kind": "explode"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_task_lifecycle() {
        let mut task = TaskRecord::new("t1".into(), JobRequest::Models, Duration::from_secs(60));
        assert_eq!(task.state, TaskState::Pending);
        assert!(!task.is_terminal());

        task.mark_running("worker-0", 1);
        assert_eq!(task.state, TaskState::Running);
        assert_eq!(task.worker.as_deref(), Some("worker-0"));
        assert!(task.started_at.is_some());

        task.mark_success(json!({"models": []}));
        assert!(task.is_terminal());
        assert!(task.error.is_none());
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_overdue_snapshot_reports_timeout() {
        let task = TaskRecord::new("t1".into(), JobRequest::Classes, Duration::from_millis(10));
        let later = task.created_at + TimeDelta::seconds(1);

        let snapshot = task.snapshot(later);
        assert_eq!(snapshot.state, TaskState::Failure);
        assert_eq!(snapshot.error.unwrap().kind, ErrorKind::Timeout);
        // El registro no cambia
        assert_eq!(task.state, TaskState::Pending);
    }

    #[test]
    fn test_terminal_task_never_overdue() {
        let mut task = TaskRecord::new("t1".into(), JobRequest::Classes, Duration::from_millis(10));
        task.mark_success(json!({}));
        let later = task.created_at + TimeDelta::seconds(1);

        assert_eq!(task.snapshot(later).state, TaskState::Success);
    }

    #[test]
    fn test_task_error_from_job_error() {
        let error = TaskError::from(JobError::UnknownMetric("auc".into()));
        assert_eq!(error.kind, ErrorKind::UnknownMetric);
        assert_eq!(error.message, "unknown metric: auc");
    }
}
