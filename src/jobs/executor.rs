//! # Executor de Jobs
//! src/jobs/executor.rs
//!
//! Un handler por tipo de job. Cada handler es una función de los
//! argumentos del job a un resultado JSON o un `JobError`, sin saber cómo
//! fue planificado. Los handlers que escriben hacen a lo sumo una escritura
//! en el registro, identificada por el `task_id` para que una reentrega no
//! la aplique dos veces.

use crate::error::{JobError, Result};
use crate::jobs::types::JobRequest;
use crate::models::{Frame, Metric, ModelKind};
use crate::registry::{Applied, Registry};
use serde_json::{json, Value};
use tracing::debug;

/// Ejecuta jobs contra el registro
#[derive(Clone)]
pub struct JobExecutor {
    registry: Registry,

    /// Columna objetivo en los datos de train/test
    target_column: String,
}

impl JobExecutor {
    pub fn new(registry: Registry, target_column: impl Into<String>) -> Self {
        Self {
            registry,
            target_column: target_column.into(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Ejecuta un job completo
    pub fn execute(&self, task_id: &str, request: &JobRequest) -> Result<Value> {
        debug!(task_id = %task_id, kind = %request.kind(), "Executing job");

        match request {
            JobRequest::Create {
                name,
                version,
                class,
                params,
            } => self.create(task_id, name.as_deref(), version.as_deref(), class, params),
            JobRequest::Train { name, version, data } => {
                self.train(task_id, name, version.as_deref(), data)
            }
            JobRequest::Test {
                name,
                version,
                metric,
                data,
            } => self.test(task_id, name, version.as_deref(), metric, data),
            JobRequest::Predict { name, version, data } => {
                self.predict(name, version.as_deref(), data)
            }
            JobRequest::Delete { name, version } => {
                self.delete(task_id, name, version.as_deref())
            }
            JobRequest::Classes => Ok(json!({ "classes": self.registry.supported_kinds() })),
            JobRequest::Models => Ok(json!({ "models": self.registry.list() })),
        }
    }

    fn create(
        &self,
        task_id: &str,
        name: Option<&str>,
        version: Option<&str>,
        class: &str,
        params: &Value,
    ) -> Result<Value> {
        let kind = ModelKind::from_name(class)?;
        let record = self
            .registry
            .create(name, version, kind, params, Some(task_id))?;

        Ok(json!({
            "message": format!("Model {} has been created", record.name),
            "name": record.name,
            "version": record.version,
            "class": record.kind,
        }))
    }

    fn train(&self, task_id: &str, name: &str, version: Option<&str>, data: &Value) -> Result<Value> {
        let (record, applied) = self.registry.update(name, version, Some(task_id), |_, revision| {
            let (features, target) = Frame::from_json(data)?.split_target(&self.target_column)?;
            revision.state_mut().fit(&features, &target)
        })?;

        if applied == Applied::Replayed {
            debug!(task_id = %task_id, name = %name, "Training already applied");
        }

        Ok(json!({
            "message": "Training successful",
            "name": record.name,
            "version": record.version,
            "revision": record.revision,
        }))
    }

    fn test(
        &self,
        task_id: &str,
        name: &str,
        version: Option<&str>,
        metric: &str,
        data: &Value,
    ) -> Result<Value> {
        let metric = Metric::from_name(metric)?;

        let (record, applied) = self.registry.update(name, version, Some(task_id), |current, revision| {
            if !current.trained {
                return Err(JobError::ModelNotTrained(current.label()));
            }
            let (features, truth) = Frame::from_json(data)?.split_target(&self.target_column)?;
            let predictions = revision.state().predict(&features)?;
            let score = metric.score(&predictions, &truth)?;
            revision.set_score(metric.as_str(), score);
            Ok(score)
        })?;

        let score = match applied {
            Applied::Fresh(score) => score,
            Applied::Replayed => record.scores.get(metric.as_str()).copied().ok_or_else(|| {
                JobError::Internal(format!("replayed test of {} has no stored score", record.label()))
            })?,
        };

        let mut result = serde_json::Map::new();
        result.insert(metric.as_str().to_string(), json!(score));
        Ok(Value::Object(result))
    }

    fn predict(&self, name: &str, version: Option<&str>, data: &Value) -> Result<Value> {
        let record = self.registry.get(name, version)?;
        if !record.trained {
            return Err(JobError::ModelNotTrained(record.label()));
        }

        let state = self.registry.load(&record)?;
        let frame = Frame::from_json(data)?;
        let predictions = state.predict(&frame)?;

        Ok(json!({ "predictions": predictions }))
    }

    fn delete(&self, task_id: &str, name: &str, version: Option<&str>) -> Result<Value> {
        if self.registry.delete(name, version, Some(task_id))? == Applied::Replayed {
            debug!(task_id = %task_id, name = %name, "Delete already applied");
        }
        Ok(json!({ "models": self.registry.list() }))
    }
}
