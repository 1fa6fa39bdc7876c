//! # Store de Resultados
//! src/jobs/results.rs
//!
//! Mapa `task_id → TaskRecord` compartido por dispatcher, workers y poller.
//! Es write-through: cada transición se persiste (archivo temporal +
//! rename) antes de confirmarse, y si la escritura falla el estado en
//! memoria vuelve atrás. Sin ruta todo vive en memoria.
//!
//! Reglas de escritura:
//! - el dispatcher escribe PENDING una sola vez por `task_id`
//! - solo el worker que reclamó la tarea escribe su estado terminal
//! - un estado terminal nunca se sobrescribe

use crate::error::{JobError, Result};
use crate::jobs::types::{TaskError, TaskRecord, TaskState};
use crate::{lock, write_atomic};
use chrono::{TimeDelta, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Resultado de intentar reclamar una tarea
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// El worker es ahora dueño de la tarea
    Acquired(TaskRecord),

    /// Ya tiene estado terminal (entrega duplicada)
    Finished,

    /// Otro worker la tiene reclamada con una entrega igual o más nueva
    Busy,

    /// No existe (expirada o nunca emitida)
    Unknown,
}

/// Conteo de tareas por estado
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failure: usize,
}

/// Store de resultados. Clonar comparte el mismo mapa.
#[derive(Clone)]
pub struct ResultStore {
    /// Ruta al archivo de persistencia (None en modo efímero)
    path: Option<PathBuf>,

    tasks: Arc<Mutex<HashMap<String, TaskRecord>>>,
}

impl ResultStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Abre el store y carga las tareas existentes
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tasks = if path.exists() {
            Self::load_from_file(path)?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            tasks: Arc::new(Mutex::new(tasks)),
        })
    }

    fn load_from_file(path: &Path) -> Result<HashMap<String, TaskRecord>> {
        let reader = BufReader::new(File::open(path)?);

        match serde_json::from_reader(reader) {
            Ok(tasks) => Ok(tasks),
            Err(e) => {
                // Si el archivo está corrupto, empezar limpio
                warn!(path = %path.display(), error = %e, "Corrupted result store, starting empty");
                Ok(HashMap::new())
            }
        }
    }

    fn save_to_file(&self, tasks: &HashMap<String, TaskRecord>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(tasks)
            .map_err(|e| JobError::Internal(format!("failed to serialize tasks: {}", e)))?;
        write_atomic(path, &bytes)?;
        Ok(())
    }

    /// Aplica `f` a la tarea `task_id` y persiste. Si `f` no cambió nada
    /// (retorna `changed = false`) no se escribe; si la escritura falla la
    /// tarea vuelve a su estado anterior.
    fn mutate<T>(
        &self,
        task_id: &str,
        f: impl FnOnce(Option<&mut TaskRecord>) -> (bool, T),
    ) -> Result<T> {
        let mut tasks = lock(&self.tasks);
        let before = tasks.get(task_id).cloned();

        let (changed, value) = f(tasks.get_mut(task_id));
        if !changed {
            return Ok(value);
        }

        if let Err(e) = self.save_to_file(&tasks) {
            match before {
                Some(record) => {
                    tasks.insert(task_id.to_string(), record);
                }
                None => {
                    tasks.remove(task_id);
                }
            }
            return Err(e);
        }
        Ok(value)
    }

    /// Escribe el registro PENDING inicial. Un `task_id` se escribe una sola vez.
    pub fn insert_pending(&self, record: TaskRecord) -> Result<()> {
        let mut tasks = lock(&self.tasks);
        if tasks.contains_key(&record.task_id) {
            return Err(JobError::Internal(format!(
                "task {} was already issued",
                record.task_id
            )));
        }

        let task_id = record.task_id.clone();
        tasks.insert(task_id.clone(), record);
        if let Err(e) = self.save_to_file(&tasks) {
            tasks.remove(&task_id);
            return Err(e);
        }
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        lock(&self.tasks).get(task_id).cloned()
    }

    /// Intenta reclamar la tarea para `worker` en la entrega `delivery`.
    ///
    /// Una tarea RUNNING se vuelve a reclamar solo si la entrega es más
    /// nueva que la que la reclamó (redelivery tras perder al worker). Una
    /// PENDING que ya pasó su plazo queda FAILURE/timeout sin ejecutarse.
    pub fn claim(&self, task_id: &str, worker: &str, delivery: u32) -> Result<Claim> {
        self.mutate(task_id, |task| {
            let Some(task) = task else {
                return (false, Claim::Unknown);
            };

            let state = task.state;
            match state {
                TaskState::Success | TaskState::Failure => (false, Claim::Finished),
                TaskState::Running if task.delivery >= delivery => (false, Claim::Busy),
                TaskState::Running => {
                    warn!(
                        task_id = %task_id,
                        previous = ?task.worker,
                        worker = %worker,
                        "Reclaiming task from a lost delivery"
                    );
                    task.mark_running(worker, delivery);
                    (true, Claim::Acquired(task.clone()))
                }
                // Vencida antes de empezar: ya se reportó timeout, no se ejecuta
                TaskState::Pending if task.is_overdue(Utc::now()) => {
                    debug!(task_id = %task_id, "Task expired before it was claimed");
                    task.mark_timeout();
                    (true, Claim::Finished)
                }
                TaskState::Pending => {
                    task.mark_running(worker, delivery);
                    (true, Claim::Acquired(task.clone()))
                }
            }
        })
    }

    /// Escribe el estado terminal. Solo lo logra el dueño actual del claim;
    /// retorna false si el claim ya no es suyo. Un resultado que llega
    /// después del plazo se registra como timeout.
    pub fn finish(
        &self,
        task_id: &str,
        worker: &str,
        delivery: u32,
        outcome: std::result::Result<Value, TaskError>,
    ) -> Result<bool> {
        self.mutate(task_id, |task| {
            let Some(task) = task else {
                return (false, false);
            };
            let owner = task.state == TaskState::Running
                && task.worker.as_deref() == Some(worker)
                && task.delivery == delivery;
            if !owner {
                return (false, false);
            }

            if task.is_overdue(Utc::now()) {
                debug!(task_id = %task_id, "Task finished after its deadline");
                task.mark_timeout();
            } else {
                match outcome {
                    Ok(result) => task.mark_success(result),
                    Err(error) => task.mark_failure(error),
                }
            }
            (true, true)
        })
    }

    /// Elimina una tarea
    pub fn remove(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let mut tasks = lock(&self.tasks);
        let Some(removed) = tasks.remove(task_id) else {
            return Ok(None);
        };

        if let Err(e) = self.save_to_file(&tasks) {
            tasks.insert(task_id.to_string(), removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    /// Tareas sin estado terminal, de la más antigua a la más nueva
    pub fn unfinished(&self) -> Vec<TaskRecord> {
        let tasks = lock(&self.tasks);
        let mut pending: Vec<TaskRecord> = tasks
            .values()
            .filter(|t| !t.is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending
    }

    pub fn count(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn counts(&self) -> TaskCounts {
        let tasks = lock(&self.tasks);
        let mut counts = TaskCounts::default();
        for task in tasks.values() {
            match task.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Success => counts.success += 1,
                TaskState::Failure => counts.failure += 1,
            }
        }
        counts
    }

    /// Elimina tareas terminadas hace más de `retention`
    pub fn cleanup_expired(&self, retention: Duration) -> Result<usize> {
        let retention = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
        let now = Utc::now();

        let mut tasks = lock(&self.tasks);
        let snapshot = tasks.clone();
        let before = tasks.len();

        tasks.retain(|_, task| match (task.is_terminal(), task.finished_at) {
            (true, Some(finished_at)) => now.signed_duration_since(finished_at) < retention,
            // Mantener tareas no terminadas
            _ => true,
        });

        let removed = before - tasks.len();
        if removed > 0 {
            if let Err(e) = self.save_to_file(&tasks) {
                *tasks = snapshot;
                return Err(e);
            }
        }
        Ok(removed)
    }
}
