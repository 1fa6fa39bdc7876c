//! # Dispatcher
//! src/jobs/dispatcher.rs
//!
//! Acepta una petición, genera su `task_id`, escribe el registro PENDING y
//! encola el mensaje. Nunca espera a que el job se ejecute.

use crate::error::{JobError, Result};
use crate::jobs::queue::{TaskMessage, TaskQueue};
use crate::jobs::results::ResultStore;
use crate::jobs::types::{JobRequest, TaskRecord};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Intentos de escritura del registro PENDING ante fallos transitorios
const INSERT_ATTEMPTS: u32 = 3;

const INSERT_BACKOFF: Duration = Duration::from_millis(20);

/// Handle de envío. Sin estado propio: clonar es barato.
#[derive(Clone)]
pub struct Dispatcher {
    queue: TaskQueue,
    results: ResultStore,
    task_timeout: Duration,
}

impl Dispatcher {
    pub fn new(queue: TaskQueue, results: ResultStore, task_timeout: Duration) -> Self {
        Self {
            queue,
            results,
            task_timeout,
        }
    }

    /// Envía un job y retorna su `task_id`.
    ///
    /// Falla solo con `Dispatch`: cuando el store de resultados no acepta
    /// el registro tras reintentar, o cuando la cola rechaza el mensaje.
    pub fn submit(&self, request: JobRequest) -> Result<String> {
        let task_id = Uuid::new_v4().to_string();
        let kind = request.kind();

        let record = TaskRecord::new(task_id.clone(), request.clone(), self.task_timeout);
        self.insert_with_retry(record)?;

        if let Err(e) = self.queue.enqueue(TaskMessage::new(task_id.clone(), request)) {
            if let Err(cleanup) = self.results.remove(&task_id) {
                warn!(task_id = %task_id, error = %cleanup, "Failed to discard undispatched task");
            }
            return Err(match e {
                JobError::Dispatch(_) => e,
                other => JobError::Dispatch(other.to_string()),
            });
        }

        info!(task_id = %task_id, kind = %kind, "Task submitted");
        Ok(task_id)
    }

    fn insert_with_retry(&self, record: TaskRecord) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.results.insert_pending(record.clone()) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < INSERT_ATTEMPTS => {
                    warn!(task_id = %record.task_id, attempt, error = %e, "Result store write failed, retrying");
                    thread::sleep(INSERT_BACKOFF * attempt);
                    attempt += 1;
                }
                Err(e) => return Err(JobError::Dispatch(e.to_string())),
            }
        }
    }
}
