//! # Poller
//! src/jobs/poller.rs
//!
//! Consulta el estado de una tarea sin bloquear. Quien consulta vuelve a
//! preguntar mientras la tarea esté PENDING o RUNNING; `wait` es el lado
//! cliente de ese ciclo, con backoff exponencial entre consultas.

use crate::error::{JobError, Result};
use crate::jobs::results::ResultStore;
use crate::jobs::types::TaskSnapshot;
use chrono::Utc;
use std::thread;
use std::time::{Duration, Instant};

const FIRST_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Handle de consulta. Sin estado propio: clonar es barato.
#[derive(Clone)]
pub struct Poller {
    results: ResultStore,
}

impl Poller {
    pub fn new(results: ResultStore) -> Self {
        Self { results }
    }

    /// Foto actual de la tarea. `UnknownTask` si nunca se emitió o ya expiró.
    pub fn poll(&self, task_id: &str) -> Result<TaskSnapshot> {
        self.results
            .get(task_id)
            .map(|task| task.snapshot(Utc::now()))
            .ok_or_else(|| JobError::UnknownTask(task_id.to_string()))
    }

    /// Consulta con backoff hasta que la tarea sea terminal o pase
    /// `max_wait`; en ese caso devuelve la última foto no terminal.
    pub fn wait(&self, task_id: &str, max_wait: Duration) -> Result<TaskSnapshot> {
        let started = Instant::now();
        let mut backoff = FIRST_BACKOFF;

        loop {
            let snapshot = self.poll(task_id)?;
            if snapshot.is_terminal() || started.elapsed() >= max_wait {
                return Ok(snapshot);
            }

            let remaining = max_wait.saturating_sub(started.elapsed());
            thread::sleep(backoff.min(remaining));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}
