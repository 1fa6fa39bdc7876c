//! # Gestor Central de Jobs
//! src/jobs/manager.rs
//!
//! Coordina la ejecución de jobs: pool de workers, reintentos, barrido de
//! retención, recuperación tras reinicio y apagado ordenado.

use crate::config::Config;
use crate::error::{JobError, Result};
use crate::jobs::dispatcher::Dispatcher;
use crate::jobs::executor::JobExecutor;
use crate::jobs::poller::Poller;
use crate::jobs::queue::{Delivery, TaskMessage, TaskQueue};
use crate::jobs::results::{Claim, ResultStore};
use crate::jobs::types::TaskError;
use crate::lock;
use crate::registry::Registry;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tope del backoff exponencial entre reintentos
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Política de reintentos ante errores transitorios
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Espera antes del intento `attempt + 1`
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Ejecuta `f` hasta que tenga éxito, falle con un error no transitorio
    /// o se agoten los intentos
    fn run<T>(&self, task_id: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match f() {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay(attempt);
                    warn!(
                        task_id = %task_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Estado compartido por todos los workers
struct WorkerContext {
    queue: TaskQueue,
    results: ResultStore,
    executor: JobExecutor,
    retry: RetryPolicy,

    /// Tareas en ejecución en este proceso (task_id -> worker)
    running: Mutex<HashMap<String, String>>,
}

/// Gestor central de jobs
pub struct JobManager {
    config: Config,
    context: Arc<WorkerContext>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sweeper: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl JobManager {
    /// Abre los stores según la configuración, recupera las tareas
    /// pendientes e inicia workers y barrido
    pub fn start(config: Config) -> Result<Self> {
        let registry = match config.registry_dir() {
            Some(dir) => Registry::open(&dir)?,
            None => Registry::in_memory(),
        };
        let results = match config.results_path() {
            Some(path) => ResultStore::open(&path)?,
            None => ResultStore::in_memory(),
        };
        Self::with_stores(config, registry, results)
    }

    /// Igual que `start` pero con stores ya construidos
    pub fn with_stores(config: Config, registry: Registry, results: ResultStore) -> Result<Self> {
        let context = Arc::new(WorkerContext {
            queue: TaskQueue::new(config.queue_capacity, config.visibility_timeout()),
            results,
            executor: JobExecutor::new(registry, config.target_column.clone()),
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                backoff: config.retry_backoff(),
            },
            running: Mutex::new(HashMap::new()),
        });

        let manager = Self {
            config,
            context,
            workers: Mutex::new(Vec::new()),
            sweeper: Mutex::new(None),
        };

        let recovered = manager.recover()?;
        if recovered > 0 {
            info!(recovered, "Recovered unfinished tasks");
        }

        manager.spawn_workers();
        manager.spawn_sweeper();

        Ok(manager)
    }

    /// Handle para enviar jobs
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.context.queue.clone(),
            self.context.results.clone(),
            self.config.task_timeout(),
        )
    }

    /// Handle para consultar tareas
    pub fn poller(&self) -> Poller {
        Poller::new(self.context.results.clone())
    }

    pub fn registry(&self) -> &Registry {
        self.context.executor.registry()
    }

    /// Reencola las tareas sin estado terminal que quedaron en el store.
    /// La entrega se numera por encima de la que las reclamó, así un
    /// worker nuevo puede volver a reclamarlas.
    fn recover(&self) -> Result<usize> {
        let unfinished = self.context.results.unfinished();
        let count = unfinished.len();

        for task in unfinished {
            debug!(task_id = %task.task_id, state = ?task.state, "Re-enqueueing task");
            let message = TaskMessage {
                task_id: task.task_id,
                request: task.request,
                delivery: task.delivery,
            };
            self.context.queue.enqueue(message)?;
        }

        Ok(count)
    }

    /// Inicia los workers para procesar tareas
    fn spawn_workers(&self) {
        let mut workers = lock(&self.workers);
        for i in 0..self.config.workers {
            let context = Arc::clone(&self.context);
            let name = format!("worker-{}", i);
            workers.push(thread::spawn(move || worker_loop(name, context)));
        }
    }

    /// Inicia el barrido periódico de tareas expiradas
    fn spawn_sweeper(&self) {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let results = self.context.results.clone();
        let interval = self.config.sweep_interval();
        let retention = self.config.result_retention();

        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => match results.cleanup_expired(retention) {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Expired tasks removed"),
                    Err(e) => warn!(error = %e, "Retention sweep failed"),
                },
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        *lock(&self.sweeper) = Some((stop_tx, handle));
    }

    /// Estadísticas de la cola, las tareas y los workers
    pub fn stats(&self) -> Value {
        let queue = self.context.queue.stats();
        let tasks = self.context.results.counts();
        let running = lock(&self.context.running).len();

        serde_json::json!({
            "queue": queue,
            "tasks": tasks,
            "running_jobs": running,
            "workers": self.config.workers,
            "artifacts": self.registry().list().len(),
        })
    }

    /// Cierra la cola y espera a que los workers terminen la tarea en curso.
    /// Los mensajes aún en cola siguen PENDING en el store y se recuperan
    /// en el próximo arranque.
    pub fn shutdown(&self) {
        self.context.queue.close();

        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }

        if let Some((stop, handle)) = lock(&self.sweeper).take() {
            let _ = stop.send(());
            let _ = handle.join();
        }
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Loop principal del worker
fn worker_loop(name: String, context: Arc<WorkerContext>) {
    debug!(worker = %name, "Worker started");

    while let Some(delivery) = context.queue.dequeue() {
        process(&name, &context, delivery);
    }

    debug!(worker = %name, "Worker stopped");
}

fn process(worker: &str, context: &WorkerContext, delivery: Delivery) {
    let Delivery { receipt, message } = delivery;
    let task_id = message.task_id.as_str();

    // Reentrega por visibility timeout de una tarea que sigue en ejecución aquí
    if lock(&context.running).contains_key(task_id) {
        debug!(task_id = %task_id, worker = %worker, "Task still running, dropping redelivery");
        context.queue.ack(receipt);
        return;
    }

    match context.results.claim(task_id, worker, message.delivery) {
        Ok(Claim::Acquired(_)) => {}
        Ok(claim) => {
            debug!(task_id = %task_id, worker = %worker, claim = ?claim, "Skipping delivery");
            context.queue.ack(receipt);
            return;
        }
        Err(e) => {
            warn!(task_id = %task_id, worker = %worker, error = %e, "Claim failed, returning task to queue");
            context.queue.nack(receipt);
            return;
        }
    }

    lock(&context.running).insert(task_id.to_string(), worker.to_string());
    info!(task_id = %task_id, worker = %worker, kind = %message.request.kind(), "Task started");

    let outcome = context
        .retry
        .run(task_id, || guarded(|| context.executor.execute(task_id, &message.request)))
        .map_err(TaskError::from);

    match &outcome {
        Ok(_) => info!(task_id = %task_id, worker = %worker, "Task succeeded"),
        Err(e) => info!(task_id = %task_id, worker = %worker, error = %e.message, "Task failed"),
    }

    let recorded = context.retry.run(task_id, || {
        context
            .results
            .finish(task_id, worker, message.delivery, outcome.clone())
    });

    lock(&context.running).remove(task_id);

    match recorded {
        Ok(true) => {
            context.queue.ack(receipt);
        }
        Ok(false) => {
            warn!(task_id = %task_id, worker = %worker, "Claim lost, outcome dropped");
            context.queue.ack(receipt);
        }
        Err(e) => {
            // La tarea queda RUNNING; la reentrega la reclama y el registro
            // descarta la escritura repetida
            error!(task_id = %task_id, worker = %worker, error = %e, "Failed to record outcome");
            context.queue.nack(receipt);
        }
    }
}

/// Ejecuta `job` convirtiendo un panic en `Internal`
fn guarded(job: impl FnOnce() -> Result<Value>) -> Result<Value> {
    panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(JobError::Internal(format!("job panicked: {}", message)))
    })
}
