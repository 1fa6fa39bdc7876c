//! # Cola de Tareas
//! src/jobs/queue.rs
//!
//! Cola FIFO thread-safe con entrega at-least-once. Cada `dequeue` entrega
//! un mensaje con un recibo; el mensaje queda "en vuelo" hasta que el
//! worker hace `ack`. Un `nack`, o un recibo que no se confirma dentro del
//! visibility timeout, devuelve el mensaje a la cola para otra entrega.

use crate::error::{JobError, Result};
use crate::jobs::types::JobRequest;
use crate::lock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Intervalo máximo entre revisiones de entregas vencidas
const REAP_INTERVAL: Duration = Duration::from_millis(100);

/// Mensaje de la cola: `{taskId, kind, args}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: String,

    pub request: JobRequest,

    /// Número de entregas realizadas (se incrementa en cada `dequeue`)
    pub delivery: u32,
}

impl TaskMessage {
    pub fn new(task_id: String, request: JobRequest) -> Self {
        Self {
            task_id,
            request,
            delivery: 0,
        }
    }
}

/// Un mensaje entregado a un worker
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: u64,
    pub message: TaskMessage,
}

struct InFlight {
    message: TaskMessage,
    visible_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<TaskMessage>,
    in_flight: HashMap<u64, InFlight>,
    next_receipt: u64,
    delivered: u64,
    redelivered: u64,
    closed: bool,
}

impl QueueState {
    /// Devuelve a la cola los mensajes cuyo visibility timeout venció
    fn reap(&mut self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(receipt, _)| *receipt)
            .collect();

        for receipt in &expired {
            if let Some(flight) = self.in_flight.remove(receipt) {
                self.ready.push_back(flight.message);
            }
        }
        expired.len()
    }

    fn deliver(&mut self, visibility: Duration) -> Option<Delivery> {
        let mut message = self.ready.pop_front()?;
        message.delivery += 1;
        if message.delivery > 1 {
            self.redelivered += 1;
        }
        self.delivered += 1;

        let receipt = self.next_receipt;
        self.next_receipt += 1;
        self.in_flight.insert(
            receipt,
            InFlight {
                message: message.clone(),
                visible_at: Instant::now() + visibility,
            },
        );

        Some(Delivery { receipt, message })
    }
}

/// Cola de tareas compartida. Clonar comparte la misma cola.
#[derive(Clone)]
pub struct TaskQueue {
    state: Arc<Mutex<QueueState>>,

    /// Notifica a los workers cuando hay mensajes o se cierra la cola
    condvar: Arc<Condvar>,

    /// Capacidad máxima de mensajes listos
    max_capacity: usize,

    visibility_timeout: Duration,
}

impl TaskQueue {
    pub fn new(max_capacity: usize, visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            condvar: Arc::new(Condvar::new()),
            max_capacity,
            visibility_timeout,
        }
    }

    /// Encola un mensaje. Falla con `Dispatch` si la cola está llena o cerrada.
    pub fn enqueue(&self, message: TaskMessage) -> Result<()> {
        let mut state = lock(&self.state);

        if state.closed {
            return Err(JobError::Dispatch("queue is closed".to_string()));
        }
        if state.ready.len() >= self.max_capacity {
            return Err(JobError::Dispatch(format!(
                "queue is full (max capacity: {})",
                self.max_capacity
            )));
        }

        state.ready.push_back(message);
        self.condvar.notify_one();
        Ok(())
    }

    /// Bloquea hasta que haya un mensaje. Retorna None cuando la cola se cierra.
    pub fn dequeue(&self) -> Option<Delivery> {
        let mut state = lock(&self.state);

        loop {
            if state.closed {
                return None;
            }

            state.reap(Instant::now());
            if let Some(delivery) = state.deliver(self.visibility_timeout) {
                return Some(delivery);
            }

            let wait = state
                .in_flight
                .values()
                .map(|f| f.visible_at.saturating_duration_since(Instant::now()))
                .min()
                .map_or(REAP_INTERVAL, |d| d.min(REAP_INTERVAL));

            state = match self.condvar.wait_timeout(state, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Intenta entregar sin bloquear
    pub fn try_dequeue(&self) -> Option<Delivery> {
        let mut state = lock(&self.state);
        if state.closed {
            return None;
        }
        state.reap(Instant::now());
        state.deliver(self.visibility_timeout)
    }

    /// Confirma una entrega. Retorna false si el recibo ya no es válido
    /// (confirmado antes o vencido y reencolado).
    pub fn ack(&self, receipt: u64) -> bool {
        lock(&self.state).in_flight.remove(&receipt).is_some()
    }

    /// Rechaza una entrega: el mensaje vuelve al final de la cola
    pub fn nack(&self, receipt: u64) -> bool {
        let mut state = lock(&self.state);
        match state.in_flight.remove(&receipt) {
            Some(flight) => {
                state.ready.push_back(flight.message);
                self.condvar.notify_one();
                true
            }
            None => false,
        }
    }

    /// Cierra la cola y despierta a todos los workers
    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.condvar.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Mensajes listos para entregar
    pub fn len(&self) -> usize {
        lock(&self.state).ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn stats(&self) -> QueueStats {
        let state = lock(&self.state);
        QueueStats {
            ready: state.ready.len(),
            in_flight: state.in_flight.len(),
            capacity: self.max_capacity,
            delivered: state.delivered,
            redelivered: state.redelivered,
        }
    }
}

/// Estadísticas de la cola
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub ready: usize,
    pub in_flight: usize,
    pub capacity: usize,
    pub delivered: u64,
    pub redelivered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn message(id: &str) -> TaskMessage {
        TaskMessage::new(id.to_string(), JobRequest::Classes)
    }

    #[test]
    fn test_queue_is_fifo() {
        let queue = TaskQueue::new(10, Duration::from_secs(60));
        queue.enqueue(message("1")).unwrap();
        queue.enqueue(message("2")).unwrap();
        queue.enqueue(message("3")).unwrap();

        let order: Vec<String> = (0..3)
            .map(|_| queue.try_dequeue().unwrap().message.task_id)
            .collect();
        assert_eq!(order, vec!["1", "2", "3"]);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_queue_capacity() {
        let queue = TaskQueue::new(2, Duration::from_secs(60));

        assert!(queue.enqueue(message("1")).is_ok());
        assert!(queue.enqueue(message("2")).is_ok());
        let err = queue.enqueue(message("3")).unwrap_err();
        assert!(matches!(err, JobError::Dispatch(_)));
    }

    #[test]
    fn test_ack_removes_in_flight() {
        let queue = TaskQueue::new(10, Duration::from_secs(60));
        queue.enqueue(message("1")).unwrap();

        let delivery = queue.try_dequeue().unwrap();
        assert_eq!(delivery.message.delivery, 1);
        assert_eq!(queue.stats().in_flight, 1);

        assert!(queue.ack(delivery.receipt));
        assert!(!queue.ack(delivery.receipt));
        assert_eq!(queue.stats().in_flight, 0);
    }

    #[test]
    fn test_nack_redelivers_with_higher_count() {
        let queue = TaskQueue::new(10, Duration::from_secs(60));
        queue.enqueue(message("1")).unwrap();

        let first = queue.try_dequeue().unwrap();
        assert!(queue.nack(first.receipt));

        let second = queue.try_dequeue().unwrap();
        assert_eq!(second.message.task_id, "1");
        assert_eq!(second.message.delivery, 2);
        assert_eq!(queue.stats().redelivered, 1);
    }

    #[test]
    fn test_visibility_timeout_redelivers() {
        let queue = TaskQueue::new(10, Duration::from_millis(20));
        queue.enqueue(message("1")).unwrap();

        let first = queue.try_dequeue().unwrap();
        assert!(queue.try_dequeue().is_none());

        thread::sleep(Duration::from_millis(50));
        let second = queue.try_dequeue().unwrap();
        assert_eq!(second.message.delivery, 2);
        // El recibo viejo ya no vale
        assert!(!queue.ack(first.receipt));
        assert!(queue.ack(second.receipt));
    }

    #[test]
    fn test_close_wakes_blocked_worker() {
        let queue = TaskQueue::new(10, Duration::from_secs(60));
        let worker_queue = queue.clone();

        let handle = thread::spawn(move || worker_queue.dequeue());
        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert!(handle.join().unwrap().is_none());
        assert!(queue.enqueue(message("late")).is_err());
    }

    #[test]
    fn test_blocking_dequeue_receives() {
        let queue = TaskQueue::new(10, Duration::from_secs(60));
        let worker_queue = queue.clone();

        let handle = thread::spawn(move || worker_queue.dequeue().map(|d| d.message.task_id));
        thread::sleep(Duration::from_millis(20));
        queue.enqueue(message("42")).unwrap();

        assert_eq!(handle.join().unwrap().as_deref(), Some("42"));
    }
}
