//! # Sistema de Jobs
//!
//! Despacho asíncrono de jobs con correlación de resultados.
//!
//! ## Flujo
//!
//! ```text
//! Dispatcher → TaskQueue → workers (JobExecutor) → Registry
//!                              ↓
//!                         ResultStore ← Poller
//! ```
//!
//! El dispatcher y el poller no guardan estado: todo vive en la cola, el
//! store de resultados y el registro.

pub mod dispatcher;
pub mod executor;
pub mod manager;
pub mod poller;
pub mod queue;
pub mod results;
pub mod types;

pub use dispatcher::Dispatcher;
pub use executor::JobExecutor;
pub use manager::JobManager;
pub use poller::Poller;
pub use queue::{QueueStats, TaskMessage, TaskQueue};
pub use results::{Claim, ResultStore};
pub use types::{JobRequest, TaskError, TaskKind, TaskRecord, TaskSnapshot, TaskState};
