//! # Model Deploy
//! src/lib.rs
//!
//! Despacho asíncrono de jobs de larga duración (create, train, test,
//! predict, delete) sobre un registro versionado de modelos. El cliente
//! recibe un `task_id` al instante y consulta el resultado después.
//!
//! ## Arquitectura
//!
//! - `registry`: Registro de artefactos (índice + blobs direccionados por contenido)
//! - `models`: Clases de modelo soportadas y métricas
//! - `jobs`: Cola, store de resultados, executor, pool de workers, dispatcher y poller
//! - `config`: Configuración CLI/env
//! - `error`: Taxonomía de errores
//! - `logging`: Inicialización de tracing
//!
//! ## Ejemplo de uso
//!
//! ```ignore
//! use model_deploy::config::Config;
//! use model_deploy::jobs::{JobManager, JobRequest};
//!
//! let manager = JobManager::start(Config::default())?;
//! let task_id = manager.dispatcher().submit(JobRequest::Classes)?;
//! let snapshot = manager.poller().poll(&task_id)?;
//! ```

pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod registry;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Toma un mutex ignorando el envenenamiento. Un panic dentro de un handler
/// no debe dejar inutilizables los stores compartidos.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Escritura atómica: archivo temporal + rename (atómico en Unix)
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension("tmp");
    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    fs::rename(&temp_path, path)
}
