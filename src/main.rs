//! # Model Deploy - Entry Point
//! src/main.rs
//!
//! Front door mínimo sobre stdin/stdout: una petición JSON por línea, una
//! respuesta JSON por línea.
//!
//! ```text
//! {"op":"submit","request":{"kind":"create","class":"Linear regression","name":"m1"}}
//! {"op":"poll","task_id":"..."}
//! {"op":"stats"}
//! ```

use anyhow::Context;
use model_deploy::config::Config;
use model_deploy::error::JobError;
use model_deploy::jobs::{JobManager, JobRequest, TaskError};
use model_deploy::logging;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use tracing::{info, warn};

/// Operaciones del protocolo
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Command {
    Submit { request: JobRequest },
    Poll { task_id: String },
    Stats,
}

fn error_response(error: &JobError) -> Value {
    json!({ "error": TaskError::from(error) })
}

/// Atiende una línea y devuelve la respuesta
fn handle_line(manager: &JobManager, line: &str) -> Value {
    let command: Command = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => return error_response(&JobError::InvalidArgument(format!("bad request: {}", e))),
    };

    match command {
        Command::Submit { request } => match manager.dispatcher().submit(request) {
            Ok(task_id) => json!({ "task_id": task_id }),
            Err(e) => error_response(&e),
        },
        Command::Poll { task_id } => match manager.poller().poll(&task_id) {
            Ok(snapshot) => json!(snapshot),
            Err(e) => error_response(&e),
        },
        Command::Stats => manager.stats(),
    }
}

fn main() -> anyhow::Result<()> {
    let config = Config::new();
    config.validate()?;

    logging::init(&config.log_level, config.log_json);

    info!(
        data_dir = %config.data_dir,
        ephemeral = config.ephemeral,
        workers = config.workers,
        "Starting model_deploy"
    );

    let manager = JobManager::start(config).context("failed to start job manager")?;

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&manager, &line);
        if response.get("error").is_some() {
            warn!(response = %response, "Request failed");
        }

        serde_json::to_writer(&mut stdout, &response)?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
    }

    info!("stdin closed, shutting down");
    manager.shutdown();
    Ok(())
}
