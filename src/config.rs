//! # Configuración del Servicio
//! src/config.rs
//!
//! Configuración del pool de workers, las colas y los stores con soporte
//! completo para argumentos CLI y variables de entorno.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./model_deploy --workers 8 \
//!   --queue-capacity 256 \
//!   --task-timeout-ms 60000
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! DATA_DIR=/var/lib/models WORKERS=8 ./model_deploy
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error de validación de la configuración
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Configuración del servicio de despacho
#[derive(Debug, Clone, Parser)]
#[command(name = "model_deploy")]
#[command(about = "Despacho asíncrono de jobs sobre un registro versionado de modelos")]
#[command(version = "0.1.0")]
pub struct Config {
    /// Directorio raíz del registro y del store de resultados
    #[arg(long = "data-dir", default_value = "./data", env = "DATA_DIR")]
    pub data_dir: String,

    /// Mantener todo el estado en memoria (nada se escribe a disco)
    #[arg(long, env = "EPHEMERAL")]
    pub ephemeral: bool,

    // === Workers ===

    /// Número de workers que ejecutan jobs
    #[arg(long, default_value = "4", env = "WORKERS")]
    pub workers: usize,

    // === Cola ===

    /// Capacidad máxima de la cola de tareas
    #[arg(long = "queue-capacity", default_value = "1000", env = "QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Tiempo tras el cual una entrega sin ack se vuelve a entregar
    #[arg(long = "visibility-timeout-ms", default_value = "300000", env = "VISIBILITY_TIMEOUT_MS")]
    pub visibility_timeout_ms: u64,

    // === Timeouts y reintentos ===

    /// Plazo tras el cual una tarea sin estado terminal se reporta como timeout
    #[arg(long = "task-timeout-ms", default_value = "120000", env = "TASK_TIMEOUT_MS")]
    pub task_timeout_ms: u64,

    /// Intentos máximos ante errores transitorios del backend
    #[arg(long = "max-attempts", default_value = "3", env = "MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Base del backoff exponencial entre reintentos
    #[arg(long = "retry-backoff-ms", default_value = "200", env = "RETRY_BACKOFF_MS")]
    pub retry_backoff_ms: u64,

    // === Retención ===

    /// Segundos que se conservan las tareas terminadas
    #[arg(long = "result-retention-secs", default_value = "3600", env = "RESULT_RETENTION_SECS")]
    pub result_retention_secs: u64,

    /// Periodo del barrido de retención
    #[arg(long = "sweep-interval-ms", default_value = "60000", env = "SWEEP_INTERVAL_MS")]
    pub sweep_interval_ms: u64,

    // === Datos ===

    /// Columna objetivo para train/test
    #[arg(long = "target-column", default_value = "target", env = "TARGET_COLUMN")]
    pub target_column: String,

    // === Logging ===

    /// Filtro de tracing (RUST_LOG tiene prioridad)
    #[arg(long = "log-level", default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Emitir logs en formato JSON
    #[arg(long = "log-json", env = "LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    /// Crea una nueva configuración parseando argumentos CLI
    pub fn new() -> Self {
        Config::parse()
    }

    /// Directorio del registro de artefactos (None en modo efímero)
    pub fn registry_dir(&self) -> Option<PathBuf> {
        if self.ephemeral {
            None
        } else {
            Some(PathBuf::from(&self.data_dir).join("registry"))
        }
    }

    /// Archivo del store de resultados (None en modo efímero)
    pub fn results_path(&self) -> Option<PathBuf> {
        if self.ephemeral {
            None
        } else {
            Some(PathBuf::from(&self.data_dir).join("tasks.json"))
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Valida la configuración
    ///
    /// Retorna errores si hay valores inválidos
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError("workers must be >= 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError("queue capacity must be >= 1".to_string()));
        }
        if self.task_timeout_ms == 0 {
            return Err(ConfigError("task timeout must be > 0".to_string()));
        }
        if self.visibility_timeout_ms == 0 {
            return Err(ConfigError("visibility timeout must be > 0".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError("max attempts must be >= 1".to_string()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError("sweep interval must be > 0".to_string()));
        }
        if self.target_column.trim().is_empty() {
            return Err(ConfigError("target column must not be empty".to_string()));
        }

        Ok(())
    }
}

impl Default for Config {
    /// Configuración por defecto
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            ephemeral: false,
            workers: 4,
            queue_capacity: 1000,
            visibility_timeout_ms: 300_000,
            task_timeout_ms: 120_000,
            max_attempts: 3,
            retry_backoff_ms: 200,
            result_retention_secs: 3600,
            sweep_interval_ms: 60_000,
            target_column: "target".to_string(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.target_column, "target");
        assert!(!config.ephemeral);
    }

    #[test]
    fn test_validate_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_defaults_match_clap() {
        let parsed = Config::parse_from(["model_deploy"]);
        let default = Config::default();
        assert_eq!(parsed.workers, default.workers);
        assert_eq!(parsed.queue_capacity, default.queue_capacity);
        assert_eq!(parsed.task_timeout_ms, default.task_timeout_ms);
        assert_eq!(parsed.max_attempts, default.max_attempts);
        assert_eq!(parsed.target_column, default.target_column);
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::parse_from([
            "model_deploy",
            "--workers",
            "8",
            "--ephemeral",
            "--target-column",
            "label",
        ]);
        assert_eq!(config.workers, 8);
        assert!(config.ephemeral);
        assert_eq!(config.target_column, "label");
    }

    // ==================== Validation ====================

    #[test]
    fn test_validate_invalid_workers() {
        let mut config = Config::default();
        config.workers = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_validate_invalid_queue_capacity() {
        let mut config = Config::default();
        config.queue_capacity = 0;
        assert!(config.validate().unwrap_err().to_string().contains("queue capacity"));
    }

    #[test]
    fn test_validate_invalid_timeout() {
        let mut config = Config::default();
        config.task_timeout_ms = 0;
        assert!(config.validate().unwrap_err().to_string().contains("task timeout"));
    }

    #[test]
    fn test_validate_invalid_attempts() {
        let mut config = Config::default();
        config.max_attempts = 0;
        assert!(config.validate().unwrap_err().to_string().contains("max attempts"));
    }

    #[test]
    fn test_validate_empty_target_column() {
        let mut config = Config::default();
        config.target_column = "  ".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("target column"));
    }

    // ==================== Paths ====================

    #[test]
    fn test_paths_follow_data_dir() {
        let mut config = Config::default();
        config.data_dir = "/srv/models".to_string();
        assert_eq!(config.registry_dir(), Some(PathBuf::from("/srv/models/registry")));
        assert_eq!(config.results_path(), Some(PathBuf::from("/srv/models/tasks.json")));
    }

    #[test]
    fn test_ephemeral_has_no_paths() {
        let mut config = Config::default();
        config.ephemeral = true;
        assert!(config.registry_dir().is_none());
        assert!(config.results_path().is_none());
    }
}
