//! # Logging
//! src/logging.rs
//!
//! Inicializa el subscriber de tracing. `RUST_LOG` tiene prioridad sobre el
//! nivel configurado; un filtro inválido cae a `info`.

use tracing_subscriber::EnvFilter;

/// Construye el filtro a partir del entorno o del nivel configurado
pub fn build_filter(level: &str) -> EnvFilter {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match level.parse::<EnvFilter>() {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!(
                    "WARN: LOG_LEVEL='{}' is not a valid tracing filter ({}); falling back to 'info'",
                    level, e
                );
                EnvFilter::new("info")
            }
        },
    }
}

/// Instala el subscriber global. Llamar una sola vez desde `main`.
/// Los logs van a stderr: stdout queda para el protocolo.
pub fn init(level: &str, json: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
