use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::utils::error::{AppError, Result};

/// Installs the global subscriber. `RUST_LOG` wins over `logging.level` when set.
///
/// The returned guard flushes the file writer and must live as long as `main`.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AppError::Internal(format!("Invalid log filter '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer());

    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "estate-watcher.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .map_err(|e| AppError::Internal(format!("Failed to install tracing subscriber: {}", e)))?;
            Ok(Some(guard))
        }
        None => {
            registry
                .try_init()
                .map_err(|e| AppError::Internal(format!("Failed to install tracing subscriber: {}", e)))?;
            Ok(None)
        }
    }
}
