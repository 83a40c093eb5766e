use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mdb_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "mdb.log";
const FALLBACK_FILTER: &str = "info";

/// Installs a daily rolling file subscriber. `RUST_LOG` overrides the
/// configured filter. Returns the log directory.
pub fn init_tracing(config: &LoggingConfig, config_path: &Path) -> io::Result<PathBuf> {
    let log_dir = log_directory(config, config_path);
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.filter))
        .with_writer(file_appender)
        .with_thread_names(true)
        .with_target(true)
        .with_ansi(false)
        .try_init();

    Ok(log_dir)
}

fn log_directory(config: &LoggingConfig, config_path: &Path) -> PathBuf {
    config.directory.clone().unwrap_or_else(|| {
        config_path
            .parent()
            .map_or_else(|| PathBuf::from("logs"), |dir| dir.join("logs"))
    })
}

fn env_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}
