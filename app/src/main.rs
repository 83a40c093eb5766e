mod logging;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mdb_adapters::direct::DirectQueryService;
use mdb_adapters::http::HttpQueryService;
use mdb_core::config::{AppConfig, BackendKind, ConfigError};
use mdb_core::dispatcher::QueryService;
use mdb_core::history::QueryHistory;
use mdb_tui::TuiError;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
enum AppError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to prepare log directory: {0}")]
    Logging(#[source] io::Error),
    #[error(transparent)]
    Tui(#[from] TuiError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct CliOptions {
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParseOutcome {
    Run(CliOptions),
    HelpRequested,
}

fn parse_args_from(args: impl IntoIterator<Item = String>) -> Result<ParseOutcome, AppError> {
    let mut options = CliOptions::default();
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::HelpRequested),
            "-c" | "--config" => {
                options.config_path = Some(PathBuf::from(next_value(&mut args, "--config")?));
            }
            unknown => return Err(AppError::Usage(format!("unknown argument `{unknown}`"))),
        }
    }

    Ok(ParseOutcome::Run(options))
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, AppError> {
    args.next()
        .ok_or_else(|| AppError::Usage(format!("missing value for `{flag}`")))
}

fn print_help() {
    println!(
        "mdb: run one query against a group of databases\n\n\
Usage:\n  mdb-app [OPTIONS]\n\n\
Options:\n  -c, --config <path>  Config file (default: $MDB_CONFIG_DIR/mdb/config.toml)\n  -h, --help           Show this help\n\n\
Environment:\n  MDB_DB_PASSWORD is the default password variable for direct instances.\n  RUST_LOG overrides the configured log filter.\n"
    );
}

fn load_config(options: &CliOptions) -> Result<(PathBuf, AppConfig), ConfigError> {
    match &options.config_path {
        Some(path) => Ok((path.clone(), AppConfig::load_from_path(path)?)),
        None => AppConfig::load_default(),
    }
}

fn build_service(config: &AppConfig) -> Result<Arc<dyn QueryService>, AppError> {
    match config.backend.kind {
        BackendKind::Direct => Ok(Arc::new(DirectQueryService::from_config(&config.instances))),
        BackendKind::Http => {
            let base_url = config
                .backend
                .base_url
                .as_deref()
                .ok_or_else(|| AppError::Usage("http backend requires a base_url".to_string()))?;
            Ok(Arc::new(HttpQueryService::new(base_url)))
        }
    }
}

fn build_history(config: &AppConfig) -> QueryHistory {
    config
        .history_limit
        .map_or_else(QueryHistory::new, QueryHistory::with_capacity)
}

fn run_app(
    config: &AppConfig,
    run_tui: impl FnOnce(Arc<dyn QueryService>, QueryHistory) -> Result<(), TuiError>,
) -> Result<(), AppError> {
    let service = build_service(config)?;
    info!(backend = ?config.backend.kind, "query service ready");
    run_tui(service, build_history(config))?;
    Ok(())
}

fn start(config_path: &Path, config: &AppConfig) -> Result<(), AppError> {
    let log_dir =
        logging::init_tracing(&config.logging, config_path).map_err(AppError::Logging)?;
    info!(
        config = %config_path.display(),
        logs = %log_dir.display(),
        instances = config.instances.len(),
        "starting mdb"
    );
    run_app(config, mdb_tui::run)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = match parse_args_from(std::env::args().skip(1))? {
        ParseOutcome::HelpRequested => {
            print_help();
            return Ok(());
        }
        ParseOutcome::Run(options) => options,
    };

    let (config_path, config) = load_config(&options)?;
    start(&config_path, &config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io;
    use std::path::PathBuf;

    use mdb_core::config::{AppConfig, BackendKind};
    use tempfile::TempDir;

    use super::{load_config, parse_args_from, run_app, AppError, CliOptions, ParseOutcome};

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| (*arg).to_string()).collect()
    }

    #[test]
    fn parses_config_flag() {
        let outcome = parse_args_from(args(&["--config", "/tmp/mdb.toml"]))
            .expect("arguments should parse");
        assert_eq!(
            outcome,
            ParseOutcome::Run(CliOptions {
                config_path: Some(PathBuf::from("/tmp/mdb.toml")),
            })
        );

        assert_eq!(
            parse_args_from(Vec::new()).expect("no arguments should parse"),
            ParseOutcome::Run(CliOptions::default())
        );
    }

    #[test]
    fn help_and_invalid_arguments() {
        assert_eq!(
            parse_args_from(args(&["-h"])).expect("help should parse"),
            ParseOutcome::HelpRequested
        );

        let missing = parse_args_from(args(&["--config"])).expect_err("value required");
        assert_eq!(missing.to_string(), "missing value for `--config`");

        let unknown = parse_args_from(args(&["--verbose"])).expect_err("unknown flag");
        assert!(matches!(unknown, AppError::Usage(_)));
    }

    #[test]
    fn explicit_config_path_is_loaded() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("mdb.toml");
        fs::write(
            &path,
            "history_limit = 5\n[backend]\nkind = \"http\"\nbase_url = \"http://localhost:9000\"\n",
        )
        .expect("failed to write config");

        let (loaded_path, config) = load_config(&CliOptions {
            config_path: Some(path.clone()),
        })
        .expect("config should load");

        assert_eq!(loaded_path, path);
        assert_eq!(config.backend.kind, BackendKind::Http);
        assert_eq!(config.history_limit, Some(5));
    }

    #[test]
    fn run_app_hands_service_and_history_to_tui() {
        let result = run_app(&AppConfig::default(), |_, history| {
            assert!(history.is_empty());
            Ok(())
        });
        assert!(result.is_ok());
    }

    #[test]
    fn run_app_propagates_tui_errors() {
        let result = run_app(&AppConfig::default(), |_, _| {
            Err(mdb_tui::TuiError::Io(io::Error::other("boom")))
        });
        assert!(matches!(result, Err(AppError::Tui(_))));
    }

    #[test]
    fn http_backend_without_base_url_is_rejected() {
        let mut config = AppConfig::default();
        config.backend.kind = BackendKind::Http;

        let result = run_app(&config, |_, _| Ok(()));
        assert!(matches!(result, Err(AppError::Usage(_))));
    }
}
