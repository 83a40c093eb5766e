use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::instances::{Instance, InstanceId};

pub const DEFAULT_PASSWORD_ENV: &str = "MDB_DB_PASSWORD";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disabled,
    #[default]
    Prefer,
    Require,
    VerifyIdentity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSource {
    #[default]
    EnvVar,
    Keyring,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Connects to every configured instance itself.
    #[default]
    #[serde(alias = "mysql")]
    Direct,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            directory: None,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_dialect() -> String {
    "mysql".to_string()
}

fn default_password_env() -> String {
    DEFAULT_PASSWORD_ENV.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    /// Falls back to the dialect's well-known port when absent.
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub tls_mode: TlsMode,
    #[serde(default)]
    pub tls_ca_cert_path: Option<String>,
    #[serde(default)]
    pub password_source: PasswordSource,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default)]
    pub keyring_service: Option<String>,
    #[serde(default)]
    pub keyring_account: Option<String>,
}

impl ConnectionSettings {
    #[must_use]
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: user.into(),
            database: None,
            tls_mode: TlsMode::Prefer,
            tls_ca_cert_path: None,
            password_source: PasswordSource::EnvVar,
            password_env: default_password_env(),
            keyring_service: None,
            keyring_account: None,
        }
    }

    #[must_use]
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

/// One database instance reachable by the direct backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceConfig {
    pub id: InstanceId,
    pub group_type: String,
    pub title: String,
    #[serde(default = "default_dialect")]
    pub dialect: String,
    #[serde(flatten)]
    pub connection: ConnectionSettings,
}

impl InstanceConfig {
    #[must_use]
    pub fn instance(&self) -> Instance {
        Instance::new(
            self.id,
            self.group_type.clone(),
            self.title.clone(),
            self.dialect.clone(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub history_limit: Option<usize>,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config at {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

impl AppConfig {
    pub fn load_default() -> Result<(PathBuf, Self), ConfigError> {
        let path = default_config_path()?;
        let config = Self::load_from_path(&path)?;
        Ok((path, config))
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.normalize();
        config.validate(path)?;
        Ok(config)
    }

    fn normalize(&mut self) {
        let mut seen = HashSet::new();
        self.instances.retain(|instance| {
            let fresh = seen.insert((instance.id, instance.group_type.clone()));
            if !fresh {
                warn!(
                    id = instance.id,
                    group_type = %instance.group_type,
                    "duplicate instance in config, keeping the first"
                );
            }
            fresh
        });
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason,
        };

        let has_base_url = self
            .backend
            .base_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty());
        if self.backend.kind == BackendKind::Http && !has_base_url {
            return Err(invalid("http backend requires `backend.base_url`".to_string()));
        }

        if let Some(instance) = self
            .instances
            .iter()
            .find(|instance| instance.group_type.trim().is_empty())
        {
            return Err(invalid(format!(
                "instance {} has an empty group_type",
                instance.id
            )));
        }
        Ok(())
    }
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = if let Some(custom) = env::var_os("MDB_CONFIG_DIR") {
        PathBuf::from(custom)
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("mdb"))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(default_config_dir()?.join("config.toml"))
}
