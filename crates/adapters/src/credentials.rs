use mdb_core::config::{InstanceConfig, PasswordSource};
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
use tracing::warn;

const DEFAULT_KEYRING_SERVICE: &str = "mdb";

/// Password for an instance, from its environment variable or the OS keyring.
/// A keyring lookup that misses falls back to the variable and stores it.
pub(crate) fn resolve_password(config: &InstanceConfig) -> Option<String> {
    let settings = &config.connection;
    let env_password = std::env::var(&settings.password_env)
        .ok()
        .filter(|pw| !pw.is_empty());

    match settings.password_source {
        PasswordSource::EnvVar => env_password,
        PasswordSource::Keyring => {
            if let Some(password) = load_keyring_password(config) {
                return Some(password);
            }

            if let Some(password) = env_password {
                store_keyring_password(config, &password);
                return Some(password);
            }

            None
        }
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn load_keyring_password(config: &InstanceConfig) -> Option<String> {
    let entry = keyring_entry(config)?;
    entry.get_password().ok().filter(|pw| !pw.is_empty())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn load_keyring_password(_config: &InstanceConfig) -> Option<String> {
    None
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn store_keyring_password(config: &InstanceConfig, password: &str) {
    if password.is_empty() {
        return;
    }
    if let Some(entry) = keyring_entry(config) {
        if let Err(error) = entry.set_password(password) {
            warn!(id = config.id, %error, "failed to store password in keyring");
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn store_keyring_password(_config: &InstanceConfig, _password: &str) {}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn keyring_entry(config: &InstanceConfig) -> Option<keyring::Entry> {
    let settings = &config.connection;
    let service =
        non_empty(settings.keyring_service.as_deref()).unwrap_or(DEFAULT_KEYRING_SERVICE);
    let account = non_empty(settings.keyring_account.as_deref())
        .map_or_else(|| keyring_account(config), str::to_string);
    keyring::Entry::new(service, &account).ok()
}

fn keyring_account(config: &InstanceConfig) -> String {
    format!("{}-{}", config.group_type, config.id)
}
