use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use config::{Config, Environment, File, Map, Source};
use serde::Deserialize;

const DEFAULT_DATABASE_URL: &str = "sqlite://./data/server.db";

/// Pre-`APP__` variable names that still override the config file.
const LEGACY_ENV: [(&str, &str); 2] = [
    ("SERVER_BIND", "server_bind"),
    ("DATABASE_URL", "database_url"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    /// Service account the panels act as. When unset the server provisions
    /// a `role-panels` user on startup.
    #[serde(default)]
    pub system_user_id: Option<i64>,
    /// Idle selections older than this are forgotten. Unset keeps them until
    /// they are committed or replaced.
    #[serde(default)]
    pub selection_ttl_seconds: Option<u64>,
    pub selection_sweep_interval_seconds: u64,
    pub log_filter: String,
    pub max_body_bytes: usize,
}

impl Settings {
    pub fn selection_ttl(&self) -> Option<Duration> {
        self.selection_ttl_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.selection_sweep_interval_seconds.max(1))
    }
}

/// Defaults, then `server.toml` if present, then legacy variables, then `APP__*`.
pub fn load_settings() -> anyhow::Result<Settings> {
    settings_from_sources(
        File::with_name("server").required(false),
        env::vars().collect(),
    )
}

fn settings_from_sources(
    file: impl Source + Send + Sync + 'static,
    vars: Map<String, String>,
) -> anyhow::Result<Settings> {
    let legacy: Map<String, String> = LEGACY_ENV
        .iter()
        .filter_map(|(var, key)| vars.get(*var).map(|value| (key.to_string(), value.clone())))
        .collect();

    let settings = Config::builder()
        .set_default("server_bind", "127.0.0.1:8443")?
        .set_default("database_url", DEFAULT_DATABASE_URL)?
        .set_default("selection_sweep_interval_seconds", 60_i64)?
        .set_default("log_filter", "info")?
        .set_default("max_body_bytes", 64 * 1024_i64)?
        .add_source(file)
        .add_source(Environment::default().source(Some(legacy)))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true)
                .source(Some(vars)),
        )
        .build()
        .context("failed to assemble server settings")?;

    settings
        .try_deserialize()
        .context("invalid server settings")
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return DEFAULT_DATABASE_URL.to_string();
    }

    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite://") {
        if has_windows_drive(path) {
            return format!("sqlite:{}", path.replace('\\', "/"));
        }
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return sqlite_url_for_path(path);
    }

    if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    sqlite_url_for_path(raw_database_url)
}

fn sqlite_url_for_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    if has_windows_drive(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

// `C:` followed by a separator or nothing.
fn has_windows_drive(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && matches!(bytes.get(2), None | Some(b'/') | Some(b'\\'))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
