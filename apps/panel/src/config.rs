use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use client_core::{ControllerSettings, Endpoints, FileSessionStore};
use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "fire_panel.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub poll_interval_ms: u64,
    pub refresh_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub session_file: Option<PathBuf>,
    pub endpoints: Endpoints,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".into(),
            poll_interval_ms: 5_000,
            refresh_delay_ms: 500,
            request_timeout_secs: 10,
            session_file: None,
            endpoints: Endpoints::default(),
        }
    }
}

impl Settings {
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            refresh_delay: Duration::from_millis(self.refresh_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_file_path(&self) -> anyhow::Result<PathBuf> {
        match &self.session_file {
            Some(path) => Ok(path.clone()),
            None => FileSessionStore::default_path(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    poll_interval_ms: Option<toml::Value>,
    refresh_delay_ms: Option<toml::Value>,
    request_timeout_secs: Option<toml::Value>,
    session_file: Option<PathBuf>,
    #[serde(default)]
    endpoints: FileEndpoints,
}

#[derive(Debug, Default, Deserialize)]
struct FileEndpoints {
    login: Option<String>,
    trigger_protocol: Option<String>,
    reset: Option<String>,
    status: Option<String>,
}

/// Defaults, then the config file, then environment overrides.
///
/// An explicitly requested file must exist; the default `fire_panel.toml` is
/// optional.
pub fn load_settings(explicit_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let path = explicit_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    match fs::read_to_string(path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?,
        Err(err) if explicit_path.is_some() => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
        Err(_) => {}
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;

    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg
        .poll_interval_ms
        .and_then(|raw| file_u64("poll_interval_ms", &raw))
        .and_then(|v| accept(Key::PollInterval, v))
    {
        settings.poll_interval_ms = v;
    }
    if let Some(v) = file_cfg
        .refresh_delay_ms
        .and_then(|raw| file_u64("refresh_delay_ms", &raw))
        .and_then(|v| accept(Key::RefreshDelay, v))
    {
        settings.refresh_delay_ms = v;
    }
    if let Some(v) = file_cfg
        .request_timeout_secs
        .and_then(|raw| file_u64("request_timeout_secs", &raw))
        .and_then(|v| accept(Key::RequestTimeout, v))
    {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file_cfg.session_file {
        settings.session_file = Some(v);
    }

    let endpoints = file_cfg.endpoints;
    if let Some(v) = endpoints.login {
        settings.endpoints.login = v;
    }
    if let Some(v) = endpoints.trigger_protocol {
        settings.endpoints.trigger_protocol = v;
    }
    if let Some(v) = endpoints.reset {
        settings.endpoints.reset = v;
    }
    if let Some(v) = endpoints.status {
        settings.endpoints.status = v;
    }
    Ok(())
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("FIRE_PANEL_API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = var("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) =
        env_u64(&var, "APP__POLL_INTERVAL_MS").and_then(|v| accept(Key::PollInterval, v))
    {
        settings.poll_interval_ms = v;
    }
    if let Some(v) =
        env_u64(&var, "APP__REFRESH_DELAY_MS").and_then(|v| accept(Key::RefreshDelay, v))
    {
        settings.refresh_delay_ms = v;
    }
    if let Some(v) =
        env_u64(&var, "APP__REQUEST_TIMEOUT_SECS").and_then(|v| accept(Key::RequestTimeout, v))
    {
        settings.request_timeout_secs = v;
    }

    if let Some(v) = var("APP__SESSION_FILE") {
        settings.session_file = Some(PathBuf::from(v));
    }
}

#[derive(Debug, Clone, Copy)]
enum Key {
    PollInterval,
    RefreshDelay,
    RequestTimeout,
}

/// Per-key range check shared by the file and the environment. A zero
/// refresh delay means "refresh right away"; the other two must be positive.
fn accept(key: Key, value: u64) -> Option<u64> {
    let allows_zero = matches!(key, Key::RefreshDelay);
    if value == 0 && !allows_zero {
        warn!(?key, "ignoring zero value, keeping previous setting");
        return None;
    }
    Some(value)
}

fn file_u64(key: &str, raw: &toml::Value) -> Option<u64> {
    let parsed = raw.as_integer().and_then(|v| u64::try_from(v).ok());
    if parsed.is_none() {
        warn!(%key, value = %raw, "ignoring invalid numeric setting in config file");
    }
    parsed
}

fn env_u64(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = var(key)?;
    match raw.trim().parse::<u64>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(%key, value = %raw, "ignoring invalid numeric override");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
