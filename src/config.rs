//! Client configuration helpers.
//!
//! Loads, validates and resolves the user-level config file. Every field has a
//! default so the tool works without a config file at all.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const API_URL_ENV: &str = "RFPFLOW_API_URL";

const APP_DIR: &str = "rfpflow";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub schema_version: u32,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_path: Option<PathBuf>,
    #[serde(default)]
    pub progress: ProgressConfig,
}

/// Timers for the simulated extraction display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_step_percent")]
    pub step_percent: u8,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            step_percent: default_step_percent(),
            settle_ms: default_settle_ms(),
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_tick_ms() -> u64 {
    100
}

fn default_step_percent() -> u8 {
    5
}

fn default_settle_ms() -> u64 {
    500
}

pub fn default_config() -> ClientConfig {
    ClientConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        api_base_url: default_api_base_url(),
        session_path: None,
        progress: ProgressConfig::default(),
    }
}

/// `<config_dir>/rfpflow/`, when the platform has a config directory.
pub fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR))
}

pub fn default_config_path() -> Option<PathBuf> {
    app_config_dir().map(|dir| dir.join(CONFIG_FILE))
}

pub fn load_config(path: &Path) -> Result<ClientConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: ClientConfig =
        serde_json::from_slice(&bytes).context("parse client config JSON")?;
    validate_config(&config).with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &ClientConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create config dir")?;
    }
    let text = serde_json::to_string_pretty(config).context("serialize client config")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn validate_config(config: &ClientConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported client config schema_version {}",
            config.schema_version
        ));
    }
    validate_base_url(&config.api_base_url)?;
    let step = config.progress.step_percent;
    if step == 0 || step > 100 {
        return Err(anyhow!(
            "progress.step_percent must be between 1 and 100 (got {step})"
        ));
    }
    Ok(())
}

fn validate_base_url(url: &str) -> Result<()> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("api_base_url must be non-empty"));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(anyhow!(
            "api_base_url must start with http:// or https:// (got {trimmed:?})"
        ));
    }
    Ok(())
}

/// Config as loaded, plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ClientConfig,
    pub source: Option<PathBuf>,
}

/// Load the explicit config file, else the default location, else defaults.
///
/// An explicit path must exist; the default location is optional.
pub fn load_effective(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        return Ok(LoadedConfig {
            config: load_config(path)?,
            source: Some(path.to_path_buf()),
        });
    }
    match default_config_path() {
        Some(path) if path.is_file() => Ok(LoadedConfig {
            config: load_config(&path)?,
            source: Some(path),
        }),
        _ => Ok(LoadedConfig {
            config: default_config(),
            source: None,
        }),
    }
}

/// Base URL by priority: flag, then `RFPFLOW_API_URL`, then config.
pub fn resolve_api_url(flag: Option<&str>, config: &ClientConfig) -> Result<String> {
    let env_value = env::var(API_URL_ENV).ok();
    let url = pick_api_url(flag, env_value.as_deref(), config);
    validate_base_url(&url)?;
    Ok(url.trim().trim_end_matches('/').to_string())
}

fn pick_api_url(flag: Option<&str>, env_value: Option<&str>, config: &ClientConfig) -> String {
    flag.or(env_value)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| config.api_base_url.clone())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
