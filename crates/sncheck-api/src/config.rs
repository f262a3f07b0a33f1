//! Client configuration.
//!
//! Each setting resolves from its environment variable first, then
//! `~/.sncheck/config.toml`, then the built-in default.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_URL_ENV: &str = "SNCHECK_API_URL";
pub const OAUTH_PROVIDER_ENV: &str = "SNCHECK_OAUTH_PROVIDER";

/// Upper bound for parallel lookups, regardless of what the config asks for.
pub const MAX_CONCURRENCY: usize = 8;

fn default_api_url() -> String {
    #[cfg(debug_assertions)]
    return "http://localhost:9991".to_string();
    #[cfg(not(debug_assertions))]
    return option_env!("SNCHECK_DEFAULT_API_URL")
        .unwrap_or("http://localhost:9991")
        .to_string();
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    api_url: Option<String>,
    oauth_provider: Option<String>,
    revalidate_interval_secs: Option<u64>,
    debounce_ms: Option<u64>,
    concurrency: Option<usize>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub oauth_provider: String,
    pub revalidate_interval: Duration,
    pub debounce: Duration,
    pub concurrency: usize,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            oauth_provider: "google".to_string(),
            revalidate_interval: Duration::from_secs(5 * 60),
            debounce: Duration::from_millis(300),
            concurrency: 1,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// `~/.sncheck`, created on demand.
pub fn config_dir() -> Result<PathBuf> {
    let home_dir = dirs::home_dir().context("Failed to get home directory")?;
    let dir = home_dir.join(".sncheck");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

impl Config {
    /// Load from the default location and the process environment.
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join("config.toml");
        Self::load_from(&path, |key| std::env::var(key).ok())
    }

    pub fn load_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str::<ConfigFile>(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            ConfigFile::default()
        };

        let defaults = Config::default();
        let api_url = env(API_URL_ENV)
            .or(file.api_url)
            .unwrap_or(defaults.api_url);

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            oauth_provider: env(OAUTH_PROVIDER_ENV)
                .or(file.oauth_provider)
                .unwrap_or(defaults.oauth_provider),
            revalidate_interval: file
                .revalidate_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.revalidate_interval),
            debounce: file
                .debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
            concurrency: file
                .concurrency
                .unwrap_or(defaults.concurrency)
                .clamp(1, MAX_CONCURRENCY),
            request_timeout: file
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        })
    }
}
