//! Configuration management (TOML file, then environment overrides)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value {value:?} for {key}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watchdog: WatchdogConfig,
    pub sampler: SamplerConfig,
    pub history: HistoryConfig,
    pub cache: CacheConfig,
    pub safeguard: SafeguardConfig,
    pub alerts: AlertsConfig,
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub threshold_percent: f64,
    pub cooldown_seconds: u64,
    pub read_window_ms: u64,
    pub idle_seconds: u64,
    pub alert_top_n: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub window_ms: u64,
    pub default_top_n: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeguardConfig {
    pub wait_timeout_ms: u64,
    pub protected_pids: Vec<u32>,
    pub protected_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub desktop: bool,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub update_interval_seconds: u64,
    pub updates: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 90.0,
            cooldown_seconds: 300,
            read_window_ms: 1000,
            idle_seconds: 4,
            alert_top_n: 3,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            window_ms: 1000,
            default_top_n: 10,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 150,
            interval_seconds: 2,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 600,
            sweep_interval_seconds: 60,
        }
    }
}

impl Default for SafeguardConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 3000,
            protected_pids: vec![0, 1, 2],
            protected_names: vec![
                "systemd".to_string(),
                "init".to_string(),
                "kthreadd".to_string(),
            ],
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            desktop: false,
            timeout_seconds: 10,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            update_interval_seconds: 2,
            updates: 150,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("HOSTGUARD_CONFIG") {
            return PathBuf::from(path);
        }
        directories::ProjectDirs::from("", "", "hostguard")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOSTGUARD_CPU_THRESHOLD") {
            self.watchdog.threshold_percent = parse_env("HOSTGUARD_CPU_THRESHOLD", &v)?;
        }
        if let Some(v) = get("HOSTGUARD_ALERT_COOLDOWN") {
            self.watchdog.cooldown_seconds = parse_env("HOSTGUARD_ALERT_COOLDOWN", &v)?;
        }
        if let Some(v) = get("HOSTGUARD_SAMPLE_WINDOW_MS") {
            self.sampler.window_ms = parse_env("HOSTGUARD_SAMPLE_WINDOW_MS", &v)?;
        }
        if let Some(v) = get("HOSTGUARD_HISTORY_CAPACITY") {
            self.history.capacity = parse_env("HOSTGUARD_HISTORY_CAPACITY", &v)?;
        }
        if let Some(v) = get("HOSTGUARD_CACHE_TTL") {
            self.cache.ttl_seconds = parse_env("HOSTGUARD_CACHE_TTL", &v)?;
        }
        if let Some(v) = get("HOSTGUARD_TERMINATE_TIMEOUT_MS") {
            self.safeguard.wait_timeout_ms = parse_env("HOSTGUARD_TERMINATE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("HOSTGUARD_WEBHOOK").or_else(|| get("CPU_ALERT_WEBHOOK")) {
            self.alerts.webhook_url = Some(v.trim().to_string());
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.watchdog.cooldown_seconds)
    }

    pub fn sample_window(&self) -> Duration {
        Duration::from_millis(self.sampler.window_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.safeguard.wait_timeout_ms)
    }
}
