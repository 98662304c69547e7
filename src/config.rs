//! Configuration management module
//!
//! The service is configured from a YAML file (`config.yml` by default) with a
//! handful of environment overrides for secrets and deployment specifics.

use crate::common::Validatable;
use crate::error::handlers::ValidationErrorHandler;
use crate::error::{RegistryError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variables overriding file settings
pub const ENV_PREFIX: &str = "REGISTRY_UI_";

/// Registry connection and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry address; `https://` is assumed when no scheme is given
    pub hostname: String,
    pub username: String,
    pub password: String,
    /// Read the password from this file when `password` is empty
    pub password_file: String,
    /// Take credentials from the Docker client config instead
    pub auth_with_keychain: bool,
    pub verify_tls: bool,
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            password_file: String::new(),
            auth_with_keychain: false,
            verify_tls: true,
            timeout_secs: 30,
        }
    }
}

impl RegistryConfig {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Self::default()
        }
    }

    /// Base URL of the registry without a trailing slash
    pub fn address(&self) -> String {
        let hostname = self.hostname.trim().trim_end_matches('/');
        if hostname.starts_with("http://") || hostname.starts_with("https://") {
            hostname.to_string()
        } else {
            format!("https://{}", hostname)
        }
    }

    /// Password from config, falling back to `password_file` without its trailing newline
    pub fn resolve_password(&self) -> Result<String> {
        if !self.password.is_empty() || self.password_file.is_empty() {
            return Ok(self.password.clone());
        }

        let data = std::fs::read_to_string(&self.password_file).map_err(|e| {
            RegistryError::Config(format!(
                "Cannot read password file {}: {}",
                self.password_file, e
            ))
        })?;
        Ok(data.strip_suffix('\n').unwrap_or(&data).to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(RegistryError::Validation(
                "registry.hostname cannot be empty".to_string(),
            ));
        }
        ValidationErrorHandler::validate_registry_url(&self.address())?;
        ValidationErrorHandler::validate_timeout(self.timeout_secs)?;
        if !self.auth_with_keychain {
            ValidationErrorHandler::validate_credentials(&self.username, &self.password)?;
        }
        Ok(())
    }
}

/// Background job intervals (minutes) and catalog paging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub catalog_page_size: usize,
    /// 0 disables refreshes after the first one
    pub catalog_refresh_interval: u64,
    /// 0 disables tag counting
    pub tags_count_refresh_interval: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            catalog_page_size: 100,
            catalog_refresh_interval: 10,
            tags_count_refresh_interval: 60,
        }
    }
}

impl PerformanceConfig {
    pub fn catalog_interval(&self) -> Option<Duration> {
        minutes(self.catalog_refresh_interval)
    }

    pub fn tags_count_interval(&self) -> Option<Duration> {
        minutes(self.tags_count_refresh_interval)
    }
}

fn minutes(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value * 60))
}

/// Retention policy for the purge job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeTagsConfig {
    pub keep_days: i64,
    pub keep_count: usize,
    pub keep_regexp: String,
    pub keep_from_file: String,
    /// Interval between scheduled purges, e.g. `24h`; empty disables scheduling
    pub schedule: String,
}

impl Default for PurgeTagsConfig {
    fn default() -> Self {
        Self {
            keep_days: 90,
            keep_count: 10,
            keep_regexp: String::new(),
            keep_from_file: String::new(),
            schedule: String::new(),
        }
    }
}

impl PurgeTagsConfig {
    pub fn schedule_interval(&self) -> Result<Option<Duration>> {
        let schedule = self.schedule.trim();
        if schedule.is_empty() {
            return Ok(None);
        }
        let interval = humantime::parse_duration(schedule).map_err(|e| {
            RegistryError::Config(format!("invalid purge_tags.schedule '{}': {}", schedule, e))
        })?;
        if interval.is_zero() {
            return Err(RegistryError::Config(
                "purge_tags.schedule must be greater than zero".to_string(),
            ));
        }
        Ok(Some(interval))
    }

    pub fn validate(&self) -> Result<()> {
        if self.keep_days < 0 {
            return Err(RegistryError::Validation(
                "purge_tags.keep_days cannot be negative".to_string(),
            ));
        }
        if !self.keep_regexp.is_empty() {
            Regex::new(&self.keep_regexp)?;
        }
        self.schedule_interval()?;
        Ok(())
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub registry: RegistryConfig,
    pub performance: PerformanceConfig,
    pub purge_tags: PurgeTagsConfig,
    pub debug: bool,
}

impl AppConfig {
    /// Load from a YAML file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Override file values from `REGISTRY_UI_*` variables returned by `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(hostname) = var("HOSTNAME") {
            self.registry.hostname = hostname;
        }
        if let Some(username) = var("USERNAME") {
            self.registry.username = username;
        }
        if let Some(password) = var("PASSWORD") {
            self.registry.password = password;
        }
        if let Some(verify_tls) = var("VERIFY_TLS") {
            self.registry.verify_tls = parse_bool(&verify_tls, self.registry.verify_tls);
        }
        if let Some(debug) = var("DEBUG") {
            self.debug = parse_bool(&debug, self.debug);
        }
    }
}

fn parse_bool(value: &str, fallback: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => fallback,
    }
}

impl Validatable for AppConfig {
    type Error = RegistryError;

    fn validate(&self) -> Result<()> {
        self.registry.validate()?;
        if self.performance.catalog_page_size == 0 {
            return Err(RegistryError::Validation(
                "performance.catalog_page_size must be greater than 0".to_string(),
            ));
        }
        self.purge_tags.validate()
    }
}
