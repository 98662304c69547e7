//! Registry credentials and the Docker client keychain.
//!
//! With `auth_with_keychain` the username and password come from the Docker
//! client config (`$DOCKER_CONFIG/config.json` or `~/.docker/config.json`),
//! where `auths.<registry>.auth` holds base64 `user:password`.

use crate::error::{RegistryError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Basic credentials, empty when anonymous
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Read-only view over the Docker client config file
pub struct DockerKeychain {
    path: PathBuf,
}

impl DockerKeychain {
    /// Keychain at `$DOCKER_CONFIG/config.json`, else `~/.docker/config.json`
    pub fn default_path() -> Result<Self> {
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
            return Ok(Self::new(PathBuf::from(dir).join("config.json")));
        }
        let home = std::env::var_os("HOME").ok_or_else(|| {
            RegistryError::Config("Cannot determine home directory for Docker config".to_string())
        })?;
        Ok(Self::new(
            PathBuf::from(home).join(".docker").join("config.json"),
        ))
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Credentials for `registry` (host or URL); anonymous when none are stored
    pub fn lookup(&self, registry: &str) -> Result<Credentials> {
        if !self.path.exists() {
            return Ok(Credentials::anonymous());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            RegistryError::Config(format!(
                "Failed to read Docker config {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let file: DockerConfigFile = serde_json::from_str(&data).map_err(|e| {
            RegistryError::Config(format!(
                "Failed to parse Docker config {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let wanted = normalize_registry(registry);
        let entry = file
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry);

        match entry {
            Some(entry) => decode_entry(entry),
            None => Ok(Credentials::anonymous()),
        }
    }
}

fn decode_entry(entry: &DockerAuthEntry) -> Result<Credentials> {
    if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let decoded = STANDARD
            .decode(auth.trim())
            .map_err(|e| RegistryError::Config(format!("Invalid keychain auth entry: {}", e)))?;
        let decoded = String::from_utf8(decoded)?;
        let (username, password) = decoded.split_once(':').ok_or_else(|| {
            RegistryError::Config("Keychain auth entry is not user:password".to_string())
        })?;
        return Ok(Credentials::new(username, password));
    }

    Ok(Credentials::new(
        entry.username.clone().unwrap_or_default(),
        entry.password.clone().unwrap_or_default(),
    ))
}

/// Normalize a registry reference to `host[:port]`.
///
/// Strips scheme and path so `https://registry.local/v1/` matches `registry.local`.
/// The Docker Hub aliases collapse to `docker.io`.
pub fn normalize_registry(registry: &str) -> String {
    let without_scheme = registry
        .strip_prefix("https://")
        .or_else(|| registry.strip_prefix("http://"))
        .unwrap_or(registry);
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_ascii_lowercase();

    match host.as_str() {
        "index.docker.io" | "registry-1.docker.io" => "docker.io".to_string(),
        _ => host,
    }
}
