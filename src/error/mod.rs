//! Error types and handlers for registry operations

pub mod handlers;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Network related errors
    #[error("Network error: {0}")]
    Network(String),
    /// Registry answered with an unexpected status or payload
    #[error("Registry error: {0}")]
    Registry(String),
    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),
    /// File IO errors
    #[error("IO error: {0}")]
    Io(String),
    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),
    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for RegistryError {
    fn from(err: serde_yaml::Error) -> Self {
        RegistryError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Network(err.to_string())
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::Validation(err.to_string())
    }
}

impl From<regex::Error> for RegistryError {
    fn from(err: regex::Error) -> Self {
        RegistryError::Config(format!("invalid regexp: {}", err))
    }
}

impl From<std::string::FromUtf8Error> for RegistryError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        RegistryError::Parse(format!("UTF-8 conversion error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_category() {
        let err = RegistryError::Auth("bad credentials".to_string());
        assert_eq!(err.to_string(), "Authentication error: bad credentials");
    }

    #[test]
    fn regex_errors_are_config_errors() {
        let err: RegistryError = regex::Regex::new("(").unwrap_err().into();
        assert!(matches!(err, RegistryError::Config(_)));
    }
}
