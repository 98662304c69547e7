//! Standardized error handling for registry HTTP exchanges

use crate::error::{RegistryError, Result};
use reqwest::StatusCode;

/// Standard error handler for HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Handle authentication-related HTTP errors
    pub fn handle_auth_error(status: StatusCode, error_text: &str) -> RegistryError {
        let error_msg = match status.as_u16() {
            400 => "Invalid token request parameters".to_string(),
            401 => "Invalid credentials provided".to_string(),
            403 => "Access denied - insufficient permissions".to_string(),
            404 => "Authentication endpoint not found".to_string(),
            _ => format!("Authentication failed (status {}): {}", status, error_text),
        };

        RegistryError::Auth(error_msg)
    }

    /// Handle registry-related HTTP errors
    pub fn handle_registry_error(
        status: StatusCode,
        error_text: &str,
        operation: &str,
    ) -> RegistryError {
        let error_msg = match status.as_u16() {
            401 => format!(
                "Unauthorized to perform {} operation: {}",
                operation, error_text
            ),
            403 => format!(
                "Forbidden: insufficient permissions for {}: {}",
                operation, error_text
            ),
            404 => return RegistryError::NotFound(format!("{}: {}", operation, error_text)),
            405 => format!(
                "Method not allowed for {} (is deletion enabled on the registry?): {}",
                operation, error_text
            ),
            429 => format!("Rate limited during {}: {}", operation, error_text),
            500 => format!("Registry server error during {}: {}", operation, error_text),
            502 | 503 => format!("Registry unavailable for {}: {}", operation, error_text),
            _ => format!("{} failed (status {}): {}", operation, status, error_text),
        };

        RegistryError::Registry(error_msg)
    }

    /// Read the body of a failed response and categorize it
    pub async fn from_response(response: reqwest::Response, operation: &str) -> RegistryError {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        Self::handle_registry_error(status, error_text.trim(), operation)
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors with helpful context
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> RegistryError {
        if error.is_timeout() {
            RegistryError::Network(format!("{} timeout: {}", context, error))
        } else if error.is_connect() {
            RegistryError::Network(format!("Connection error during {}: {}", context, error))
        } else if error.is_decode() {
            RegistryError::Parse(format!("Malformed response during {}: {}", context, error))
        } else if error.to_string().contains("certificate") {
            RegistryError::Network(format!(
                "TLS certificate error during {}: {}",
                context, error
            ))
        } else {
            RegistryError::Network(format!("{} network error: {}", context, error))
        }
    }
}

/// Validation error utilities
pub struct ValidationErrorHandler;

impl ValidationErrorHandler {
    /// Registry address must be an absolute http(s) URL
    pub fn validate_registry_url(address: &str) -> Result<url::Url> {
        if address.is_empty() {
            return Err(RegistryError::Validation(
                "Registry hostname cannot be empty".to_string(),
            ));
        }

        let url = url::Url::parse(address)?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(RegistryError::Validation(format!(
                "Registry address must be an http(s) URL with a host: {}",
                address
            )));
        }

        Ok(url)
    }

    /// Standard credential validation
    pub fn validate_credentials(username: &str, password: &str) -> Result<()> {
        if username.is_empty() && !password.is_empty() {
            return Err(RegistryError::Validation(
                "Username is required when password is provided".to_string(),
            ));
        }
        Ok(())
    }

    /// Standard numeric range validation
    pub fn validate_timeout(timeout: u64) -> Result<()> {
        if timeout == 0 {
            return Err(RegistryError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if timeout > 86400 {
            return Err(RegistryError::Validation(
                "Timeout cannot exceed 24 hours (86400 seconds)".to_string(),
            ));
        }

        Ok(())
    }
}
