//! Registry module for Docker registry interactions
//!
//! This module provides authentication and client logic for interacting with Docker Registry HTTP API v2.
//! It supports auth scheme discovery, per-scope token caching, catalog and tag listing,
//! manifest inspection and tag deletion.

pub mod auth;
pub mod client;
pub mod credentials;
pub mod manifest;
pub mod token_manager;

pub use auth::{Auth, AuthScheme};
pub use client::{RegistryClient, RegistryClientBuilder};
pub use credentials::{Credentials, DockerKeychain};
pub use manifest::{ImageInfo, ManifestResponse, ManifestType};
pub use token_manager::TokenManager;

use serde::Serialize;

/// Namespace used for repositories without a `/` in their path
pub const DEFAULT_NAMESPACE: &str = "library";

/// A repository as listed in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Repository {
    /// Full path as the registry knows it, e.g. `team/app`
    pub path: String,
    pub namespace: String,
    /// Path below the namespace
    pub name: String,
}

impl Repository {
    /// Split at the first `/`; paths without one land in the `library` namespace
    pub fn from_path(path: &str) -> Self {
        let (namespace, name) = match path.split_once('/') {
            Some((namespace, name)) => (namespace.to_string(), name.to_string()),
            None => (DEFAULT_NAMESPACE.to_string(), path.to_string()),
        };
        Self {
            path: path.to_string(),
            namespace,
            name,
        }
    }
}
