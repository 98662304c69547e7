//! Common traits and interfaces
//!
//! [`RegistryApi`] is the seam between the retention engine and the registry.
//! [`crate::registry::RegistryClient`] is the production implementation; tests
//! substitute an in-memory registry.

use crate::registry::Repository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Registry operations consumed by the purge engine and the UI layer.
///
/// Failures are logged by the implementation and surface as empty results,
/// `None` or `false`, never as errors.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Catalog, from cache when `use_cache` is set and a snapshot exists
    async fn list_repositories(&self, use_cache: bool) -> Vec<Repository>;

    /// Tag names of a repository in registry order
    async fn list_tags(&self, repository: &str) -> Vec<String>;

    /// Creation time of the image behind a tag, `None` when undeterminable
    async fn get_image_created(&self, repository: &str, tag: &str) -> Option<DateTime<Utc>>;

    /// Delete a tag by resolving it to its digest; `true` on success
    async fn delete_tag(&self, repository: &str, tag: &str) -> bool;
}

/// Validatable interface for consistent validation
pub trait Validatable {
    type Error;

    /// Validate the object
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}
