//! Common utilities and helper functions
//!
//! This module provides reusable utility functions that can be used across the codebase
//! to reduce code duplication and improve maintainability.

use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Timing utilities
pub struct Timer {
    start: Instant,
    description: String,
}

impl Timer {
    /// Start a new timer
    pub fn start(description: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            description: description.into(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Log elapsed time using provided logger
    pub fn log_elapsed(&self, logger: &Logger, suffix: &str) {
        logger.info(&format!(
            "{} ({}){}",
            self.description,
            logger.format_duration(self.elapsed()),
            suffix
        ));
    }
}

/// Format utilities
pub struct FormatUtils;

impl FormatUtils {
    /// Format bytes in readable units: `0 B`, `0 KB`, `0.0 MB`, `0.00 GB`.
    ///
    /// Divides while the value is strictly above 1024, so 1024 stays `1024 B`.
    pub fn pretty_size(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

        let mut size = bytes as f64;
        let mut unit_index = 0;
        while size > 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        let decimals = unit_index.saturating_sub(1);
        format!("{:.*} {}", decimals, size, UNITS[unit_index])
    }
}

/// Collection helpers shared by the catalog views and the purge engine
pub struct CollectionUtils;

impl CollectionUtils {
    /// Sorted copy of the items with duplicates removed
    pub fn unique_sorted(items: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut items: Vec<String> = items.into_iter().collect();
        items.sort();
        items.dedup();
        items
    }

    /// Items with later duplicates dropped, first occurrences in order
    pub fn unique_in_order(items: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut seen = HashSet::new();
        items
            .into_iter()
            .filter(|item| seen.insert(item.clone()))
            .collect()
    }
}

/// Validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate repository name
    pub fn validate_repository(repository: &str) -> Result<()> {
        if repository.is_empty() {
            return Err(RegistryError::Validation(
                "Repository cannot be empty".to_string(),
            ));
        }

        if repository.contains("//") || repository.starts_with('/') || repository.ends_with('/') {
            return Err(RegistryError::Validation(format!(
                "Invalid repository format: {}",
                repository
            )));
        }

        Ok(())
    }
}
