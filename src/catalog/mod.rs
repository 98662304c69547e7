//! Background refresh of the catalog snapshot and tag counts
//!
//! The first catalog walk is awaited by the caller and is fatal when it fails.
//! After that two independent loops run: the catalog refresh on its interval,
//! and, started once, the tag counter on its own interval.

use crate::config::PerformanceConfig;
use crate::error::Result;
use crate::logging::Logger;
use crate::registry::RegistryClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Handles of the spawned loops; dropping them leaves the loops running
pub struct JobHandles {
    pub catalog: Option<JoinHandle<()>>,
    pub tag_counts: Option<JoinHandle<()>>,
}

impl JobHandles {
    pub fn abort(&self) {
        for handle in [&self.catalog, &self.tag_counts].into_iter().flatten() {
            handle.abort();
        }
    }
}

pub struct BackgroundJobs {
    client: Arc<RegistryClient>,
    catalog_interval: Option<Duration>,
    tags_count_interval: Option<Duration>,
    output: Logger,
}

impl BackgroundJobs {
    pub fn new(client: Arc<RegistryClient>, performance: &PerformanceConfig) -> Self {
        Self::with_intervals(
            client,
            performance.catalog_interval(),
            performance.tags_count_interval(),
        )
    }

    /// `None` disables the corresponding periodic refresh
    pub fn with_intervals(
        client: Arc<RegistryClient>,
        catalog_interval: Option<Duration>,
        tags_count_interval: Option<Duration>,
    ) -> Self {
        Self {
            client,
            catalog_interval,
            tags_count_interval,
            output: Logger::new("registry.tasks.catalog"),
        }
    }

    /// Run the first catalog refresh, then spawn the periodic loops.
    pub async fn start(self) -> Result<JobHandles> {
        self.client.refresh_catalog().await?;

        let tag_counts = match self.tags_count_interval {
            Some(interval) => Some(tokio::spawn(count_tags_loop(
                Arc::clone(&self.client),
                interval,
            ))),
            None => {
                self.output
                    .info("Tag counting is disabled in the config.");
                None
            }
        };

        let catalog = match self.catalog_interval {
            Some(interval) => Some(tokio::spawn(refresh_catalog_loop(
                Arc::clone(&self.client),
                interval,
                self.output.clone(),
            ))),
            None => {
                self.output.warning(
                    "Catalog refresh is disabled in the config and will not run anymore.",
                );
                None
            }
        };

        Ok(JobHandles {
            catalog,
            tag_counts,
        })
    }
}

async fn refresh_catalog_loop(client: Arc<RegistryClient>, interval: Duration, output: Logger) {
    loop {
        tokio::time::sleep(interval).await;
        if let Err(e) = client.refresh_catalog().await {
            output.error(&format!(
                "[RefreshCatalog] Error fetching catalog, keeping previous snapshot: {}",
                e
            ));
        }
    }
}

async fn count_tags_loop(client: Arc<RegistryClient>, interval: Duration) {
    loop {
        client.count_tags().await;
        tokio::time::sleep(interval).await;
    }
}
