//! Service runner: config, registry client, background jobs and purge triggers

use crate::catalog::BackgroundJobs;
use crate::cli::args::Args;
use crate::common::Validatable;
use crate::config::AppConfig;
use crate::error::Result;
use crate::logging::{self, Logger};
use crate::purge::{PurgeEngine, PurgeReport, spawn_schedule};
use crate::registry::{RegistryClient, RegistryClientBuilder};
use std::path::Path;
use std::sync::Arc;

pub struct Runner {
    args: Args,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        Self {
            args,
            output: Logger::new("registry-ui"),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let config = self.load_config()?;
        logging::init(config.debug);

        self.output.section("Registry UI");
        self.output.info(&format!(
            "Registry: {} (TLS verification {})",
            config.registry.address(),
            if config.registry.verify_tls { "on" } else { "off" }
        ));

        let client = self.create_registry_client(&config).await?;
        let engine = Arc::new(PurgeEngine::new(
            client.clone(),
            config.purge_tags.clone(),
        ));

        if self.args.purge_tags {
            let report = engine.run(&self.args.purge_options()).await?;
            self.log_report(&report);
            return Ok(());
        }

        let jobs = BackgroundJobs::new(client.clone(), &config.performance)
            .start()
            .await?;

        let schedule = match config.purge_tags.schedule_interval()? {
            Some(interval) => {
                self.output.info(&format!(
                    "Purging old tags every {}",
                    humantime::format_duration(interval)
                ));
                Some(spawn_schedule(engine, interval, self.args.purge_options()))
            }
            None => None,
        };

        self.output.success(&format!(
            "Catalog ready with {} repositories; press Ctrl-C to stop",
            client.catalog().len()
        ));
        tokio::signal::ctrl_c().await?;

        self.output.info("Shutting down");
        jobs.abort();
        if let Some(schedule) = schedule {
            schedule.abort();
        }
        Ok(())
    }

    fn load_config(&self) -> Result<AppConfig> {
        self.args.validate()?;
        let mut config = AppConfig::load(Path::new(&self.args.config_file))?;
        if self.args.verbose {
            config.debug = true;
        }
        config.validate()?;
        Ok(config)
    }

    async fn create_registry_client(&self, config: &AppConfig) -> Result<Arc<RegistryClient>> {
        let client = RegistryClientBuilder::from_config(&config.registry, &config.performance)?
            .build()
            .await?;
        Ok(Arc::new(client))
    }

    fn log_report(&self, report: &PurgeReport) {
        let mode = if report.dry_run { " (dry-run)" } else { "" };
        self.output.info(&format!(
            "Purge summary{}: {} repositories, {} tags evaluated, {} skipped, {} planned, {} deleted, {} failed",
            mode,
            report.scanned_repositories,
            report.evaluated_tags,
            report.skipped_tags,
            report.planned(),
            report.deleted,
            report.failed
        ));
        for (repository, plan) in &report.plan.repositories {
            self.output.detail(&format!(
                "{}: keep {}, purge {}",
                repository,
                plan.keep.len(),
                plan.purge.len()
            ));
        }
        self.output.detail(&format!(
            "Elapsed since start: {}",
            self.output.format_duration(self.output.elapsed())
        ));
    }
}
