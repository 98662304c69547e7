//! Purge run: scan, classify, delete
//!
//! A run scans every repository of the catalog (or an explicit subset),
//! classifies the tags of each one against the [`KeepPolicy`], and deletes what
//! is left in the purge lists unless it is a dry run.

use crate::common::{CollectionUtils, RegistryApi, Timer};
use crate::config::PurgeTagsConfig;
use crate::error::Result;
use crate::logging::Logger;
use crate::purge::policy::{KeepPolicy, RepositoryPlan, TagData};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Creation-time lookups in flight per repository
const SCAN_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct PurgeOptions {
    pub dry_run: bool,
    /// Restrict the run to these repositories; empty means the whole catalog
    pub repositories: Vec<String>,
}

impl PurgeOptions {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Comma-separated repository list as given on the command line.
    /// Repeated names are scanned once.
    pub fn from_repos(mut self, repos: &str) -> Self {
        self.repositories = CollectionUtils::unique_in_order(
            repos
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        );
        self
    }
}

/// Per-repository plans in alphabetical order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgePlan {
    pub repositories: BTreeMap<String, RepositoryPlan>,
}

impl PurgePlan {
    pub fn total_purge(&self) -> usize {
        self.repositories.values().map(|p| p.purge.len()).sum()
    }

    /// Tags to purge per repository, repositories with nothing to purge left out
    pub fn purge_lists(&self) -> BTreeMap<&str, &[String]> {
        self.repositories
            .iter()
            .filter(|(_, plan)| !plan.purge.is_empty())
            .map(|(repo, plan)| (repo.as_str(), plan.purge.as_slice()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub dry_run: bool,
    pub scanned_repositories: usize,
    pub evaluated_tags: usize,
    /// Tags without a usable creation time
    pub skipped_tags: usize,
    pub deleted: usize,
    pub failed: usize,
    pub plan: PurgePlan,
}

impl PurgeReport {
    pub fn planned(&self) -> usize {
        self.plan.total_purge()
    }
}

pub struct PurgeEngine {
    api: Arc<dyn RegistryApi>,
    settings: PurgeTagsConfig,
    output: Logger,
}

impl PurgeEngine {
    pub fn new(api: Arc<dyn RegistryApi>, settings: PurgeTagsConfig) -> Self {
        Self {
            api,
            settings,
            output: Logger::new("registry.tasks.PurgeOldTags"),
        }
    }

    /// Run one purge.
    ///
    /// The policy is built first; an invalid regexp or an unreadable keep-list
    /// aborts the run before anything is scanned or deleted.
    pub async fn run(&self, options: &PurgeOptions) -> Result<PurgeReport> {
        let policy = KeepPolicy::from_config(&self.settings).inspect_err(|e| {
            self.output.error(&format!("{}. Not purging anything!", e));
        })?;
        self.run_with_policy(&policy, options, Utc::now()).await
    }

    pub async fn run_with_policy(
        &self,
        policy: &KeepPolicy,
        options: &PurgeOptions,
        now: DateTime<Utc>,
    ) -> Result<PurgeReport> {
        let timer = Timer::start("Purge finished");
        if options.dry_run {
            self.output.warning("Dry-run mode enabled.");
        }

        let catalog = self.catalog(options).await;
        let mut report = self.build_plan(&catalog, policy, now).await;
        report.dry_run = options.dry_run;

        self.execute(&mut report).await;
        timer.log_elapsed(&self.output, ".");
        Ok(report)
    }

    async fn catalog(&self, options: &PurgeOptions) -> Vec<String> {
        let repositories = if options.repositories.is_empty() {
            self.output
                .info("Scanning registry for repositories, tags and their creation dates...");
            self.api
                .list_repositories(false)
                .await
                .into_iter()
                .map(|r| r.path)
                .collect()
        } else {
            self.output.info(&format!(
                "Working on repositories [{}] to scan their tags and creation dates...",
                options.repositories.join(",")
            ));
            options.repositories.clone()
        };
        CollectionUtils::unique_in_order(repositories)
    }

    /// Scan the repositories and classify their tags; no deletions.
    ///
    /// Each repository and each tag is evaluated once, whatever the number of
    /// times the catalog or the tag listing names it.
    pub async fn build_plan(
        &self,
        catalog: &[String],
        policy: &KeepPolicy,
        now: DateTime<Utc>,
    ) -> PurgeReport {
        let catalog = CollectionUtils::unique_in_order(catalog.iter().cloned());
        let mut report = PurgeReport {
            scanned_repositories: catalog.len(),
            ..PurgeReport::default()
        };
        let mut scanned: BTreeMap<String, Vec<TagData>> = BTreeMap::new();

        for repository in &catalog {
            let tags = CollectionUtils::unique_in_order(self.api.list_tags(repository).await);
            if tags.is_empty() {
                continue;
            }
            self.output
                .info(&format!("[{}] scanning {} tags...", repository, tags.len()));

            let api = &self.api;
            let created: Vec<(String, Option<DateTime<Utc>>)> = stream::iter(tags)
                .map(|tag| async move {
                    let created = api.get_image_created(repository, &tag).await;
                    (tag, created)
                })
                .buffered(SCAN_CONCURRENCY)
                .collect()
                .await;

            for (tag, created) in created {
                match created {
                    Some(created) => scanned
                        .entry(repository.clone())
                        .or_default()
                        .push(TagData::new(tag, created)),
                    None => {
                        self.output.debug(&format!(
                            "[{}] tag without usable creation time: {}",
                            repository, tag
                        ));
                        report.skipped_tags += 1;
                    }
                }
            }
        }
        self.output
            .info(&format!("Scanned {} repositories.", catalog.len()));

        self.output.info(&format!(
            "Filtering out tags for purging: keep {} days, keep count {}",
            policy.keep_days, policy.keep_count
        ));
        if let Some(re) = &policy.keep_regexp {
            self.output
                .info(&format!("Keeping tags matching regexp: {}", re.as_str()));
        }
        if !policy.keep_list.is_empty() {
            self.output.info(&format!(
                "Keeping tags for {} repos from the keep file",
                policy.keep_list.repositories()
            ));
        }

        for (repository, tags) in scanned {
            report.evaluated_tags += tags.len();
            let pinned = policy.keep_list.tags_for(&repository);
            if !pinned.is_empty() {
                self.output.debug(&format!(
                    "[{}] Keep-file tags: {:?}",
                    repository, pinned
                ));
            }
            let plan = policy.classify(&repository, tags, now);

            let all: Vec<String> = plan.tags.iter().map(TagData::to_string).collect();
            self.output.info(&format!(
                "[{}] All {}: [{}]",
                repository,
                plan.tags.len(),
                all.join(" ")
            ));
            self.output.info(&format!(
                "[{}] Keep {}: {:?}",
                repository,
                plan.keep.len(),
                plan.kept_names()
            ));
            self.output.info(&format!(
                "[{}] Purge {}: {:?}",
                repository,
                plan.purge.len(),
                plan.purge
            ));

            report.plan.repositories.insert(repository, plan);
        }

        self.output
            .info(&format!("There are {} tags to purge.", report.plan.total_purge()));
        report
    }

    async fn execute(&self, report: &mut PurgeReport) {
        if report.plan.total_purge() > 0 {
            self.output.info("Purging old tags...");
        }

        let dry_run_text = if report.dry_run { " skipped" } else { "" };
        let mut deleted = 0;
        let mut failed = 0;
        for (repository, tags) in report.plan.purge_lists() {
            self.output.info(&format!(
                "[{}] Purging {} tags...{}",
                repository,
                tags.len(),
                dry_run_text
            ));
            if report.dry_run {
                continue;
            }
            for tag in tags {
                if self.api.delete_tag(repository, tag).await {
                    deleted += 1;
                } else {
                    failed += 1;
                }
            }
        }

        report.deleted = deleted;
        report.failed = failed;
        if failed > 0 {
            self.output
                .warning(&format!("{} tags could not be deleted.", failed));
        }
        self.output.info("Done.");
    }
}

/// Run a purge every `interval` until the task is aborted
pub fn spawn_schedule(
    engine: Arc<PurgeEngine>,
    interval: Duration,
    options: PurgeOptions,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = engine.run(&options).await {
                engine
                    .output
                    .error(&format!("Scheduled purge aborted: {}", e));
            }
        }
    })
}
