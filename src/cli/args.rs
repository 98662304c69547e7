//! Command-line argument parsing

use crate::common::ValidationUtils;
use crate::error::Result;
use crate::purge::PurgeOptions;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "registry-ui")]
#[command(about = "Container registry dashboard backend with scheduled tag retention")]
#[command(version)]
pub struct Args {
    /// Configuration file path
    #[arg(
        long = "config-file",
        short = 'c',
        default_value = "config.yml",
        help = "Path to the YAML configuration file"
    )]
    pub config_file: String,

    /// Purge old tags once and exit
    #[arg(
        long = "purge-tags",
        help = "Purge old tags according to the purge_tags config section, then exit"
    )]
    pub purge_tags: bool,

    /// Report the purge plan without deleting
    #[arg(
        long = "dry-run",
        short = 'n',
        help = "Dry-run for purging: log what would be deleted"
    )]
    pub dry_run: bool,

    /// Limit purging to these repositories
    #[arg(
        long = "purge-from-repos",
        default_value = "",
        help = "Comma-separated list of repositories to purge tags from (default: all)"
    )]
    pub purge_from_repos: String,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', help = "Enable debug logging")]
    pub verbose: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<()> {
        for repository in &self.purge_options().repositories {
            ValidationUtils::validate_repository(repository)?;
        }
        Ok(())
    }

    /// Options for purge runs started from this invocation
    pub fn purge_options(&self) -> PurgeOptions {
        PurgeOptions::default()
            .dry_run(self.dry_run)
            .from_repos(&self.purge_from_repos)
    }
}
