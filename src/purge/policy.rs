//! Retention policy and per-repository classification
//!
//! Classification is pure: given the tags of one repository with their creation
//! times, the policy and the current time, it produces the keep and purge lists.

use crate::config::PurgeTagsConfig;
use crate::error::Result;
use crate::purge::keep_list::KeepList;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

/// A tag whose creation time is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagData {
    pub name: String,
    pub created: DateTime<Utc>,
}

impl TagData {
    pub fn new(name: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            created,
        }
    }
}

impl fmt::Display for TagData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{} <{}>\"",
            self.name,
            self.created.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Newest first; equal times fall back to the name, descending
pub fn newest_first(a: &TagData, b: &TagData) -> Ordering {
    b.created
        .cmp(&a.created)
        .then_with(|| b.name.cmp(&a.name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    /// Younger than or exactly `keep_days`
    Age,
    Regexp,
    KeepList,
    /// Promoted from the purge list to reach `keep_count`
    MinCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDecision {
    Keep(KeepReason),
    Purge,
}

/// Outcome for one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPlan {
    pub repository: String,
    /// Every evaluated tag, newest first
    pub tags: Vec<TagData>,
    pub keep: Vec<(String, KeepReason)>,
    /// Tags to delete, newest first
    pub purge: Vec<String>,
}

impl RepositoryPlan {
    pub fn kept_names(&self) -> Vec<&str> {
        self.keep.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn decision(&self, tag: &str) -> Option<RetentionDecision> {
        if let Some((_, reason)) = self.keep.iter().find(|(name, _)| name == tag) {
            return Some(RetentionDecision::Keep(*reason));
        }
        self.purge
            .iter()
            .any(|name| name == tag)
            .then_some(RetentionDecision::Purge)
    }
}

#[derive(Debug, Clone)]
pub struct KeepPolicy {
    pub keep_days: i64,
    pub keep_count: usize,
    pub keep_regexp: Option<Regex>,
    pub keep_list: KeepList,
}

impl KeepPolicy {
    pub fn new(keep_days: i64, keep_count: usize) -> Self {
        Self {
            keep_days,
            keep_count,
            keep_regexp: None,
            keep_list: KeepList::empty(),
        }
    }

    pub fn with_regexp(mut self, pattern: &str) -> Result<Self> {
        self.keep_regexp = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern)?)
        };
        Ok(self)
    }

    pub fn with_keep_list(mut self, keep_list: KeepList) -> Self {
        self.keep_list = keep_list;
        self
    }

    /// Compile the regexp and load the keep-list file named in the config
    pub fn from_config(config: &PurgeTagsConfig) -> Result<Self> {
        let keep_list = if config.keep_from_file.is_empty() {
            KeepList::empty()
        } else {
            KeepList::load(Path::new(&config.keep_from_file))?
        };
        Ok(Self::new(config.keep_days, config.keep_count)
            .with_regexp(&config.keep_regexp)?
            .with_keep_list(keep_list))
    }

    fn keep_reason(&self, repository: &str, tag: &TagData, now: DateTime<Utc>) -> Option<KeepReason> {
        let days_old = (now - tag.created).num_days();
        if days_old <= self.keep_days {
            Some(KeepReason::Age)
        } else if self
            .keep_regexp
            .as_ref()
            .is_some_and(|re| re.is_match(&tag.name))
        {
            Some(KeepReason::Regexp)
        } else if self.keep_list.contains(repository, &tag.name) {
            Some(KeepReason::KeepList)
        } else {
            None
        }
    }

    /// Sort and classify the tags of one repository, then apply the keep floor
    pub fn classify(
        &self,
        repository: &str,
        mut tags: Vec<TagData>,
        now: DateTime<Utc>,
    ) -> RepositoryPlan {
        tags.sort_by(newest_first);

        let mut keep = Vec::new();
        let mut purge = Vec::new();
        for tag in &tags {
            match self.keep_reason(repository, tag, now) {
                Some(reason) => keep.push((tag.name.clone(), reason)),
                None => purge.push(tag.name.clone()),
            }
        }

        if keep.len() < self.keep_count {
            let take = (self.keep_count - keep.len()).min(purge.len());
            keep.extend(
                purge
                    .drain(..take)
                    .map(|name| (name, KeepReason::MinCount)),
            );
        }

        RepositoryPlan {
            repository: repository.to_string(),
            tags,
            keep,
            purge,
        }
    }
}
