//! Tag retention: keep policy, keep-list file and the purge engine

pub mod engine;
pub mod keep_list;
pub mod policy;

pub use engine::{PurgeEngine, PurgeOptions, PurgePlan, PurgeReport, spawn_schedule};
pub use keep_list::KeepList;
pub use policy::{KeepPolicy, KeepReason, RepositoryPlan, RetentionDecision, TagData};
