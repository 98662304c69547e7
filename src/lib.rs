//! Registry UI Library
//!
//! This file serves as the library root for the registry-ui crate,
//! organizing and exposing the modules behind the dashboard backend:
//! the registry protocol client, the catalog refresh jobs and the tag
//! retention engine.

pub mod catalog;
pub mod cli;
pub mod common;
pub mod config;
pub mod digest;
pub mod error;
pub mod logging;
pub mod purge;
pub mod registry;

pub use common::RegistryApi;
pub use config::AppConfig;
pub use error::{RegistryError, Result};
pub use logging::Logger;
pub use registry::{RegistryClient, RegistryClientBuilder, Repository};
