//! Command line interface module
//!
//! This module provides the entry point for parsing command-line arguments and running the service.
//! It includes argument parsing, validation, and the runner that wires the registry client,
//! background refresh jobs and purge triggers together.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::Runner;
