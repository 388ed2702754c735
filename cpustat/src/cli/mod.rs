//! Command-line interface for cpustat
//!
//! This module contains CLI argument parsing

pub mod args;

pub use args::{Args, SourceKind};
