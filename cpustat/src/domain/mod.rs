//! Domain model for cpustat
//!
//! Structured error types shared across the capture, channel and poll loop
//! modules.

pub mod errors;

pub use errors::{ChannelError, PollError, SetupError};
