//! Structured error types for cpustat
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while bringing the capture probe up. Always fatal.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Failed to read eBPF object {path}: {source}")]
    ObjectUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load eBPF program: {0}")]
    EbpfLoadFailed(#[from] aya::EbpfError),

    #[error("Program {0} not found in eBPF object")]
    ProgramNotFound(&'static str),

    #[error("Map {0} not found in eBPF object")]
    MapNotFound(&'static str),

    #[error("Kernel BTF unavailable: {0}")]
    BtfUnavailable(#[from] aya::BtfError),

    #[error("Failed to attach {probe} to {function}: {source}")]
    ProbeAttachFailed {
        probe: &'static str,
        function: &'static str,
        #[source]
        source: aya::programs::ProgramError,
    },

    #[error("Failed to create ring buffer: {0}")]
    ChannelCreateFailed(#[from] aya::maps::MapError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Failure reported by a channel operation
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The stop token fired while waiting for records
    #[error("wait interrupted by stop signal")]
    Interrupted,

    /// The producer side is gone and every committed record was drained
    #[error("channel closed")]
    Closed,

    #[error("invalid channel capacity {0}: must be a power of two of at least 16 bytes")]
    InvalidCapacity(usize),

    #[error("polling ring buffer failed: {0}")]
    Poll(#[from] std::io::Error),
}

/// Fatal failure of the poll loop
#[derive(Error, Debug)]
pub enum PollError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("rendering record failed: {0}")]
    Render(#[source] std::io::Error),
}
