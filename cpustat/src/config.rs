//! Runtime configuration, fixed before the probe is attached

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::{Args, SourceKind};

/// Object produced by `cargo xtask build-ebpf`
pub const DEFAULT_BPF_PATH: &str = "target/bpfel-unknown-none/release/cpustat";

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Immutable configuration consumed by the capture side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Minimum nanoseconds between two records of the same CPU (0 = off)
    pub min_duration_ns: u64,
    pub verbose: bool,
    pub source: SourceKind,
    /// Sampling period of the procfs source
    pub interval: Duration,
    pub bpf_path: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            min_duration_ns: 0,
            verbose: false,
            source: SourceKind::Kernel,
            interval: Duration::from_secs(1),
            bpf_path: default_bpf_path(),
        }
    }
}

impl From<&Args> for ProbeConfig {
    fn from(args: &Args) -> Self {
        Self {
            min_duration_ns: args.duration.map_or(0, |ms| ms.saturating_mul(NANOS_PER_MILLI)),
            verbose: args.verbose,
            source: args.source,
            interval: Duration::from_millis(args.interval),
            bpf_path: args.bpf_path.clone().unwrap_or_else(default_bpf_path),
        }
    }
}

/// `CPUSTAT_EBPF_PATH` at build time, else the xtask output path
fn default_bpf_path() -> PathBuf {
    PathBuf::from(option_env!("CPUSTAT_EBPF_PATH").unwrap_or(DEFAULT_BPF_PATH))
}
