//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Where records come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// fexit probe on kcpustat_cpu_fetch (requires root and kernel BTF)
    Kernel,
    /// Sample /proc/stat in userspace, ticks scaled to nanoseconds
    Procfs,
}

#[derive(Parser, Debug)]
#[command(
    name = "cpustat",
    version,
    about = "BPF based CPU statistics tracer",
    long_about = "BPF based CPU statistics tracer.\n\n\
                  Traces the per-CPU time accounting behind /proc/stat.",
    after_help = "\
EXAMPLES:
    sudo cpustat                             Trace every kcpustat_cpu_fetch() call
    sudo cpustat -d 500                      At most one record per CPU every 500ms
    cpustat --source procfs --interval 250   Sample /proc/stat without eBPF"
)]
pub struct Args {
    /// Verbose debug output
    #[arg(short, long)]
    pub verbose: bool,

    /// Minimum duration (ms) between two reported records of the same CPU
    #[arg(
        short,
        long,
        value_name = "DURATION-MS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub duration: Option<u64>,

    /// Record source (counters are nanoseconds for both; procfs has tick granularity)
    #[arg(long, value_enum, default_value_t = SourceKind::Kernel)]
    pub source: SourceKind,

    /// Sampling interval (ms) for the procfs source
    #[arg(
        long,
        value_name = "MS",
        default_value = "1000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval: u64,

    /// Path to the compiled eBPF object
    #[arg(long, value_name = "PATH")]
    pub bpf_path: Option<PathBuf>,
}
