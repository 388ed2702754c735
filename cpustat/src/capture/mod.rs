//! Capture sources and their lifecycle
//!
//! - `ebpf_setup`: load and attach the fexit probe, own its ring buffer
//! - `procfs`: sample `/proc/stat` through the same capture path, in userspace

pub mod ebpf_setup;
pub mod procfs;

pub use ebpf_setup::{ProbeSession, HOOK_FUNCTION};
pub use procfs::{nanos_per_tick, parse_proc_stat, ProcStatSampler, SampleStats};
