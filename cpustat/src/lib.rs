//! # cpustat - eBPF-based per-CPU Time Accounting Tracer
//!
//! cpustat snapshots the per-CPU time buckets (user, nice, system, idle,
//! iowait, irq, softirq, steal, guest, guest-nice) every time the kernel
//! finishes `kcpustat_cpu_fetch()`, and streams the snapshots to userspace.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     eBPF Program (Kernel)                       │
//! │  • fexit: kcpustat_cpu_fetch → reserve / fill / commit          │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ EVENTS ring buffer (256KB, drop newest)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      cpustat (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Channel    │──▶│  Poll Loop   │──▶│    Render    │         │
//! │  │ (drain+wait) │   │   (decode)   │   │   (table)    │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`capture`]: probe lifecycle (`ebpf_setup`) and the `/proc/stat` source
//! - [`channel`]: the [`channel::RecordSource`] trait, the kernel ring buffer
//!   consumer and the in-process ring
//! - [`poll_loop`]: drain → decode → render until the stop token fires
//! - [`render`]: table output
//! - [`cli`], [`config`]: command line and immutable runtime configuration
//! - [`preflight`]: privilege, kernel and BTF checks
//! - [`domain`]: error types
//!
//! ## Typical Usage
//!
//! ```bash
//! cargo xtask build-ebpf
//! sudo ./target/release/cpustat
//! # In another shell, anything that reads /proc/stat fires the probe
//! cat /proc/stat
//! ```

pub mod capture;
pub mod channel;
pub mod cli;
pub mod config;
pub mod domain;
pub mod poll_loop;
pub mod preflight;
pub mod render;
