//! Userspace capture source backed by `/proc/stat`
//!
//! Used where the eBPF probe cannot be loaded (no root, no BTF). Every tick
//! reads `/proc/stat`, rebuilds a [`KernelCpustat`] per `cpuN` line and
//! publishes it through the same [`capture`] path the probe uses, into an
//! in-process ring.
//!
//! `/proc/stat` reports `USER_HZ` clock ticks while the kernel accounts in
//! nanoseconds. Columns are scaled back to nanoseconds on parse so both
//! sources produce records in the same unit, at tick granularity.

#![allow(unsafe_code)] // sysconf() requires unsafe

use cpustat_common::{capture, cputime, interval_elapsed, KernelCpustat, RecordChannel};
use log::{debug, trace};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::channel::Producer;
use crate::config::ProbeConfig;

pub const PROC_STAT: &str = "/proc/stat";

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// `USER_HZ` on every mainstream architecture, used if `sysconf` fails
const FALLBACK_CLOCK_TICKS: u64 = 100;

/// Kernel bucket for each column of a `cpuN` line, in file order
const COLUMN_BUCKETS: [usize; 10] = [
    cputime::USER,
    cputime::NICE,
    cputime::SYSTEM,
    cputime::IDLE,
    cputime::IOWAIT,
    cputime::IRQ,
    cputime::SOFTIRQ,
    cputime::STEAL,
    cputime::GUEST,
    cputime::GUEST_NICE,
];

/// Nanoseconds per `USER_HZ` tick, from `sysconf(_SC_CLK_TCK)`
#[must_use]
pub fn nanos_per_tick() -> u64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    let ticks = u64::try_from(ticks).ok().filter(|&t| t > 0).unwrap_or(FALLBACK_CLOCK_TICKS);
    NANOS_PER_SEC / ticks
}

/// Parse the per-CPU lines of `/proc/stat`, converting ticks to nanoseconds
///
/// The aggregate `cpu` line and non-CPU lines are skipped. Columns missing
/// on older kernels read as zero; unparsable lines are ignored.
#[must_use]
pub fn parse_proc_stat(content: &str, nanos_per_tick: u64) -> Vec<(u32, KernelCpustat)> {
    let mut cpus = Vec::new();

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let Some(label) = parts.next() else { continue };
        let Some(cpu) = label.strip_prefix("cpu").and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };

        let mut stat = KernelCpustat::default();
        let mut valid = true;
        for (bucket, column) in COLUMN_BUCKETS.iter().zip(parts) {
            match column.parse::<u64>() {
                Ok(ticks) => stat.cpustat[*bucket] = ticks.saturating_mul(nanos_per_tick),
                Err(_) => {
                    valid = false;
                    break;
                }
            }
        }
        if valid {
            cpus.push((cpu, stat));
        }
    }

    cpus
}

/// Outcome of one sampling pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SampleStats {
    pub published: usize,
    /// Channel full
    pub dropped: usize,
    /// Held back by the minimum-duration gate
    pub gated: usize,
}

/// Periodic `/proc/stat` reader acting as the record producer
pub struct ProcStatSampler {
    path: PathBuf,
    interval: Duration,
    min_duration_ns: u64,
    nanos_per_tick: u64,
    started: Instant,
    last_emit: HashMap<u32, u64>,
}

impl ProcStatSampler {
    #[must_use]
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            path: PathBuf::from(PROC_STAT),
            interval: config.interval,
            min_duration_ns: config.min_duration_ns,
            nanos_per_tick: nanos_per_tick(),
            started: Instant::now(),
            last_emit: HashMap::new(),
        }
    }

    /// Read from `path` instead of `/proc/stat`
    #[must_use]
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    fn now_ns(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Read the stat file once and publish one record per CPU
    ///
    /// # Errors
    /// Returns an error if the stat file cannot be read
    pub fn sample_once<C: RecordChannel>(&mut self, channel: &mut C) -> io::Result<SampleStats> {
        let content = std::fs::read_to_string(&self.path)?;
        let now = self.now_ns();
        let mut stats = SampleStats::default();

        for (cpu, stat) in parse_proc_stat(&content, self.nanos_per_tick) {
            if !interval_elapsed(self.last_emit.get(&cpu).copied(), now, self.min_duration_ns) {
                stats.gated += 1;
                continue;
            }
            if capture(channel, cpu, &stat) {
                stats.published += 1;
                if self.min_duration_ns > 0 {
                    self.last_emit.insert(cpu, now);
                }
            } else {
                stats.dropped += 1;
            }
        }

        trace!(
            "procfs sample: published={} dropped={} gated={}",
            stats.published,
            stats.dropped,
            stats.gated
        );
        Ok(stats)
    }

    /// Sample every interval until `stop` fires
    ///
    /// The producer is dropped on return, which closes the channel.
    ///
    /// # Errors
    /// Returns an error if the stat file becomes unreadable
    pub async fn run(mut self, mut producer: Producer, stop: CancellationToken) -> io::Result<()> {
        debug!("Sampling {} every {:?}", self.path.display(), self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                _ = ticker.tick() => {
                    self.sample_once(&mut producer)?;
                }
            }
        }
        Ok(())
    }
}
