//! # Shared Data Structures (eBPF ↔ Userspace)
//!
//! Defines the record that crosses the kernel/userspace boundary and the
//! capture logic that produces it. Both the kernel-side probe and the
//! userspace consumer link this crate, so they agree on the wire shape by
//! construction.
//!
//! ## Key Types
//!
//! - [`CpuStat`] - One CPU's time-accounting snapshot (the wire record)
//! - [`KernelCpustat`] - Prefix of the kernel's `struct kernel_cpustat`
//! - [`RecordChannel`] / [`RecordSlot`] - Reserve/commit seam used by [`capture`]
//!
//! ## Wire Format
//!
//! Eleven consecutive native-endian `u64` values, in field order, with no
//! header, length prefix or checksum. Encoding and decoding are explicit
//! ([`CpuStat::to_bytes`], [`CpuStat::from_bytes`]) so neither side relies
//! on the other's struct layout.

#![cfg_attr(not(test), no_std)]

use core::fmt;

// ============================================================================
// Constants
// ============================================================================

/// Number of `u64` fields in a [`CpuStat`] record.
pub const RECORD_FIELDS: usize = 11;

/// Size of one encoded [`CpuStat`] record in bytes.
pub const RECORD_SIZE: usize = RECORD_FIELDS * 8;

/// Number of time buckets read from `struct kernel_cpustat`.
pub const CPUTIME_BUCKETS: usize = 10;

/// Indices into `kernel_cpustat.cpustat[]` (kernel `enum cpu_usage_stat`).
///
/// The kernel order differs from the record order: SOFTIRQ and IRQ come
/// before IDLE.
pub mod cputime {
    pub const USER: usize = 0;
    pub const NICE: usize = 1;
    pub const SYSTEM: usize = 2;
    pub const SOFTIRQ: usize = 3;
    pub const IRQ: usize = 4;
    pub const IDLE: usize = 5;
    pub const IOWAIT: usize = 6;
    pub const STEAL: usize = 7;
    pub const GUEST: usize = 8;
    pub const GUEST_NICE: usize = 9;
}

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Per-CPU time-accounting snapshot sent from eBPF to userspace
///
/// Values are passed through exactly as the kernel accounts them (its
/// internal time unit), without conversion.
///
/// **Memory Layout**: `#[repr(C)]`, eleven `u64` fields, no padding.
/// The layout is informational only: the wire format is produced by
/// [`CpuStat::to_bytes`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuStat {
    /// CPU index the counters belong to
    pub cpu_id: u64,
    pub user: u64,
    pub nice: u64,
    pub sys: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

const _: () = assert!(core::mem::size_of::<CpuStat>() == RECORD_SIZE);

/// Prefix of the kernel's `struct kernel_cpustat`
///
/// The kernel declares `u64 cpustat[NR_STATS]`, where `NR_STATS` is 10 or
/// 11 depending on `CONFIG_SCHED_CORE`. Only the first ten buckets are
/// read, which is valid for both.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KernelCpustat {
    pub cpustat: [u64; CPUTIME_BUCKETS],
}

/// Error decoding a record delivered by the channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer than [`RECORD_SIZE`] bytes were delivered
    Truncated { len: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => {
                write!(f, "truncated record: {len} bytes, expected {RECORD_SIZE}")
            }
        }
    }
}

impl CpuStat {
    /// Build a record from the kernel accounting state of `cpu`
    #[inline(always)]
    #[must_use]
    pub fn from_kernel(cpu: u32, stat: &KernelCpustat) -> Self {
        let c = &stat.cpustat;
        Self {
            cpu_id: u64::from(cpu),
            user: c[cputime::USER],
            nice: c[cputime::NICE],
            sys: c[cputime::SYSTEM],
            idle: c[cputime::IDLE],
            iowait: c[cputime::IOWAIT],
            irq: c[cputime::IRQ],
            softirq: c[cputime::SOFTIRQ],
            steal: c[cputime::STEAL],
            guest: c[cputime::GUEST],
            guest_nice: c[cputime::GUEST_NICE],
        }
    }

    /// Fields in wire order
    #[inline(always)]
    #[must_use]
    pub fn fields(&self) -> [u64; RECORD_FIELDS] {
        [
            self.cpu_id,
            self.user,
            self.nice,
            self.sys,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
            self.guest,
            self.guest_nice,
        ]
    }

    /// The ten time buckets in record order (everything but `cpu_id`)
    #[must_use]
    pub fn counters(&self) -> [u64; CPUTIME_BUCKETS] {
        let f = self.fields();
        let mut out = [0u64; CPUTIME_BUCKETS];
        out.copy_from_slice(&f[1..]);
        out
    }

    /// Encode into the wire format
    #[inline(always)]
    #[must_use]
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        let fields = self.fields();
        let mut i = 0;
        while i < RECORD_FIELDS {
            let b = fields[i].to_ne_bytes();
            let mut j = 0;
            while j < 8 {
                out[i * 8 + j] = b[j];
                j += 1;
            }
            i += 1;
        }
        out
    }

    /// Decode from the wire format
    ///
    /// Bytes past [`RECORD_SIZE`] are ignored; the kernel ring buffer may
    /// round a record up to an 8-byte boundary.
    ///
    /// # Errors
    /// Returns [`DecodeError::Truncated`] if `bytes` is shorter than one record
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < RECORD_SIZE {
            return Err(DecodeError::Truncated { len: bytes.len() });
        }
        let mut f = [0u64; RECORD_FIELDS];
        for (field, chunk) in f.iter_mut().zip(bytes[..RECORD_SIZE].chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *field = u64::from_ne_bytes(word);
        }
        Ok(Self {
            cpu_id: f[0],
            user: f[1],
            nice: f[2],
            sys: f[3],
            idle: f[4],
            iowait: f[5],
            irq: f[6],
            softirq: f[7],
            steal: f[8],
            guest: f[9],
            guest_nice: f[10],
        })
    }
}

// ============================================================================
// Capture Logic
// ============================================================================

/// A channel slot reserved for exactly one record
pub trait RecordSlot {
    /// Populate the slot with an encoded record
    fn write(&mut self, record: &[u8; RECORD_SIZE]);

    /// Publish the slot to the consumer; the slot must not be touched afterwards
    fn commit(self);
}

/// Producer side of a bounded record channel
pub trait RecordChannel {
    type Slot<'a>: RecordSlot
    where
        Self: 'a;

    /// Reserve room for one record, failing immediately if the channel is full
    fn reserve_record(&mut self) -> Option<Self::Slot<'_>>;
}

/// Publish one snapshot of `cpu` into `channel`
///
/// Reserve, populate, commit. A failed reservation drops the event and
/// returns `false`; there is no retry.
#[inline(always)]
pub fn capture<C: RecordChannel>(channel: &mut C, cpu: u32, stat: &KernelCpustat) -> bool {
    let Some(mut slot) = channel.reserve_record() else {
        return false;
    };
    slot.write(&CpuStat::from_kernel(cpu, stat).to_bytes());
    slot.commit();
    true
}

/// Minimum-duration gate between two records of the same CPU
///
/// `min_interval_ns == 0` disables the gate. A CPU with no previous
/// record always passes.
#[inline(always)]
#[must_use]
pub fn interval_elapsed(last_emit_ns: Option<u64>, now_ns: u64, min_interval_ns: u64) -> bool {
    if min_interval_ns == 0 {
        return true;
    }
    match last_emit_ns {
        Some(last) => now_ns.saturating_sub(last) >= min_interval_ns,
        None => true,
    }
}
