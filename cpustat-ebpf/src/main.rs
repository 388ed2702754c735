//! # eBPF Kernel-Side Capture Probe
//!
//! Snapshots per-CPU time accounting each time the kernel finishes
//! `kcpustat_cpu_fetch()` (the routine behind `/proc/stat`) and streams the
//! snapshot to userspace.
//!
//! ## Programs
//!
//! - **fexit**: `kcpustat_cpu_fetch_exit` - runs on return of `kcpustat_cpu_fetch(dst, cpu)`
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer (256KB) carrying encoded `CpuStat` records
//! - `LAST_EMIT` - Per-CPU timestamp of the last emitted record (duration gate only)
//!
//! ## Build
//!
//! ```bash
//! cargo xtask build-ebpf
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    helpers::{bpf_ktime_get_ns, bpf_probe_read_kernel},
    macros::{fexit, map},
    maps::{ring_buf::RingBufEntry, HashMap, RingBuf},
    programs::FExitContext,
};
use cpustat_common::{
    capture, interval_elapsed, KernelCpustat, RecordChannel, RecordSlot, RECORD_SIZE,
};

// ============================================================================
// Configuration
// ============================================================================

/// Minimum nanoseconds between two records of the same CPU (0 = every call)
///
/// Read-only data, patched by the loader before the program is verified.
#[no_mangle]
static MIN_DURATION_NS: u64 = 0;

// ============================================================================
// eBPF Maps
// ============================================================================

/// Ring buffer for sending records to userspace
///
/// Reservation fails when the buffer is full; unread records are never
/// overwritten, the new event is dropped instead.
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(256 * 1024, 0);

/// Map: CPU index → `bpf_ktime_get_ns()` of its last emitted record
#[map]
static LAST_EMIT: HashMap<u32, u64> = HashMap::with_max_entries(4096, 0);

// ============================================================================
// Ring Buffer Adapter
// ============================================================================

struct Events;

struct EventSlot(RingBufEntry<[u8; RECORD_SIZE]>);

impl RecordSlot for EventSlot {
    #[inline(always)]
    fn write(&mut self, record: &[u8; RECORD_SIZE]) {
        self.0.write(*record);
    }

    #[inline(always)]
    fn commit(self) {
        self.0.submit(0);
    }
}

impl RecordChannel for Events {
    type Slot<'a> = EventSlot;

    #[inline(always)]
    fn reserve_record(&mut self) -> Option<EventSlot> {
        EVENTS.reserve::<[u8; RECORD_SIZE]>(0).map(EventSlot)
    }
}

// ============================================================================
// eBPF Program Hooks
// ============================================================================

/// Hook: return of `void kcpustat_cpu_fetch(struct kernel_cpustat *dst, int cpu)`
#[fexit(function = "kcpustat_cpu_fetch")]
pub fn kcpustat_cpu_fetch_exit(ctx: FExitContext) -> i32 {
    match try_kcpustat_cpu_fetch_exit(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_kcpustat_cpu_fetch_exit(ctx: &FExitContext) -> Result<(), i64> {
    let dst: *const KernelCpustat = unsafe { ctx.arg(0) };
    let cpu: i32 = unsafe { ctx.arg(1) };
    let cpu = cpu as u32;

    let min_ns = unsafe { core::ptr::read_volatile(&MIN_DURATION_NS) };
    let now = if min_ns == 0 {
        0
    } else {
        let now = unsafe { bpf_ktime_get_ns() };
        let last = unsafe { LAST_EMIT.get(&cpu).copied() };
        if !interval_elapsed(last, now, min_ns) {
            return Ok(());
        }
        now
    };

    let stat: KernelCpustat = unsafe { bpf_probe_read_kernel(dst)? };

    if capture(&mut Events, cpu, &stat) && min_ns != 0 {
        unsafe {
            LAST_EMIT.insert(&cpu, &now, 0)?;
        }
    }

    Ok(())
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
