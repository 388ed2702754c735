//! # eBPF Program Loading and Attachment
//!
//! Loads the compiled probe, patches its configuration, attaches it to the
//! return of `kcpustat_cpu_fetch()` and hands back the ring buffer.
//!
//! ## Attachment Points
//!
//! - **fexit**: `kcpustat_cpu_fetch(struct kernel_cpustat *dst, int cpu)`
//!
//! ## Teardown
//!
//! Programs are detached when the owning [`Ebpf`] is dropped. Every early
//! return in [`ProbeSession::attach`] drops it, so a failed setup never
//! leaves the probe attached.

use aya::{
    maps::RingBuf,
    programs::{FExit, ProgramError},
    Btf, Ebpf, EbpfLoader, VerifierLogLevel,
};
use log::{debug, info};

use crate::channel::KernelRingBuf;
use crate::config::ProbeConfig;
use crate::domain::SetupError;

/// Kernel function whose return is traced
pub const HOOK_FUNCTION: &str = "kcpustat_cpu_fetch";

/// Program name in the eBPF object
pub const PROGRAM_NAME: &str = "kcpustat_cpu_fetch_exit";

/// Ring buffer map name in the eBPF object
pub const EVENTS_MAP: &str = "EVENTS";

/// Read-only global patched before load
pub const MIN_DURATION_GLOBAL: &str = "MIN_DURATION_NS";

fn attach_failed(source: ProgramError) -> SetupError {
    SetupError::ProbeAttachFailed { probe: PROGRAM_NAME, function: HOOK_FUNCTION, source }
}

/// An attached probe and the ring buffer it feeds
///
/// Field order is drop order: the probe goes before the ring buffer.
pub struct ProbeSession {
    bpf: Ebpf,
    ring: KernelRingBuf,
}

impl ProbeSession {
    /// Load, configure and attach the probe
    ///
    /// Must be called from within a tokio runtime (the ring buffer is
    /// registered with the reactor).
    ///
    /// # Errors
    /// Returns a [`SetupError`] for any load, verify, attach or ring buffer failure
    pub fn attach(config: &ProbeConfig) -> Result<Self, SetupError> {
        let data = std::fs::read(&config.bpf_path).map_err(|source| {
            SetupError::ObjectUnreadable { path: config.bpf_path.clone(), source }
        })?;
        debug!("Read eBPF object {} ({} bytes)", config.bpf_path.display(), data.len());

        let mut loader = EbpfLoader::new();
        loader.set_global(MIN_DURATION_GLOBAL, &config.min_duration_ns, true);
        if config.verbose {
            loader.verifier_log_level(VerifierLogLevel::VERBOSE | VerifierLogLevel::STATS);
        }
        let mut bpf = loader.load(&data)?;
        if config.min_duration_ns > 0 {
            info!("✓ Set minimum duration: {}ns", config.min_duration_ns);
        }

        let btf = Btf::from_sys_fs()?;
        let program: &mut FExit = bpf
            .program_mut(PROGRAM_NAME)
            .ok_or(SetupError::ProgramNotFound(PROGRAM_NAME))?
            .try_into()
            .map_err(attach_failed)?;
        program.load(HOOK_FUNCTION, &btf).map_err(attach_failed)?;
        program.attach().map_err(attach_failed)?;
        info!("✓ Attached fexit: {HOOK_FUNCTION}");

        let events = bpf.take_map(EVENTS_MAP).ok_or(SetupError::MapNotFound(EVENTS_MAP))?;
        let ring_buf = RingBuf::try_from(events)?;
        let ring = KernelRingBuf::new(ring_buf)?;
        debug!("Ring buffer {EVENTS_MAP} registered for polling");

        Ok(Self { bpf, ring })
    }

    /// The consumer end of the probe's ring buffer
    pub fn ring_mut(&mut self) -> &mut KernelRingBuf {
        &mut self.ring
    }

    /// Detach the probe, then release the ring buffer
    pub fn detach(self) {
        let Self { bpf, ring } = self;
        drop(bpf);
        info!("✓ Detached fexit: {HOOK_FUNCTION}");
        drop(ring);
        debug!("Ring buffer {EVENTS_MAP} released");
    }
}
