//! Consumer for the eBPF `EVENTS` ring buffer
//!
//! The map fd becomes readable when the probe commits a record, so waiting
//! is an `AsyncFd` readiness future bounded by the drain deadline.

use aya::maps::{MapData, RingBuf};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::RecordSource;
use crate::domain::ChannelError;

/// The kernel ring buffer, registered with the tokio reactor
pub struct KernelRingBuf {
    fd: AsyncFd<RingBuf<MapData>>,
}

impl KernelRingBuf {
    /// Register `ring_buf` for readiness polling
    ///
    /// # Errors
    /// Returns [`ChannelError::Poll`] if the fd cannot be added to the reactor
    pub fn new(ring_buf: RingBuf<MapData>) -> Result<Self, ChannelError> {
        Ok(Self { fd: AsyncFd::new(ring_buf)? })
    }
}

/// Hand every record currently visible in the ring to `on_record`
fn drain_visible<F: FnMut(&[u8])>(ring_buf: &mut RingBuf<MapData>, on_record: &mut F) -> usize {
    let mut delivered = 0;
    while let Some(item) = ring_buf.next() {
        on_record(&item);
        delivered += 1;
    }
    delivered
}

impl RecordSource for KernelRingBuf {
    async fn drain<F>(
        &mut self,
        timeout: Duration,
        stop: &CancellationToken,
        mut on_record: F,
    ) -> Result<usize, ChannelError>
    where
        F: FnMut(&[u8]),
    {
        let deadline = Instant::now() + timeout;
        loop {
            let delivered = drain_visible(self.fd.get_mut(), &mut on_record);
            if delivered > 0 {
                return Ok(delivered);
            }

            let mut guard = tokio::select! {
                biased;
                () = stop.cancelled() => return Err(ChannelError::Interrupted),
                ready = tokio::time::timeout_at(deadline, self.fd.readable_mut()) => match ready {
                    Err(_elapsed) => return Ok(0),
                    Ok(Err(e)) => return Err(ChannelError::Poll(e)),
                    Ok(Ok(guard)) => guard,
                },
            };
            // Cleared before draining so a commit racing the drain raises a fresh edge
            guard.clear_ready();
        }
    }
}
