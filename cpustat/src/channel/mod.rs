//! # Record Channels
//!
//! Consumer side of the bounded, lock-free transport that moves encoded
//! records from the producer to the poll loop.
//!
//! - [`KernelRingBuf`] - the eBPF `EVENTS` ring buffer, polled through tokio
//! - [`shared_ring`] - an in-process ring with the same reserve/commit
//!   protocol, fed by the procfs capture source
//!
//! Both implement [`RecordSource`], so the poll loop does not care which
//! side of the kernel boundary the producer lives on.

pub mod kernel;
pub mod shared_ring;

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::ChannelError;

pub use kernel::KernelRingBuf;
pub use shared_ring::{channel, Consumer, Producer, Reservation};

/// Byte capacity of the kernel ring buffer (and default for [`shared_ring`])
pub const RING_BYTE_SIZE: usize = 256 * 1024;

/// A drainable source of committed records
pub trait RecordSource {
    /// Wait up to `timeout` for committed records, then hand every available
    /// one to `on_record` in commit order.
    ///
    /// Returns the number of records delivered; `Ok(0)` means the timeout
    /// elapsed with nothing to deliver.
    ///
    /// # Errors
    /// - [`ChannelError::Interrupted`] if `stop` fires during the wait, or has
    ///   fired by the time the source finds nothing left to deliver
    /// - [`ChannelError::Closed`] if the producer side has been torn down
    /// - [`ChannelError::Poll`] if the wait mechanism itself fails
    fn drain<F>(
        &mut self,
        timeout: Duration,
        stop: &CancellationToken,
        on_record: F,
    ) -> impl Future<Output = Result<usize, ChannelError>>
    where
        F: FnMut(&[u8]);
}
