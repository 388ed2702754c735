//! # In-Process Record Ring
//!
//! A bounded, lock-free byte ring following the same protocol as the eBPF
//! ring buffer: the producer reserves space with a bump pointer, fills it,
//! then commits; the consumer drains committed records in reservation order.
//!
//! ## Layout
//!
//! The buffer is an array of `AtomicU64` words. Every record occupies one
//! header word followed by its payload rounded up to whole words:
//!
//! ```text
//! ┌────────────────────────┬──────────────────────────────┐
//! │ header: flags | len    │ payload (len bytes, padded)  │
//! └────────────────────────┴──────────────────────────────┘
//! ```
//!
//! A header of zero means "reserved but not yet committed" (or free). The
//! consumer stops at such a header, so a committed record never overtakes
//! an older uncommitted one. Consumed words are zeroed before the consumer
//! position advances, which is what makes a zero header meaningful on the
//! next lap.
//!
//! ## Overflow
//!
//! Drop newest: a reservation that does not fit fails immediately and
//! committed, unread records are never overwritten.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use cpustat_common::{RecordChannel, RecordSlot, RECORD_SIZE};

use super::RecordSource;
use crate::domain::ChannelError;

const WORD: usize = 8;
const HEADER_WORDS: usize = 1;

const COMMITTED: u64 = 1 << 62;
const DISCARDED: u64 = 1 << 63;
const LEN_MASK: u64 = u32::MAX as u64;

struct Shared {
    words: Box<[AtomicU64]>,
    mask: usize,
    /// Next free word (monotonic, wraps via `mask`)
    producer_pos: AtomicUsize,
    /// Next word to consume (monotonic, wraps via `mask`)
    consumer_pos: AtomicUsize,
    closed: AtomicBool,
    notify: Notify,
}

impl Shared {
    fn word(&self, pos: usize) -> &AtomicU64 {
        &self.words[pos & self.mask]
    }
}

/// Words needed for a record of `len` bytes, including its header
fn record_words(len: usize) -> Option<usize> {
    if len == 0 || len as u64 > LEN_MASK {
        return None;
    }
    Some(HEADER_WORDS + len.div_ceil(WORD))
}

/// Create a ring of `byte_size` bytes
///
/// # Errors
/// Returns [`ChannelError::InvalidCapacity`] unless `byte_size` is a power
/// of two of at least 16 bytes
pub fn channel(byte_size: usize) -> Result<(Producer, Consumer), ChannelError> {
    if byte_size < 2 * WORD || !byte_size.is_power_of_two() {
        return Err(ChannelError::InvalidCapacity(byte_size));
    }
    let words: Box<[AtomicU64]> = (0..byte_size / WORD).map(|_| AtomicU64::new(0)).collect();
    let shared = Arc::new(Shared {
        mask: words.len() - 1,
        words,
        producer_pos: AtomicUsize::new(0),
        consumer_pos: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
        notify: Notify::new(),
    });
    Ok((
        Producer { shared: Arc::clone(&shared) },
        Consumer { shared, scratch: Vec::with_capacity(RECORD_SIZE) },
    ))
}

// ============================================================================
// Producer
// ============================================================================

/// Producer half; dropping it closes the channel
pub struct Producer {
    shared: Arc<Shared>,
}

impl Producer {
    /// Claim `len` bytes, or `None` if they do not fit right now
    ///
    /// Never blocks, never retries, never allocates.
    pub fn reserve(&mut self, len: usize) -> Option<Reservation<'_>> {
        let shared = &*self.shared;
        let total = record_words(len)?;
        let capacity = shared.words.len();
        let pos = shared.producer_pos.load(Ordering::Relaxed);
        let consumed = shared.consumer_pos.load(Ordering::Acquire);
        if pos.wrapping_sub(consumed) + total > capacity {
            return None;
        }
        shared.producer_pos.store(pos.wrapping_add(total), Ordering::Release);
        Some(Reservation { shared, pos, len, done: false })
    }

    /// Bytes currently available for reservation (headers included)
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        let pos = self.shared.producer_pos.load(Ordering::Relaxed);
        let consumed = self.shared.consumer_pos.load(Ordering::Acquire);
        (self.shared.words.len() - pos.wrapping_sub(consumed)) * WORD
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

impl RecordChannel for Producer {
    type Slot<'a> = Reservation<'a>;

    fn reserve_record(&mut self) -> Option<Reservation<'_>> {
        self.reserve(RECORD_SIZE)
    }
}

/// Space claimed by the producer but not yet visible to the consumer
///
/// Dropping a reservation without committing it discards it.
pub struct Reservation<'a> {
    shared: &'a Shared,
    pos: usize,
    len: usize,
    done: bool,
}

impl Reservation<'_> {
    /// Reserved payload length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `bytes` into the slot, truncated to the reserved length
    ///
    /// Returns the number of bytes written.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.len);
        for (i, chunk) in bytes[..n].chunks(WORD).enumerate() {
            let mut word = [0u8; WORD];
            word[..chunk.len()].copy_from_slice(chunk);
            self.shared
                .word(self.pos + HEADER_WORDS + i)
                .store(u64::from_ne_bytes(word), Ordering::Relaxed);
        }
        n
    }

    /// Make the record visible to the consumer
    pub fn commit(mut self) {
        self.publish(COMMITTED);
    }

    /// Release the space without delivering anything
    pub fn discard(mut self) {
        self.publish(DISCARDED);
    }

    fn publish(&mut self, flag: u64) {
        self.done = true;
        self.shared.word(self.pos).store(flag | self.len as u64, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.publish(DISCARDED);
        }
    }
}

impl RecordSlot for Reservation<'_> {
    fn write(&mut self, record: &[u8; RECORD_SIZE]) {
        Reservation::write(self, record);
    }

    fn commit(self) {
        Reservation::commit(self);
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Consumer half; the only reader of the ring
pub struct Consumer {
    shared: Arc<Shared>,
    scratch: Vec<u8>,
}

impl Consumer {
    /// Bytes reserved by the producer and not yet consumed
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        let pos = self.shared.producer_pos.load(Ordering::Acquire);
        let consumed = self.shared.consumer_pos.load(Ordering::Relaxed);
        pos.wrapping_sub(consumed) * WORD
    }

    /// Total ring size in bytes
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.words.len() * WORD
    }

    /// Deliver every committed record at the head of the ring
    fn consume<F: FnMut(&[u8])>(&mut self, on_record: &mut F) -> usize {
        let shared = &*self.shared;
        let mut pos = shared.consumer_pos.load(Ordering::Relaxed);
        let mut delivered = 0;

        loop {
            let header = shared.word(pos).load(Ordering::Acquire);
            if header & (COMMITTED | DISCARDED) == 0 {
                break;
            }
            let len = (header & LEN_MASK) as usize;
            let total = HEADER_WORDS + len.div_ceil(WORD);

            if header & COMMITTED != 0 {
                self.scratch.clear();
                for i in HEADER_WORDS..total {
                    let word = shared.word(pos + i).load(Ordering::Relaxed);
                    self.scratch.extend_from_slice(&word.to_ne_bytes());
                }
                self.scratch.truncate(len);
                on_record(&self.scratch);
                delivered += 1;
            }

            for i in 0..total {
                shared.word(pos + i).store(0, Ordering::Relaxed);
            }
            pos = pos.wrapping_add(total);
            shared.consumer_pos.store(pos, Ordering::Release);
        }

        delivered
    }
}

impl RecordSource for Consumer {
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
            let delivered = self.consume(&mut on_record);
            if delivered > 0 {
                return Ok(delivered);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                // Commits made right before the producer went away
                return match self.consume(&mut on_record) {
                    0 if stop.is_cancelled() => Err(ChannelError::Interrupted),
                    0 => Err(ChannelError::Closed),
                    n => Ok(n),
                };
            }

            tokio::select! {
                biased;
                () = stop.cancelled() => return Err(ChannelError::Interrupted),
                () = self.shared.notify.notified() => {}
                () = tokio::time::sleep_until(deadline) => return Ok(0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpustat_common::{capture, CpuStat, KernelCpustat};

    const SHORT: Duration = Duration::from_millis(20);

    fn stat(cpu: u32) -> KernelCpustat {
        let mut s = KernelCpustat::default();
        for (i, v) in s.cpustat.iter_mut().enumerate() {
            *v = u64::from(cpu) * 100 + i as u64;
        }
        s
    }

    async fn drain_all(consumer: &mut Consumer) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let stop = CancellationToken::new();
        consumer.drain(SHORT, &stop, |b| out.push(b.to_vec())).await.unwrap();
        out
    }

    #[test]
    fn test_invalid_capacity() {
        assert!(matches!(channel(0), Err(ChannelError::InvalidCapacity(0))));
        assert!(matches!(channel(8), Err(ChannelError::InvalidCapacity(8))));
        assert!(matches!(channel(100), Err(ChannelError::InvalidCapacity(100))));
        assert!(channel(16).is_ok());
    }

    #[test]
    fn test_reserve_rejects_empty_and_oversized() {
        let (mut producer, _consumer) = channel(64).unwrap();
        assert!(producer.reserve(0).is_none());
        // 64 bytes = 8 words; 57 bytes needs 1 + 8 words
        assert!(producer.reserve(57).is_none());
        assert!(producer.reserve(56).is_some());
    }

    #[tokio::test]
    async fn test_partial_write_is_zero_padded() {
        let (mut producer, mut consumer) = channel(64).unwrap();
        let mut slot = producer.reserve(12).unwrap();
        assert_eq!(slot.write(&[0xab; 20]), 12);
        slot.commit();

        let records = drain_all(&mut consumer).await;
        assert_eq!(records, vec![vec![0xab; 12]]);
    }

    #[tokio::test]
    async fn test_full_ring_drops_newest() {
        // 256 bytes = 32 words; one record = 1 + 11 words
        let (mut producer, mut consumer) = channel(256).unwrap();
        assert!(capture(&mut producer, 0, &stat(0)));
        assert!(capture(&mut producer, 1, &stat(1)));
        assert!(!capture(&mut producer, 2, &stat(2)));

        let records = drain_all(&mut consumer).await;
        let cpus: Vec<u64> =
            records.iter().map(|b| CpuStat::from_bytes(b).unwrap().cpu_id).collect();
        assert_eq!(cpus, vec![0, 1]);

        // Space is reclaimed once drained
        assert!(capture(&mut producer, 3, &stat(3)));
    }

    #[tokio::test]
    async fn test_wraparound_preserves_records() {
        let (mut producer, mut consumer) = channel(256).unwrap();
        for cpu in 0..50u32 {
            assert!(capture(&mut producer, cpu, &stat(cpu)), "cpu {cpu} dropped");
            let records = drain_all(&mut consumer).await;
            assert_eq!(records.len(), 1);
            assert_eq!(
                CpuStat::from_bytes(&records[0]).unwrap(),
                CpuStat::from_kernel(cpu, &stat(cpu))
            );
        }
        assert_eq!(consumer.pending_bytes(), 0);
    }

    #[tokio::test]
    async fn test_uncommitted_blocks_later_records() {
        let (mut producer, mut consumer) = channel(1024).unwrap();
        let shared = Arc::clone(&producer.shared);
        let first = producer.reserve(8).unwrap();
        let (first_pos, first_len) = (first.pos, first.len);
        std::mem::forget(first);

        let mut second = producer.reserve(8).unwrap();
        second.write(&2u64.to_ne_bytes());
        second.commit();

        let stop = CancellationToken::new();
        let n = consumer.drain(SHORT, &stop, |_| {}).await.unwrap();
        assert_eq!(n, 0, "committed record must not overtake an open reservation");

        // Commit the first reservation by hand
        shared.word(first_pos + 1).store(1u64, Ordering::Relaxed);
        shared.word(first_pos).store(COMMITTED | first_len as u64, Ordering::Release);

        let records = drain_all(&mut consumer).await;
        assert_eq!(records, vec![1u64.to_ne_bytes().to_vec(), 2u64.to_ne_bytes().to_vec()]);
    }

    #[tokio::test]
    async fn test_dropped_reservation_is_discarded() {
        let (mut producer, mut consumer) = channel(1024).unwrap();
        {
            let mut abandoned = producer.reserve(RECORD_SIZE).unwrap();
            abandoned.write(&[0xff; RECORD_SIZE]);
        }
        producer.reserve(8).unwrap().discard();
        assert!(capture(&mut producer, 4, &stat(4)));

        let records = drain_all(&mut consumer).await;
        assert_eq!(records.len(), 1);
        assert_eq!(CpuStat::from_bytes(&records[0]).unwrap().cpu_id, 4);
        assert_eq!(consumer.pending_bytes(), 0);
        assert_eq!(producer.free_bytes(), consumer.capacity());
    }

    #[tokio::test]
    async fn test_timeout_without_data() {
        let (_producer, mut consumer) = channel(1024).unwrap();
        let stop = CancellationToken::new();
        let n = consumer.drain(SHORT, &stop, |_| panic!("no records expected")).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_closed_after_final_drain() {
        let (mut producer, mut consumer) = channel(1024).unwrap();
        assert!(capture(&mut producer, 0, &stat(0)));
        drop(producer);

        let stop = CancellationToken::new();
        assert_eq!(consumer.drain(SHORT, &stop, |_| {}).await.unwrap(), 1);
        assert!(matches!(
            consumer.drain(SHORT, &stop, |_| {}).await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_stop_wins_over_close() {
        let (mut producer, mut consumer) = channel(1024).unwrap();
        assert!(capture(&mut producer, 0, &stat(0)));
        let stop = CancellationToken::new();
        stop.cancel();
        drop(producer);

        // Committed records still come out first
        assert_eq!(consumer.drain(SHORT, &stop, |_| {}).await.unwrap(), 1);
        assert!(matches!(
            consumer.drain(SHORT, &stop, |_| {}).await,
            Err(ChannelError::Interrupted)
        ));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let (_producer, mut consumer) = channel(1024).unwrap();
        let stop = CancellationToken::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = consumer.drain(Duration::from_secs(5), &stop, |_| {}).await;
        assert!(matches!(result, Err(ChannelError::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_commit_wakes_waiting_consumer() {
        let (mut producer, mut consumer) = channel(1024).unwrap();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            assert!(capture(&mut producer, 6, &stat(6)));
            producer
        });

        let stop = CancellationToken::new();
        let mut seen = Vec::new();
        let n = consumer
            .drain(Duration::from_secs(5), &stop, |b| seen.push(CpuStat::from_bytes(b).unwrap()))
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(seen[0].cpu_id, 6);
        drop(handle.join().unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_producer_keeps_order() {
        const EVENTS: u32 = 20_000;
        let (mut producer, mut consumer) = channel(4096).unwrap();
        let handle = std::thread::spawn(move || {
            let mut published = Vec::new();
            for cpu in 0..EVENTS {
                if capture(&mut producer, cpu, &stat(cpu)) {
                    published.push(u64::from(cpu));
                }
            }
            published
        });

        let stop = CancellationToken::new();
        let mut seen = Vec::new();
        loop {
            match consumer
                .drain(Duration::from_millis(50), &stop, |b| {
                    let rec = CpuStat::from_bytes(b).unwrap();
                    let cpu = u32::try_from(rec.cpu_id).unwrap();
                    // A mixed-slot record would break this relation
                    assert_eq!(rec, CpuStat::from_kernel(cpu, &stat(cpu)));
                    seen.push(rec.cpu_id);
                })
                .await
            {
                Ok(_) => {}
                Err(ChannelError::Closed) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        let published = handle.join().unwrap();
        assert!(seen.len() <= EVENTS as usize);
        assert_eq!(seen, published);
    }

    #[tokio::test]
    async fn test_repeated_cycles_release_ring() {
        for cycle in 0..5u32 {
            let (mut producer, mut consumer) = channel(1024).unwrap();
            let weak = Arc::downgrade(&consumer.shared);
            assert!(capture(&mut producer, cycle, &stat(cycle)));
            assert_eq!(drain_all(&mut consumer).await.len(), 1);
            assert_eq!(consumer.pending_bytes(), 0);

            drop(producer);
            drop(consumer);
            assert!(weak.upgrade().is_none(), "ring leaked in cycle {cycle}");
        }
    }
}
