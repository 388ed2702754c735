use cpustat::channel::{channel, Consumer, Producer, RecordSource};
use cpustat::domain::ChannelError;
use cpustat::poll_loop::{LoopState, PollLoop};
use cpustat::render::TableRenderer;
use cpustat_common::{capture, cputime, CpuStat, KernelCpustat, RECORD_SIZE};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_millis(50);

/// Kernel snapshot whose buckets are derived from `cpu`
fn snapshot(cpu: u32) -> KernelCpustat {
    let mut stat = KernelCpustat::default();
    for (i, value) in stat.cpustat.iter_mut().enumerate() {
        *value = u64::from(cpu) * 1_000 + i as u64;
    }
    stat
}

/// Cancel `stop` after `delay`, from another task
fn cancel_after(stop: &CancellationToken, delay: Duration) {
    let stop = stop.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        stop.cancel();
    });
}

async fn drain_once(consumer: &mut Consumer) -> Result<Vec<CpuStat>, ChannelError> {
    let stop = CancellationToken::new();
    let mut records = Vec::new();
    consumer
        .drain(TIMEOUT, &stop, |bytes| {
            records.push(CpuStat::from_bytes(bytes).expect("full record"));
        })
        .await?;
    Ok(records)
}

fn fire(producer: &mut Producer, cpus: impl IntoIterator<Item = u32>) -> usize {
    cpus.into_iter().filter(|&cpu| capture(&mut *producer, cpu, &snapshot(cpu))).count()
}

#[tokio::test]
async fn test_single_firing_decodes_identically() {
    let (mut producer, mut consumer) = channel(4096).unwrap();

    let mut stat = KernelCpustat::default();
    stat.cpustat[cputime::USER] = 100;
    stat.cpustat[cputime::NICE] = 0;
    stat.cpustat[cputime::SYSTEM] = 50;
    stat.cpustat[cputime::IDLE] = 9000;
    stat.cpustat[cputime::IOWAIT] = 10;
    stat.cpustat[cputime::IRQ] = 1;
    stat.cpustat[cputime::SOFTIRQ] = 2;
    assert!(capture(&mut producer, 0, &stat));

    let records = drain_once(&mut consumer).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fields(), [0, 100, 0, 50, 9000, 10, 1, 2, 0, 0, 0]);
}

#[tokio::test]
async fn test_burst_drained_in_one_call() {
    let (mut producer, mut consumer) = channel(4096).unwrap();
    assert_eq!(fire(&mut producer, 0..5), 5);

    let records = drain_once(&mut consumer).await.unwrap();
    let cpus: Vec<u64> = records.iter().map(|r| r.cpu_id).collect();
    assert_eq!(cpus, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_empty_window_is_not_an_error() {
    let (_producer, mut consumer) = channel(4096).unwrap();

    let started = Instant::now();
    let records = drain_once(&mut consumer).await.unwrap();
    assert!(records.is_empty());
    assert!(started.elapsed() >= TIMEOUT);
}

#[tokio::test]
async fn test_stop_mid_wait_ends_poll_loop_within_one_timeout() {
    let (_producer, mut consumer) = channel(4096).unwrap();
    let stop = CancellationToken::new();
    let timeout = Duration::from_millis(500);
    cancel_after(&stop, Duration::from_millis(20));

    let mut poll_loop = PollLoop::new(timeout);
    let mut sink: Vec<CpuStat> = Vec::new();
    let started = Instant::now();
    let summary = poll_loop.run(&mut consumer, &mut sink, &stop).await.unwrap();

    assert!(started.elapsed() < timeout);
    assert_eq!(summary.drains, 1);
    assert_eq!(summary.records, 0);
    assert_eq!(poll_loop.state(), LoopState::Stopped);
}

#[tokio::test]
async fn test_every_firing_observed_in_order_with_room() {
    let (mut producer, mut consumer) = channel(64 * 1024).unwrap();
    let stop = CancellationToken::new();
    assert_eq!(fire(&mut producer, 0..200), 200);
    cancel_after(&stop, Duration::from_millis(100));

    let mut sink: Vec<CpuStat> = Vec::new();
    let summary = PollLoop::new(TIMEOUT).run(&mut consumer, &mut sink, &stop).await.unwrap();

    assert_eq!(summary.records, 200);
    for (i, record) in sink.iter().enumerate() {
        let cpu = u32::try_from(i).unwrap();
        assert_eq!(*record, CpuStat::from_kernel(cpu, &snapshot(cpu)));
    }
}

#[tokio::test]
async fn test_overflow_keeps_order_and_never_mixes_slots() {
    // Room for 10 records of 12 words each
    let (mut producer, mut consumer) = channel(1024).unwrap();
    let published = fire(&mut producer, 0..50);
    assert_eq!(published, 10);

    let records = drain_once(&mut consumer).await.unwrap();
    assert_eq!(records.len(), published);

    let mut last = None;
    for record in &records {
        let cpu = u32::try_from(record.cpu_id).unwrap();
        assert_eq!(*record, CpuStat::from_kernel(cpu, &snapshot(cpu)), "mixed slot");
        assert!(last < Some(cpu), "out of order");
        last = Some(cpu);
    }

    // Space freed by the drain is reusable
    assert_eq!(fire(&mut producer, 100..101), 1);
    let records = drain_once(&mut consumer).await.unwrap();
    assert_eq!(records[0].cpu_id, 100);
}

#[tokio::test]
async fn test_short_blob_is_skipped() {
    let (mut producer, mut consumer) = channel(4096).unwrap();
    assert!(capture(&mut producer, 1, &snapshot(1)));
    let mut short = producer.reserve(RECORD_SIZE / 2).unwrap();
    short.write(&[0xab; RECORD_SIZE / 2]);
    short.commit();
    assert!(capture(&mut producer, 2, &snapshot(2)));

    let stop = CancellationToken::new();
    cancel_after(&stop, Duration::from_millis(100));
    let mut sink: Vec<CpuStat> = Vec::new();
    let summary = PollLoop::new(TIMEOUT).run(&mut consumer, &mut sink, &stop).await.unwrap();

    assert_eq!(summary.malformed, 1);
    let cpus: Vec<u64> = sink.iter().map(|r| r.cpu_id).collect();
    assert_eq!(cpus, vec![1, 2]);
}

#[tokio::test]
async fn test_repeated_cycles_leave_nothing_reserved() {
    for cycle in 0..5u32 {
        let (mut producer, mut consumer) = channel(4096).unwrap();
        let capacity = consumer.capacity();
        fire(&mut producer, cycle * 10..cycle * 10 + 8);

        // A reservation abandoned mid-fill is released, not left pending
        let abandoned = producer.reserve(RECORD_SIZE).unwrap();
        drop(abandoned);

        let stop = CancellationToken::new();
        cancel_after(&stop, Duration::from_millis(60));
        let mut sink: Vec<CpuStat> = Vec::new();
        let summary = PollLoop::new(TIMEOUT).run(&mut consumer, &mut sink, &stop).await.unwrap();

        assert_eq!(summary.records, 8);
        assert_eq!(consumer.pending_bytes(), 0);
        assert_eq!(producer.free_bytes(), capacity);
    }
}

#[tokio::test]
async fn test_table_output_end_to_end() {
    let (mut producer, mut consumer) = channel(4096).unwrap();
    fire(&mut producer, 0..2);
    drop(producer);

    let stop = CancellationToken::new();
    let mut renderer = TableRenderer::new(Vec::new());
    renderer.write_header().unwrap();
    // The producer is gone, so the loop ends once the ring is empty
    let result = PollLoop::new(TIMEOUT).run(&mut consumer, &mut renderer, &stop).await;
    assert!(result.is_err());

    let output = String::from_utf8(renderer.into_inner()).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("CPU"));
    assert!(lines[1].starts_with('0'));
    assert!(lines[2].starts_with('1'));
}
