//! # Poll Loop
//!
//! Drains a [`RecordSource`] until the stop token fires, decodes every
//! delivered record and forwards it to a [`RecordSink`].
//!
//! ## State Machine
//!
//! ```text
//! Idle ──▶ Polling ──┬──▶ Idle       (timeout, no data)
//!                    ├──▶ Rendering ──▶ Idle   (records handed to the sink)
//!                    └──▶ Stopped    (stop token, terminal)
//! ```
//!
//! Transitions are published on a `watch` channel, see [`PollLoop::subscribe`].
//!
//! The stop token is checked between drains. A drain already waiting when
//! the token fires returns [`ChannelError::Interrupted`], which ends the
//! loop cleanly. So does a closed channel once the token has fired.

use cpustat_common::CpuStat;
use log::{debug, warn};
use std::io;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::channel::RecordSource;
use crate::domain::{ChannelError, PollError};

/// Default wait per drain call
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Receives decoded records in delivery order
pub trait RecordSink {
    /// Render one record
    ///
    /// # Errors
    /// An error stops the poll loop after the current drain
    fn render(&mut self, record: &CpuStat) -> io::Result<()>;
}

impl RecordSink for Vec<CpuStat> {
    fn render(&mut self, record: &CpuStat) -> io::Result<()> {
        self.push(*record);
        Ok(())
    }
}

/// Observable loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Rendering,
    Stopped,
}

/// Counters reported when the loop ends
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    /// Drain calls issued
    pub drains: u64,
    /// Records decoded and rendered
    pub records: u64,
    /// Records skipped because they were shorter than a full record
    pub malformed: u64,
    /// Drains that timed out without data
    pub idle_polls: u64,
}

/// Encapsulates the drain/decode/render cycle and its state
pub struct PollLoop {
    timeout: Duration,
    state: watch::Sender<LoopState>,
    summary: PollSummary,
}

impl Default for PollLoop {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_TIMEOUT)
    }
}

impl PollLoop {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self { timeout, state, summary: PollSummary::default() }
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Follow state transitions while the loop runs
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn summary(&self) -> PollSummary {
        self.summary
    }

    /// Run until `stop` fires or a fatal error occurs
    ///
    /// # Errors
    /// - [`PollError::Channel`] if the wait fails or the channel is torn down
    /// - [`PollError::Render`] if the sink fails
    pub async fn run<S, R>(
        &mut self,
        source: &mut S,
        sink: &mut R,
        stop: &CancellationToken,
    ) -> Result<PollSummary, PollError>
    where
        S: RecordSource,
        R: RecordSink,
    {
        let result = self.poll_until_stopped(source, sink, stop).await;
        self.state.send_replace(LoopState::Stopped);
        let s = self.summary;
        debug!(
            "poll loop stopped: drains={} records={} malformed={} idle={}",
            s.drains, s.records, s.malformed, s.idle_polls
        );
        result.map(|()| self.summary)
    }

    async fn poll_until_stopped<S, R>(
        &mut self,
        source: &mut S,
        sink: &mut R,
        stop: &CancellationToken,
    ) -> Result<(), PollError>
    where
        S: RecordSource,
        R: RecordSink,
    {
        while !stop.is_cancelled() {
            self.state.send_replace(LoopState::Polling);
            self.summary.drains += 1;

            let mut render_error = None;
            let state = &self.state;
            let summary = &mut self.summary;
            let drained = source
                .drain(self.timeout, stop, |bytes| match CpuStat::from_bytes(bytes) {
                    Ok(record) => {
                        if render_error.is_some() {
                            return;
                        }
                        state.send_if_modified(|s| {
                            let changed = *s != LoopState::Rendering;
                            *s = LoopState::Rendering;
                            changed
                        });
                        match sink.render(&record) {
                            Ok(()) => summary.records += 1,
                            Err(e) => render_error = Some(e),
                        }
                    }
                    Err(e) => {
                        warn!("Received malformed event: {e}");
                        summary.malformed += 1;
                    }
                })
                .await;

            if let Some(e) = render_error {
                return Err(PollError::Render(e));
            }
            match drained {
                Ok(0) => self.summary.idle_polls += 1,
                Ok(_) => {}
                Err(ChannelError::Interrupted) => break,
                // The producer may go away in response to the same stop
                Err(ChannelError::Closed) if stop.is_cancelled() => break,
                Err(e) => return Err(e.into()),
            }
            self.state.send_replace(LoopState::Idle);
        }
        Ok(())
    }
}
