//! Detection of periods in which no source logged anything
//!
//! The scan walks time forward by jumps of one threshold, using date-bound
//! searches on every source, so a dense stretch of log costs a few binary
//! searches per threshold rather than a parse of every message.

use crate::error::ProviderError;
use crate::message::MessageTime;
use crate::position_search::{self, ValueBound};
use crate::provider::PositionedMessagesProvider;
use chrono::TimeDelta;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A period longer than the threshold without messages in any source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeGap {
    /// Time of the last message before the gap
    pub begin: MessageTime,
    /// Time of the first message after the gap
    pub end: MessageTime,
}

impl TimeGap {
    pub fn duration(&self) -> TimeDelta {
        self.end - self.begin
    }
}

/// Result of one scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GapScan {
    Complete(Vec<TimeGap>),
    /// The scan stopped at the configured ceiling
    TooManyGaps(Vec<TimeGap>),
    /// The scan was cancelled; holds what was found so far
    Cancelled(Vec<TimeGap>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapSettings {
    pub threshold: TimeDelta,
    pub max_gaps: usize,
    /// Failed scans retried before the worker gives up
    pub retry_limit: u32,
    /// Wait before a retry, multiplied by the number of failures so far
    pub retry_backoff: Duration,
    /// How often an idle worker checks for cancellation
    pub poll_interval: Duration,
}

impl Default for GapSettings {
    fn default() -> Self {
        Self {
            threshold: TimeDelta::seconds(60),
            max_gaps: 1000,
            retry_limit: 3,
            retry_backoff: Duration::from_millis(250),
            poll_interval: Duration::from_millis(50),
        }
    }
}

fn first_time(
    provider: &dyn PositionedMessagesProvider,
) -> Result<Option<MessageTime>, ProviderError> {
    position_search::read_nearest_date(provider, provider.begin_position())
}

/// Time of the last message at or before `time`
fn last_time_until(
    provider: &dyn PositionedMessagesProvider,
    time: MessageTime,
) -> Result<Option<MessageTime>, ProviderError> {
    let position = position_search::locate_date_bound(provider, time, ValueBound::LowerReversed)?;
    if position < provider.begin_position() {
        return Ok(None);
    }
    position_search::read_nearest_date(provider, position)
}

/// Time of the first message strictly after `time`
fn first_time_after(
    provider: &dyn PositionedMessagesProvider,
    time: MessageTime,
) -> Result<Option<MessageTime>, ProviderError> {
    let position = position_search::locate_date_bound(provider, time, ValueBound::Upper)?;
    position_search::read_nearest_date(provider, position)
}

/// Find every period longer than `threshold` in which no provider has a message
pub fn find_time_gaps(
    providers: &[Arc<dyn PositionedMessagesProvider>],
    threshold: TimeDelta,
    max_gaps: usize,
    cancel: &CancellationToken,
) -> Result<GapScan, ProviderError> {
    let mut gaps = Vec::new();

    let mut current = None;
    for provider in providers {
        if let Some(t) = first_time(provider.as_ref())? {
            current = Some(current.map_or(t, |c: MessageTime| c.min(t)));
        }
    }
    let Some(mut current) = current else {
        return Ok(GapScan::Complete(gaps));
    };

    loop {
        if cancel.is_cancelled() {
            return Ok(GapScan::Cancelled(gaps));
        }

        // nothing between `current` and `reach` can be a gap
        let horizon = current
            .checked_add_signed(threshold)
            .unwrap_or(MessageTime::MAX_UTC);
        let mut reach = current;
        for provider in providers {
            if let Some(t) = last_time_until(provider.as_ref(), horizon)? {
                reach = reach.max(t);
            }
        }

        let mut next: Option<MessageTime> = None;
        for provider in providers {
            if let Some(t) = first_time_after(provider.as_ref(), reach)? {
                next = Some(next.map_or(t, |n| n.min(t)));
            }
        }
        let Some(next) = next else {
            return Ok(GapScan::Complete(gaps));
        };

        if next - reach > threshold {
            if gaps.len() == max_gaps {
                log::warn!("Stopping time gap scan after {} gaps", max_gaps);
                return Ok(GapScan::TooManyGaps(gaps));
            }
            gaps.push(TimeGap {
                begin: reach,
                end: next,
            });
        }
        current = next;
    }
}

/// Why a scan pass ended without a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// Sources changed during the scan
    Invalidated,
    /// Reading a source failed
    ReadFailed(String),
}

/// How one pass of the worker loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    Completed(GapScan),
    Restart(RestartReason),
    Cancelled,
}

/// Notifications from a [`TimeGapsWorker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GapsEvent {
    Completed(Vec<TimeGap>),
    TooManyGaps(Vec<TimeGap>),
    /// Retries were exhausted; the worker has stopped
    Failed(String),
}

/// Background thread keeping the list of time gaps up to date
pub struct TimeGapsWorker {
    root: CancellationToken,
    scan: Arc<Mutex<CancellationToken>>,
    wake: Sender<()>,
    events: Receiver<GapsEvent>,
    thread: Option<thread::JoinHandle<()>>,
}

impl TimeGapsWorker {
    pub fn spawn(
        providers: Vec<Arc<dyn PositionedMessagesProvider>>,
        settings: GapSettings,
    ) -> std::io::Result<Self> {
        let root = CancellationToken::new();
        let scan = Arc::new(Mutex::new(root.child_token()));
        let (wake_tx, wake_rx) = crossbeam_channel::unbounded();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        let state = GapsLoop {
            providers,
            settings,
            root: root.clone(),
            scan: scan.clone(),
            wake: wake_rx,
            events: events_tx,
        };
        let thread = thread::Builder::new()
            .name("log-time-gaps".to_string())
            .spawn(move || state.run())?;

        Ok(Self {
            root,
            scan,
            wake: wake_tx,
            events: events_rx,
            thread: Some(thread),
        })
    }

    pub fn events(&self) -> &Receiver<GapsEvent> {
        &self.events
    }

    /// Sources changed: abort the current scan and start over
    pub fn invalidate(&self) {
        self.scan.lock().cancel();
        if self.wake.send(()).is_err() {
            log::debug!("Time gaps worker already stopped");
        }
    }

    pub fn shutdown(&mut self) {
        self.root.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Time gaps worker panicked");
            }
        }
    }
}

impl Drop for TimeGapsWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct GapsLoop {
    providers: Vec<Arc<dyn PositionedMessagesProvider>>,
    settings: GapSettings,
    root: CancellationToken,
    scan: Arc<Mutex<CancellationToken>>,
    wake: Receiver<()>,
    events: Sender<GapsEvent>,
}

impl GapsLoop {
    fn run(self) {
        log::debug!("Time gaps worker started");
        let mut failures = 0u32;

        loop {
            let event = match self.scan_once() {
                LoopOutcome::Cancelled => break,
                LoopOutcome::Restart(RestartReason::Invalidated) => {
                    log::debug!("Time gaps scan invalidated, restarting");
                    failures = 0;
                    continue;
                }
                LoopOutcome::Restart(RestartReason::ReadFailed(reason)) => {
                    failures += 1;
                    if failures > self.settings.retry_limit {
                        log::warn!("Time gaps scan failed {} times: {}", failures, reason);
                        let _ = self.events.send(GapsEvent::Failed(reason));
                        break;
                    }
                    log::debug!("Time gaps scan failed ({}), retrying: {}", failures, reason);
                    if !self.sleep(self.settings.retry_backoff * failures) {
                        break;
                    }
                    continue;
                }
                LoopOutcome::Completed(GapScan::TooManyGaps(gaps)) => GapsEvent::TooManyGaps(gaps),
                LoopOutcome::Completed(GapScan::Complete(gaps) | GapScan::Cancelled(gaps)) => {
                    GapsEvent::Completed(gaps)
                }
            };
            failures = 0;

            if self.events.send(event).is_err() || !self.wait_for_invalidation() {
                break;
            }
        }

        log::debug!("Time gaps worker stopped");
    }

    fn scan_once(&self) -> LoopOutcome {
        while self.wake.try_recv().is_ok() {}
        let token = {
            let mut scan = self.scan.lock();
            *scan = self.root.child_token();
            scan.clone()
        };

        match find_time_gaps(
            &self.providers,
            self.settings.threshold,
            self.settings.max_gaps,
            &token,
        ) {
            Ok(GapScan::Cancelled(_)) if self.root.is_cancelled() => LoopOutcome::Cancelled,
            Ok(GapScan::Cancelled(_)) => LoopOutcome::Restart(RestartReason::Invalidated),
            Ok(scan) => LoopOutcome::Completed(scan),
            Err(e) => LoopOutcome::Restart(RestartReason::ReadFailed(e.to_string())),
        }
    }

    /// Sleep for `duration`; false when the worker should stop
    fn sleep(&self, duration: Duration) -> bool {
        match self.wake.recv_timeout(duration) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => !self.root.is_cancelled(),
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Block until the sources change; false when the worker should stop
    fn wait_for_invalidation(&self) -> bool {
        loop {
            if self.root.is_cancelled() {
                return false;
            }
            match self.wake.recv_timeout(self.settings.poll_interval) {
                Ok(()) => return true,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}
