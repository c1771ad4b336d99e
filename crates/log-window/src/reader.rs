//! Per-source reader worker
//!
//! Every log source gets one worker thread that owns the reading side of its
//! window. The coordinator talks to it through a [`ReaderHandle`]: commands go
//! in over a channel, completion comes back as [`SourceEvent`]s, and the
//! current [`SourceStats`] are published behind a lock.
//!
//! Commands are numbered. A fill in progress checks the number of the most
//! recently issued command between batches and gives up as soon as it has been
//! superseded, leaving its range open-and-incomplete for the next pass to
//! resume from.

use crate::error::{ProviderError, ReaderError};
use crate::message::{DateRange, MessageRef, MessageTime, just_after};
use crate::messages::{FillTask, Messages};
use crate::navigation::{Alignment, NavigateFlags};
use crate::position_search::{self, PrevMessage, ValueBound};
use crate::provider::{BoundsUpdate, ParserParams, PositionedMessagesProvider};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Messages added to the window per lock acquisition
const FILL_BATCH: usize = 64;

/// Identifier of a log source inside one coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tuning knobs shared by all readers of a coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSettings {
    /// Size of a source's desired byte window
    pub window_bytes: i64,
    /// How often an idle reader checks its source for growth
    pub tail_poll_interval: Duration,
    /// Upper bound for blocking waits on the coordinator
    pub idle_timeout: Duration,
    /// Granularity of cancellation checks while waiting
    pub idle_poll_interval: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            window_bytes: 64 * 1024,
            tail_poll_interval: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(30),
            idle_poll_interval: Duration::from_millis(20),
        }
    }
}

/// Work a reader can be asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderCommand {
    /// Place the window around `date` according to the flags' alignment
    NavigateTo {
        date: MessageTime,
        flags: NavigateFlags,
    },
    /// Load the first window of the stream
    LoadHead,
    /// Load the last window of the stream
    LoadTail,
}

/// Notifications sent from reader threads to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// The reader finished command `generation` (successfully or not)
    Idle { source: SourceId, generation: u64 },
    /// The stream changed while the reader was idle
    Grew { source: SourceId, full_refresh: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    LoadError(String),
}

/// What a reader currently knows about its source and window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    /// Byte span of the stream
    pub available: Range<i64>,
    /// Times of the first and last message, `None` for an empty stream
    pub available_time: Option<DateRange>,
    /// Byte span of the loaded window
    pub window: Range<i64>,
    /// Dates the loaded window is known to hold every message of
    pub coverage: DateRange,
    pub message_count: usize,
    pub state: LoadState,
}

impl Default for SourceStats {
    fn default() -> Self {
        Self {
            available: 0..0,
            available_time: None,
            window: 0..0,
            coverage: DateRange::unbounded(),
            message_count: 0,
            state: LoadState::Idle,
        }
    }
}

impl SourceStats {
    /// The window spans the whole stream
    pub fn is_fully_loaded(&self) -> bool {
        self.window.start <= self.available.start && self.window.end >= self.available.end
    }

    pub fn is_shiftable_up(&self) -> bool {
        self.window.start > self.available.start
    }

    pub fn is_shiftable_down(&self) -> bool {
        self.window.end < self.available.end
    }
}

/// Dates covered by a loaded byte window.
///
/// Everything after the message preceding the window and before the first
/// message past it is loaded; a window touching a stream boundary is
/// unbounded on that side. When the preceding message is too far back to be
/// found, coverage starts at the window's first message.
pub fn loaded_date_range(
    provider: &dyn PositionedMessagesProvider,
    window: &Range<i64>,
) -> Result<DateRange, ProviderError> {
    let begin = if window.start <= provider.begin_position() {
        MessageTime::MIN_UTC
    } else {
        match position_search::find_prev_message(provider, window.start)? {
            PrevMessage::Found(prev) => position_search::read_nearest_date(provider, prev)?
                .map(just_after)
                .unwrap_or(MessageTime::MIN_UTC),
            PrevMessage::AtBegin => MessageTime::MIN_UTC,
            PrevMessage::Exhausted => {
                log::debug!(
                    "No message found before window start {}, coverage starts at the window",
                    window.start
                );
                position_search::read_nearest_date(provider, window.start)?
                    .unwrap_or(MessageTime::MAX_UTC)
            }
        }
    };
    let end = if window.end >= provider.end_position() {
        MessageTime::MAX_UTC
    } else {
        position_search::read_nearest_date(provider, window.end)?.unwrap_or(MessageTime::MAX_UTC)
    };
    Ok(DateRange::new(begin.min(end), end))
}

/// Times of the first and last message of the stream
pub fn available_date_range(
    provider: &dyn PositionedMessagesProvider,
) -> Result<Option<DateRange>, ProviderError> {
    let Some(first) = position_search::read_nearest_date(provider, provider.begin_position())?
    else {
        return Ok(None);
    };
    let last = match position_search::scan_prev_message_position(provider, provider.end_position())?
    {
        Some(p) => position_search::read_nearest_date(provider, p)?.unwrap_or(first),
        None => first,
    };
    Ok(Some(DateRange::inclusive(first, last.max(first))))
}

/// Place a window of `len` bytes inside `[begin, end)`, keeping it full near
/// the edges
fn clamp_window(p1: i64, p2: i64, begin: i64, end: i64) -> Range<i64> {
    let len = p2 - p1;
    if len >= end - begin {
        begin..end
    } else if p1 < begin {
        begin..begin + len
    } else if p2 > end {
        end - len..end
    } else {
        p1..p2
    }
}

enum Envelope {
    Load {
        generation: u64,
        command: ReaderCommand,
    },
    Shutdown,
}

struct Shared {
    stats: RwLock<SourceStats>,
    issued: AtomicU64,
    completed: AtomicU64,
}

/// Coordinator-side handle of a source's reader thread
pub struct ReaderHandle {
    id: SourceId,
    name: String,
    provider: Arc<dyn PositionedMessagesProvider>,
    messages: Arc<Mutex<Messages>>,
    visible: Arc<AtomicBool>,
    shared: Arc<Shared>,
    commands: Sender<Envelope>,
    worker: Option<thread::JoinHandle<()>>,
}

impl fmt::Debug for ReaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("running", &self.worker.is_some())
            .finish()
    }
}

impl ReaderHandle {
    /// Read the source's initial bounds and start its worker thread
    pub fn spawn(
        id: SourceId,
        name: impl Into<String>,
        provider: Arc<dyn PositionedMessagesProvider>,
        settings: ReaderSettings,
        events: Sender<SourceEvent>,
    ) -> Result<Self, ReaderError> {
        let name = name.into();
        provider.update_available_bounds(false)?;

        let begin = provider.begin_position();
        let stats = SourceStats {
            available: begin..provider.end_position(),
            available_time: available_date_range(provider.as_ref())?,
            window: begin..begin,
            ..SourceStats::default()
        };
        let shared = Arc::new(Shared {
            stats: RwLock::new(stats),
            issued: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        });
        let messages = Arc::new(Mutex::new(Messages::new()));
        let (tx, rx) = crossbeam_channel::unbounded();

        let worker = Worker {
            id,
            name: name.clone(),
            provider: provider.clone(),
            messages: messages.clone(),
            shared: shared.clone(),
            settings,
            events,
        };
        let handle = thread::Builder::new()
            .name(format!("log-reader-{}", id.0))
            .spawn(move || worker.run(rx))
            .map_err(ReaderError::Spawn)?;

        log::debug!("Reader {} '{}' spawned", id, name);
        Ok(Self {
            id,
            name,
            provider,
            messages,
            visible: Arc::new(AtomicBool::new(true)),
            shared,
            commands: tx,
            worker: Some(handle),
        })
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &Arc<dyn PositionedMessagesProvider> {
        &self.provider
    }

    pub fn messages(&self) -> &Arc<Mutex<Messages>> {
        &self.messages
    }

    pub fn visible(&self) -> &Arc<AtomicBool> {
        &self.visible
    }

    pub fn stats(&self) -> SourceStats {
        self.shared.stats.read().clone()
    }

    /// True when the reader finished the last command issued to it
    pub fn is_idle(&self) -> bool {
        self.shared.completed.load(Ordering::SeqCst) >= self.shared.issued.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.worker.is_none()
    }

    /// Queue a command; returns its generation
    pub fn send(&self, command: ReaderCommand) -> Result<u64, ReaderError> {
        if self.is_disposed() {
            return Err(ReaderError::Disposed(self.name.clone()));
        }
        let generation = self.shared.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.commands
            .send(Envelope::Load {
                generation,
                command,
            })
            .map_err(|_| ReaderError::Disposed(self.name.clone()))?;
        log::debug!("Reader '{}': issued #{} {:?}", self.name, generation, command);
        Ok(generation)
    }

    /// Shrink the loaded window to the messages inside `range`.
    ///
    /// Runs on the caller's thread and must only be called while the reader is
    /// idle; it never reads new data. The window lock is held throughout, so a
    /// concurrent reset after truncation either lands before (and the cut finds
    /// an empty window) or after (and discards the cut).
    pub fn cut(&self, range: DateRange) -> Result<(), ReaderError> {
        if self.is_disposed() {
            return Err(ReaderError::Disposed(self.name.clone()));
        }
        if !self.is_idle() {
            return Err(ReaderError::Busy(self.name.clone()));
        }

        let provider = self.provider.as_ref();
        // held until the stats are written: a reset after truncation runs on
        // the reader thread while it counts as idle
        let mut messages = self.messages.lock();
        let window = self.shared.stats.read().window.clone();
        if window.is_empty() {
            return Ok(());
        }
        let p1 = if range.has_begin() {
            position_search::locate_date_bound(provider, range.begin, ValueBound::Lower)?
                .max(window.start)
        } else {
            window.start
        };
        let p2 = if range.has_end() {
            position_search::locate_date_bound(provider, range.end, ValueBound::Lower)?
                .min(window.end)
        } else {
            window.end
        };
        let cut = p1..p2.max(p1);
        if cut == window {
            return Ok(());
        }

        messages.set_active_range(cut.start, cut.end)?;
        let count = messages.count();
        let coverage = loaded_date_range(provider, &cut)?;

        log::debug!(
            "Reader '{}': cut [{}, {}) to [{}, {})",
            self.name,
            window.start,
            window.end,
            cut.start,
            cut.end
        );
        let mut stats = self.shared.stats.write();
        stats.window = cut;
        stats.coverage = coverage;
        stats.message_count = count;
        Ok(())
    }

    /// Stop the worker thread and wait for it
    pub fn shutdown(&mut self) -> Result<(), ReaderError> {
        let Some(worker) = self.worker.take() else {
            return Err(ReaderError::Disposed(self.name.clone()));
        };
        // abort a fill in progress
        self.shared.issued.fetch_add(1, Ordering::SeqCst);
        if self.commands.send(Envelope::Shutdown).is_err() {
            log::debug!("Reader '{}' already stopped", self.name);
        }
        if worker.join().is_err() {
            log::error!("Reader '{}' panicked", self.name);
        }
        Ok(())
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.shutdown();
        }
    }
}

enum LoadOutcome {
    Done(Range<i64>),
    Superseded,
}

struct Worker {
    id: SourceId,
    name: String,
    provider: Arc<dyn PositionedMessagesProvider>,
    messages: Arc<Mutex<Messages>>,
    shared: Arc<Shared>,
    settings: ReaderSettings,
    events: Sender<SourceEvent>,
}

impl Worker {
    fn run(self, commands: Receiver<Envelope>) {
        log::debug!("Reader '{}' started", self.name);

        loop {
            match commands.recv_timeout(self.settings.tail_poll_interval) {
                Ok(Envelope::Shutdown) => {
                    log::debug!("Reader '{}' received shutdown", self.name);
                    break;
                }
                Ok(Envelope::Load {
                    generation,
                    command,
                }) => {
                    if self.is_superseded(generation) {
                        log::debug!("Reader '{}': skipping stale #{}", self.name, generation);
                        continue;
                    }
                    self.execute(generation, command);
                    self.shared.completed.store(generation, Ordering::SeqCst);
                    let idle = SourceEvent::Idle {
                        source: self.id,
                        generation,
                    };
                    if self.events.send(idle).is_err() {
                        log::info!("Reader '{}': coordinator gone, stopping", self.name);
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !self.poll_growth() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    log::debug!("Reader '{}': command channel closed", self.name);
                    break;
                }
            }
        }

        log::debug!("Reader '{}' stopped", self.name);
    }

    fn is_superseded(&self, generation: u64) -> bool {
        self.shared.issued.load(Ordering::SeqCst) > generation
    }

    fn execute(&self, generation: u64, command: ReaderCommand) {
        self.shared.stats.write().state = LoadState::Loading;

        match self.load(generation, command) {
            Ok(LoadOutcome::Done(window)) => {
                if let Err(e) = self.publish_window(window) {
                    self.fail(e.into());
                }
            }
            Ok(LoadOutcome::Superseded) => {
                log::debug!("Reader '{}': #{} superseded", self.name, generation);
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&self, error: ReaderError) {
        log::warn!("Reader '{}' failed to load: {}", self.name, error);
        let count = self.messages.lock().count();
        let mut stats = self.shared.stats.write();
        stats.state = LoadState::LoadError(error.to_string());
        stats.coverage = DateRange::unbounded();
        stats.message_count = count;
    }

    fn load(&self, generation: u64, command: ReaderCommand) -> Result<LoadOutcome, ReaderError> {
        let window = self.window_for(command)?;
        let changed = self
            .messages
            .lock()
            .set_active_range(window.start, window.end)?;
        log::debug!(
            "Reader '{}': #{} {:?} window [{}, {}) changed={}",
            self.name,
            generation,
            command,
            window.start,
            window.end,
            changed
        );

        loop {
            if self.is_superseded(generation) {
                return Ok(LoadOutcome::Superseded);
            }
            let Some(task) = self.messages.lock().get_next_range_to_fill()? else {
                return Ok(LoadOutcome::Done(window));
            };

            let filled = self.fill_range(&task, generation);
            let mut messages = self.messages.lock();
            match filled {
                Ok(true) => {
                    messages.complete_open_range()?;
                    messages.close_open_range()?;
                }
                Ok(false) => {
                    messages.close_open_range()?;
                    return Ok(LoadOutcome::Superseded);
                }
                Err(e) if e.is_time_constraint_violation() => {
                    messages.abandon_open_range()?;
                    return Err(e);
                }
                Err(e) => {
                    messages.close_open_range()?;
                    return Err(e);
                }
            }
        }
    }

    /// Read one range; `Ok(false)` when a newer command interrupted it
    fn fill_range(&self, task: &FillTask, generation: u64) -> Result<bool, ReaderError> {
        let mut parser = self
            .provider
            .create_parser(ParserParams::bounded(task.resume_from, task.begin..task.end))?;
        let mut batch: Vec<MessageRef> = Vec::with_capacity(FILL_BATCH);
        let mut added = 0usize;

        loop {
            let next = parser.read_next()?;
            let finished = next.is_none();
            if let Some(message) = next {
                batch.push(Arc::new(message));
            }

            if finished || batch.len() >= FILL_BATCH {
                let mut messages = self.messages.lock();
                for message in batch.drain(..) {
                    messages.add(message, false)?;
                    added += 1;
                }
            }

            if finished {
                log::debug!(
                    "Reader '{}': filled [{}, {}) from {}, {} messages",
                    self.name,
                    task.begin,
                    task.end,
                    task.resume_from,
                    added
                );
                return Ok(true);
            }
            if batch.is_empty() && self.is_superseded(generation) {
                return Ok(false);
            }
        }
    }

    fn window_for(&self, command: ReaderCommand) -> Result<Range<i64>, ReaderError> {
        let provider = self.provider.as_ref();
        let begin = provider.begin_position();
        let end = provider.end_position();
        let w = self.settings.window_bytes.max(1);

        let (p1, p2) = match command {
            ReaderCommand::LoadHead => (begin, begin + w),
            ReaderCommand::LoadTail => (end - w, end),
            ReaderCommand::NavigateTo { date, flags } => {
                let anchor = |bound| position_search::locate_date_bound(provider, date, bound);
                match flags.alignment() {
                    Alignment::Top => {
                        let p = anchor(ValueBound::Lower)?;
                        (p, p + w)
                    }
                    Alignment::Bottom => {
                        let p = if flags.is_shifting() {
                            anchor(ValueBound::Lower)?
                        } else {
                            anchor(ValueBound::Upper)?
                        };
                        (p - w, p)
                    }
                    Alignment::Center => {
                        let p = anchor(ValueBound::Lower)?;
                        (p - w / 2, p + w - w / 2)
                    }
                }
            }
        };
        Ok(clamp_window(p1, p2, begin, end))
    }

    fn publish_window(&self, window: Range<i64>) -> Result<(), ProviderError> {
        let coverage = loaded_date_range(self.provider.as_ref(), &window)?;
        let count = self.messages.lock().count();
        let mut stats = self.shared.stats.write();
        stats.window = window;
        stats.coverage = coverage;
        stats.message_count = count;
        stats.state = LoadState::Idle;
        Ok(())
    }

    fn refresh_available(&self) -> Result<(), ProviderError> {
        let provider = self.provider.as_ref();
        let available = provider.begin_position()..provider.end_position();
        let available_time = available_date_range(provider)?;
        let mut stats = self.shared.stats.write();
        stats.available = available;
        stats.available_time = available_time;
        Ok(())
    }

    /// Check the source for growth; false when the coordinator is gone
    fn poll_growth(&self) -> bool {
        let full_refresh = match self.provider.update_available_bounds(true) {
            Ok(BoundsUpdate::NothingUpdated) => return true,
            Ok(BoundsUpdate::NewMessagesAvailable) => false,
            Ok(BoundsUpdate::OldMessagesInvalidated) => true,
            Err(e) => {
                log::warn!("Reader '{}': failed to check for growth: {}", self.name, e);
                return true;
            }
        };

        if full_refresh {
            // same lock order as `ReaderHandle::cut`
            let mut messages = self.messages.lock();
            if let Err(e) = messages.reset() {
                log::warn!("Reader '{}': cannot reset window: {}", self.name, e);
            }
            let begin = self.provider.begin_position();
            let mut stats = self.shared.stats.write();
            stats.window = begin..begin;
            stats.coverage = DateRange::unbounded();
            stats.message_count = 0;
        }
        if let Err(e) = self.refresh_available() {
            log::warn!("Reader '{}': failed to read new bounds: {}", self.name, e);
        }

        log::info!(
            "Reader '{}': source {}",
            self.name,
            if full_refresh { "was replaced" } else { "grew" }
        );
        self.events
            .send(SourceEvent::Grew {
                source: self.id,
                full_refresh,
            })
            .is_ok()
    }
}
