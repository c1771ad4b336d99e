//! Coordinator keeping every source's window on a common date range
//!
//! The manager owns one reader per source. A navigation command classifies
//! each source against the target date, sends load commands to the readers
//! and marks the view unstable. Readers report back through an event channel
//! that the owner drains with [`LogSourcesManager::pump_events`] (or, blocking,
//! [`LogSourcesManager::wait_for_idle`]). Once every reader is idle the
//! manager intersects their loaded date ranges, cuts every window to that
//! stable range and announces it with [`ManagerEvent::ViewUpdated`].
//!
//! All mutation happens on the thread that owns the manager; readers only
//! touch their own window under its lock.

use crate::error::{ProviderError, ReaderError};
use crate::merge::{MergeSource, MergeView};
use crate::message::{DateRange, MessageTime};
use crate::navigation::{Alignment, NavigateFlags, NavigationCommand, Origin};
use crate::provider::PositionedMessagesProvider;
use crate::reader::{
    LoadState, ReaderCommand, ReaderHandle, ReaderSettings, SourceEvent, SourceId, SourceStats,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Unknown log source {0}")]
    UnknownSource(SourceId),

    #[error("Navigation by date requires a date")]
    MissingDate,

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Where a source's data lies relative to a navigation target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pivot {
    /// All messages are before the target
    Above,
    /// All messages are after the target
    Below,
    /// The source has messages on both sides of the target (or none at all)
    Over,
}

/// Notifications for whoever presents the merged view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// All sources are idle and cut to this range
    ViewUpdated(DateRange),
    SourceStateChanged { source: SourceId, state: LoadState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleWait {
    Idle,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOutcome {
    Shifted,
    /// No source has more data in that direction
    AtBoundary,
    /// The view was not stable when the shift was requested
    Rejected,
    TimedOut,
    Cancelled,
}

/// Cancels the shift currently waiting for its sources.
///
/// Every shift starts with a fresh token, so a cancellation only affects the
/// shift in progress at the time it is requested.
#[derive(Debug, Clone, Default)]
pub struct ShiftCanceller(Arc<Mutex<CancellationToken>>);

impl ShiftCanceller {
    pub fn cancel(&self) {
        self.0.lock().cancel();
    }

    fn renew(&self) -> CancellationToken {
        let mut token = self.0.lock();
        *token = CancellationToken::new();
        token.clone()
    }
}

enum Target {
    Date(MessageTime),
    Head,
    Tail,
}

struct SourceSlot {
    reader: ReaderHandle,
    pivot: Pivot,
    last_state: LoadState,
}

fn classify(stats: &SourceStats, date: MessageTime) -> Pivot {
    match stats.available_time {
        Some(available) if available.end <= date => Pivot::Above,
        Some(available) if available.begin > date => Pivot::Below,
        _ => Pivot::Over,
    }
}

pub struct LogSourcesManager {
    settings: ReaderSettings,
    sources: Vec<SourceSlot>,
    next_id: u64,
    events_tx: Sender<SourceEvent>,
    events_rx: Receiver<SourceEvent>,
    subscribers: Vec<Sender<ManagerEvent>>,
    stable_range: DateRange,
    stable: bool,
    last_command: Option<NavigationCommand>,
    last_user_command: Option<NavigationCommand>,
    pending_renavigate: Option<bool>,
    shift_canceller: ShiftCanceller,
}

impl LogSourcesManager {
    pub fn new(settings: ReaderSettings) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            settings,
            sources: Vec::new(),
            next_id: 1,
            events_tx,
            events_rx,
            subscribers: Vec::new(),
            stable_range: DateRange::unbounded(),
            stable: false,
            last_command: None,
            last_user_command: None,
            pending_renavigate: None,
            shift_canceller: ShiftCanceller::default(),
        }
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    /// Start reading a new source and bring it in line with the current view
    pub fn add_source(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn PositionedMessagesProvider>,
    ) -> Result<SourceId, ManagerError> {
        let id = SourceId(self.next_id);
        self.next_id += 1;

        let reader = ReaderHandle::spawn(
            id,
            name,
            provider,
            self.settings.clone(),
            self.events_tx.clone(),
        )?;
        log::info!("Added log source {} '{}'", id, reader.name());
        self.sources.push(SourceSlot {
            reader,
            pivot: Pivot::Over,
            last_state: LoadState::Idle,
        });

        self.renavigate(false)?;
        Ok(id)
    }

    pub fn remove_source(&mut self, id: SourceId) -> Result<(), ManagerError> {
        let index = self
            .sources
            .iter()
            .position(|s| s.reader.id() == id)
            .ok_or(ManagerError::UnknownSource(id))?;
        let mut slot = self.sources.remove(index);
        slot.reader.shutdown()?;
        log::info!("Removed log source {} '{}'", id, slot.reader.name());

        self.renavigate(false)
    }

    /// Show or hide a source in the merged view
    pub fn set_visible(&mut self, id: SourceId, visible: bool) -> Result<(), ManagerError> {
        let slot = self.slot(id).ok_or(ManagerError::UnknownSource(id))?;
        slot.reader.visible().store(visible, Ordering::Release);
        Ok(())
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|s| s.reader.id()).collect()
    }

    pub fn source_name(&self, id: SourceId) -> Option<&str> {
        self.slot(id).map(|s| s.reader.name())
    }

    pub fn source_stats(&self, id: SourceId) -> Option<SourceStats> {
        self.slot(id).map(|s| s.reader.stats())
    }

    /// Merged view over the windows of all sources
    pub fn merged_view(&self) -> MergeView {
        MergeView::new(
            self.sources
                .iter()
                .map(|s| MergeSource {
                    id: s.reader.id(),
                    messages: s.reader.messages().clone(),
                    visible: s.reader.visible().clone(),
                })
                .collect(),
        )
    }

    /// Receive [`ManagerEvent`]s from now on
    pub fn subscribe(&mut self) -> Receiver<ManagerEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn shift_canceller(&self) -> ShiftCanceller {
        self.shift_canceller.clone()
    }

    /// All readers are idle and their windows are cut to the stable range
    pub fn is_stable(&self) -> bool {
        self.stable && self.all_idle()
    }

    /// The last computed stable range
    pub fn stable_range(&self) -> DateRange {
        self.stable_range
    }

    pub fn pivots(&self) -> Vec<(SourceId, Pivot)> {
        self.sources
            .iter()
            .map(|s| (s.reader.id(), s.pivot))
            .collect()
    }

    pub fn last_user_command(&self) -> Option<NavigationCommand> {
        self.last_user_command
    }

    /// Jump to `date`; the origin in `flags` is forced to the date
    pub fn navigate_to(
        &mut self,
        date: MessageTime,
        flags: NavigateFlags,
    ) -> Result<(), ManagerError> {
        self.navigate(NavigationCommand::new(
            Some(date),
            flags.with_origin(NavigateFlags::ORIGIN_DATE),
        ))
    }

    /// Run a user command; it is remembered and replayed when sources change
    pub fn navigate(&mut self, command: NavigationCommand) -> Result<(), ManagerError> {
        if command.flags.origin() == Origin::Date && command.date.is_none() {
            return Err(ManagerError::MissingDate);
        }
        self.last_user_command = Some(command);
        self.issue(command)
    }

    pub fn shift_up(&mut self, timeout: Duration) -> Result<ShiftOutcome, ManagerError> {
        self.shift(true, timeout)
    }

    pub fn shift_down(&mut self, timeout: Duration) -> Result<ShiftOutcome, ManagerError> {
        self.shift(false, timeout)
    }

    pub fn cancel_shifting(&self) {
        self.shift_canceller.cancel();
    }

    fn shift(&mut self, up: bool, timeout: Duration) -> Result<ShiftOutcome, ManagerError> {
        if !self.is_stable() {
            log::debug!("Shift rejected: view is not stable");
            return Ok(ShiftOutcome::Rejected);
        }

        let stable = self.stable_range;
        let shiftable = self.sources.iter().any(|s| {
            let stats = s.reader.stats();
            if up {
                stats.is_shiftable_up()
            } else {
                stats.is_shiftable_down()
            }
        });
        let bounded = if up {
            stable.has_begin()
        } else {
            stable.has_end()
        };
        if !shiftable || !bounded {
            return Ok(ShiftOutcome::AtBoundary);
        }

        let token = self.shift_canceller.renew();
        let (date, alignment) = if up {
            (stable.begin, NavigateFlags::ALIGN_BOTTOM)
        } else {
            (stable.end, NavigateFlags::ALIGN_TOP)
        };
        self.issue(NavigationCommand::new(
            Some(date),
            alignment | NavigateFlags::ORIGIN_DATE | NavigateFlags::SHIFTING_MODE,
        ))?;

        Ok(match self.wait_for_idle(timeout, &token)? {
            IdleWait::Idle => ShiftOutcome::Shifted,
            IdleWait::TimedOut => ShiftOutcome::TimedOut,
            IdleWait::Cancelled => ShiftOutcome::Cancelled,
        })
    }

    /// Re-run navigation after sources were added, removed or changed
    pub fn renavigate(&mut self, full_refresh: bool) -> Result<(), ManagerError> {
        if !self.all_idle() {
            let pending = self.pending_renavigate.unwrap_or(false) || full_refresh;
            self.pending_renavigate = Some(pending);
            return Ok(());
        }
        if self.sources.is_empty() {
            return self.update();
        }

        let default = NavigationCommand::default();
        let command = match self.last_user_command {
            _ if full_refresh && self.sources.len() == 1 => {
                self.last_user_command = Some(default);
                default
            }
            None => {
                self.last_user_command = Some(default);
                default
            }
            Some(user)
                if !user.flags.is_sticky()
                    && !self.sources.iter().any(|s| s.reader.stats().is_fully_loaded()) =>
            {
                // top up the buffers around what is shown now
                let flags = (user.flags - NavigateFlags::SHIFTING_MODE)
                    .with_origin(NavigateFlags::ORIGIN_LOADED_RANGE_BOUNDARIES);
                NavigationCommand::new(None, flags)
            }
            Some(user) => user,
        };
        log::debug!("Renavigating (full refresh: {}) with {:?}", full_refresh, command);
        self.issue(command)
    }

    fn issue(&mut self, command: NavigationCommand) -> Result<(), ManagerError> {
        self.last_command = Some(command);
        self.stable = false;

        let flags = command.flags;
        let alignment = flags.alignment();
        let stable = self.stable_range;
        let target = match flags.origin() {
            Origin::Date => Target::Date(command.date.ok_or(ManagerError::MissingDate)?),
            Origin::StreamBoundaries if alignment == Alignment::Top => Target::Head,
            Origin::StreamBoundaries => Target::Tail,
            Origin::LoadedRangeBoundaries => match alignment {
                Alignment::Top if stable.has_begin() => Target::Date(stable.begin),
                Alignment::Top => Target::Head,
                Alignment::Bottom if stable.has_end() => Target::Date(stable.end),
                Alignment::Bottom => Target::Tail,
                Alignment::Center if stable.has_begin() && stable.has_end() => {
                    Target::Date(stable.begin + (stable.end - stable.begin) / 2)
                }
                Alignment::Center if stable.has_begin() => Target::Date(stable.begin),
                Alignment::Center => Target::Tail,
            },
        };

        match target {
            Target::Head => self.send_all(ReaderCommand::LoadHead)?,
            Target::Tail => self.send_all(ReaderCommand::LoadTail)?,
            Target::Date(date) => {
                let skippable = flags.origin() == Origin::Date && !flags.is_shifting();
                let mut any_over = false;
                for slot in &mut self.sources {
                    let stats = slot.reader.stats();
                    slot.pivot = classify(&stats, date);
                    if slot.pivot != Pivot::Over {
                        continue;
                    }
                    any_over = true;
                    let covered = skippable
                        && stats.state == LoadState::Idle
                        && !stats.window.is_empty()
                        && stats.coverage.contains(date);
                    if covered {
                        log::debug!("Source {} already covers {}", slot.reader.id(), date);
                        continue;
                    }
                    slot.reader
                        .send(ReaderCommand::NavigateTo { date, flags })?;
                }
                if !any_over {
                    self.load_neighbours(alignment)?;
                }
            }
        }

        self.update()
    }

    fn send_all(&mut self, command: ReaderCommand) -> Result<(), ManagerError> {
        for slot in &mut self.sources {
            slot.pivot = Pivot::Over;
            slot.reader.send(command)?;
        }
        Ok(())
    }

    /// No source has data at the target: load the closest edges instead
    fn load_neighbours(&mut self, alignment: Alignment) -> Result<(), ManagerError> {
        let heads = matches!(alignment, Alignment::Top | Alignment::Center);
        let tails = matches!(alignment, Alignment::Bottom | Alignment::Center);

        let mut issued = false;
        for slot in &mut self.sources {
            let command = match slot.pivot {
                Pivot::Below if heads => ReaderCommand::LoadHead,
                Pivot::Above if tails => ReaderCommand::LoadTail,
                _ => continue,
            };
            slot.reader.send(command)?;
            slot.pivot = Pivot::Over;
            issued = true;
        }
        if issued {
            return Ok(());
        }

        for slot in &mut self.sources {
            let command = match slot.pivot {
                Pivot::Below => ReaderCommand::LoadHead,
                Pivot::Above => ReaderCommand::LoadTail,
                Pivot::Over => continue,
            };
            slot.reader.send(command)?;
            slot.pivot = Pivot::Over;
        }
        Ok(())
    }

    /// Recompute the stable range once every reader is idle
    pub fn update(&mut self) -> Result<(), ManagerError> {
        if !self.all_idle() {
            return Ok(());
        }

        let mut stable = DateRange::unbounded();
        for slot in self.sources.iter().filter(|s| s.pivot == Pivot::Over) {
            let coverage = slot.reader.stats().coverage;
            if coverage.has_begin() {
                stable.begin = stable.begin.max(coverage.begin);
            }
            if coverage.has_end() {
                stable.end = stable.end.min(coverage.end);
            }
        }
        if stable.end < stable.begin {
            stable.end = stable.begin;
        }

        // sources that were out of range may reach into it now
        let mut issued = false;
        for slot in &mut self.sources {
            let Some(available) = slot.reader.stats().available_time else {
                continue;
            };
            let command = match slot.pivot {
                Pivot::Above if available.end > stable.begin => ReaderCommand::LoadTail,
                Pivot::Below if available.begin < stable.end => ReaderCommand::LoadHead,
                _ => continue,
            };
            slot.reader.send(command)?;
            slot.pivot = Pivot::Over;
            issued = true;
        }
        if issued {
            self.stable = false;
            return Ok(());
        }

        for slot in &self.sources {
            slot.reader.cut(stable)?;
        }
        self.stable_range = stable;
        self.stable = true;
        log::debug!("View stable at [{}, {})", stable.begin, stable.end);
        self.emit(ManagerEvent::ViewUpdated(stable));

        if let Some(full_refresh) = self.pending_renavigate.take() {
            self.renavigate(full_refresh)?;
        }
        Ok(())
    }

    /// Handle reader events, waiting up to `timeout` for the first one.
    ///
    /// Returns the number of events handled.
    pub fn pump_events(&mut self, timeout: Duration) -> Result<usize, ManagerError> {
        let first = match self.events_rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return Ok(0),
        };
        self.handle_event(first)?;

        let mut handled = 1;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Pump events until the view is stable
    pub fn wait_for_idle(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<IdleWait, ManagerError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_stable() {
                return Ok(IdleWait::Idle);
            }
            if cancel.is_cancelled() {
                log::debug!("Wait for idle cancelled");
                return Ok(IdleWait::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!("Sources still busy after {:?}", timeout);
                return Ok(IdleWait::TimedOut);
            }
            let slice = self.settings.idle_poll_interval.min(deadline - now);
            self.pump_events(slice)?;
        }
    }

    fn handle_event(&mut self, event: SourceEvent) -> Result<(), ManagerError> {
        match event {
            SourceEvent::Idle { source, generation } => {
                log::trace!("Source {} finished #{}", source, generation);
                let changed = self.slot_mut(source).and_then(|slot| {
                    let state = slot.reader.stats().state;
                    (state != slot.last_state).then(|| {
                        slot.last_state = state.clone();
                        state
                    })
                });
                if let Some(state) = changed {
                    self.emit(ManagerEvent::SourceStateChanged { source, state });
                }
                self.update()
            }
            SourceEvent::Grew {
                source,
                full_refresh,
            } => {
                if self.slot(source).is_none() {
                    return Ok(());
                }
                log::info!("Source {} changed (full refresh: {})", source, full_refresh);
                self.renavigate(full_refresh)
            }
        }
    }

    fn emit(&mut self, event: ManagerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn all_idle(&self) -> bool {
        self.sources.iter().all(|s| s.reader.is_idle())
    }

    fn slot(&self, id: SourceId) -> Option<&SourceSlot> {
        self.sources.iter().find(|s| s.reader.id() == id)
    }

    fn slot_mut(&mut self, id: SourceId) -> Option<&mut SourceSlot> {
        self.sources.iter_mut().find(|s| s.reader.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::just_after;
    use crate::testing::{VecProvider, at};
    use pretty_assertions::{assert_eq, assert_ne};
    use std::sync::atomic::AtomicBool;

    const WAIT: Duration = Duration::from_secs(5);

    fn manager() -> LogSourcesManager {
        LogSourcesManager::new(ReaderSettings {
            window_bytes: 100,
            tail_poll_interval: Duration::from_millis(10),
            idle_timeout: WAIT,
            idle_poll_interval: Duration::from_millis(5),
        })
    }

    /// 100 messages at 0, 10, ..., 990 with `time = position + offset`
    fn provider(offset: i64) -> Arc<VecProvider> {
        Arc::new(VecProvider::with_entries(
            (0..100).map(|i| (i * 10, i * 10 + offset)),
        ))
    }

    fn settle(manager: &mut LogSourcesManager) {
        let outcome = manager
            .wait_for_idle(WAIT, &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome, IdleWait::Idle);
    }

    fn merged_times(manager: &LogSourcesManager) -> Vec<i64> {
        let view = manager.merged_view();
        let locked = view.lock();
        locked
            .forward(0, locked.count())
            .map(|m| m.message.time.timestamp())
            .collect()
    }

    #[test]
    fn test_first_source_follows_tail() {
        let mut manager = manager();
        let events = manager.subscribe();
        manager.add_source("a", provider(0)).unwrap();
        settle(&mut manager);

        assert_eq!(
            merged_times(&manager),
            (90..100).map(|i| i * 10).collect::<Vec<_>>()
        );
        assert_eq!(
            manager.stable_range(),
            DateRange::new(just_after(at(890)), MessageTime::MAX_UTC)
        );
        assert_eq!(
            manager.last_user_command(),
            Some(NavigationCommand::follow_tail())
        );
        let updates: Vec<ManagerEvent> = events.try_iter().collect();
        assert!(updates.contains(&ManagerEvent::ViewUpdated(manager.stable_range())));
    }

    #[test]
    fn test_navigate_merges_sources_on_common_range() {
        let mut manager = manager();
        manager.add_source("a", provider(0)).unwrap();
        manager.add_source("b", provider(5)).unwrap();
        settle(&mut manager);

        manager.navigate_to(at(500), NavigateFlags::ALIGN_TOP).unwrap();
        settle(&mut manager);

        let stable = manager.stable_range();
        assert_eq!(stable, DateRange::new(just_after(at(495)), at(600)));
        let times = merged_times(&manager);
        assert_eq!(times.len(), 20);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert!(times.iter().all(|&t| stable.contains(at(t))));
    }

    #[test]
    fn test_sources_outside_target_are_classified() {
        let mut manager = manager();
        let a = manager.add_source("a", provider(0)).unwrap();
        let b = manager.add_source("b", provider(2_000)).unwrap();
        settle(&mut manager);

        manager.navigate_to(at(500), NavigateFlags::ALIGN_TOP).unwrap();
        settle(&mut manager);

        assert_eq!(manager.pivots(), vec![(a, Pivot::Over), (b, Pivot::Below)]);
        let times = merged_times(&manager);
        assert_eq!(times.first(), Some(&500));
        assert!(times.iter().all(|&t| t < 2_000));
    }

    #[test]
    fn test_target_past_every_source_loads_tails() {
        let mut manager = manager();
        manager.add_source("a", provider(0)).unwrap();
        manager.add_source("b", provider(2_000)).unwrap();
        settle(&mut manager);

        manager
            .navigate_to(at(10_000), NavigateFlags::ALIGN_BOTTOM)
            .unwrap();
        settle(&mut manager);

        assert!(manager.pivots().iter().all(|(_, p)| *p == Pivot::Over));
        assert_eq!(merged_times(&manager).last(), Some(&2_990));
    }

    #[test]
    fn test_shift_down_pages_to_the_end() {
        let mut manager = manager();
        manager.add_source("a", provider(0)).unwrap();
        settle(&mut manager);
        manager.navigate_to(at(0), NavigateFlags::ALIGN_TOP).unwrap();
        settle(&mut manager);
        assert_eq!(merged_times(&manager).first(), Some(&0));

        let mut last_first = 0;
        let mut pages = 0;
        loop {
            match manager.shift_down(WAIT).unwrap() {
                ShiftOutcome::Shifted => {
                    let first = merged_times(&manager)[0];
                    assert!(first > last_first, "no progress at {first}");
                    last_first = first;
                    pages += 1;
                }
                ShiftOutcome::AtBoundary => break,
                other => panic!("unexpected {other:?}"),
            }
            assert!(pages < 20);
        }
        assert_eq!(merged_times(&manager).last(), Some(&990));

        assert_eq!(manager.shift_up(WAIT).unwrap(), ShiftOutcome::Shifted);
        assert!(merged_times(&manager).last() < Some(&last_first));
    }

    #[test]
    fn test_shift_rejected_while_unstable() {
        let mut manager = manager();
        manager.add_source("a", provider(0)).unwrap();
        settle(&mut manager);

        manager.stable = false;
        assert_eq!(manager.shift_up(WAIT).unwrap(), ShiftOutcome::Rejected);
    }

    #[test]
    fn test_wait_for_idle_honours_cancellation() {
        let mut manager = manager();
        manager.add_source("a", provider(0)).unwrap();
        settle(&mut manager);

        manager.stable = false;
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            manager.wait_for_idle(WAIT, &token).unwrap(),
            IdleWait::Cancelled
        );

        let canceller = manager.shift_canceller();
        let shift_token = canceller.renew();
        canceller.cancel();
        assert!(shift_token.is_cancelled());
    }

    #[test]
    fn test_growth_replays_sticky_command() {
        let mut manager = manager();
        let provider = provider(0);
        manager.add_source("a", provider.clone()).unwrap();
        settle(&mut manager);

        provider.append(1_000, 1_000);
        let deadline = Instant::now() + WAIT;
        while merged_times(&manager).last() != Some(&1_000) {
            assert!(Instant::now() < deadline, "growth never showed up");
            manager.pump_events(Duration::from_millis(10)).unwrap();
        }
        settle(&mut manager);
    }

    #[test]
    fn test_growth_keeps_non_sticky_position() {
        let mut manager = manager();
        let provider = provider(0);
        let id = manager.add_source("a", provider.clone()).unwrap();
        settle(&mut manager);
        manager.navigate_to(at(500), NavigateFlags::ALIGN_TOP).unwrap();
        settle(&mut manager);

        provider.append(1_000, 1_000);
        let deadline = Instant::now() + WAIT;
        // growth issues a top-up instead of replaying the jump
        while manager.last_command == manager.last_user_command {
            assert!(Instant::now() < deadline, "growth never showed up");
            manager.pump_events(Duration::from_millis(10)).unwrap();
        }
        settle(&mut manager);

        assert_eq!(manager.source_stats(id).map(|s| s.available.end), Some(1_001));
        assert_eq!(merged_times(&manager).first(), Some(&500));
    }

    #[test]
    fn test_source_growing_into_stable_range_loads_its_tail() {
        let mut manager = manager();
        let early = provider(0);
        let a = manager.add_source("a", early.clone()).unwrap();
        let b = manager.add_source("b", provider(2_000)).unwrap();
        settle(&mut manager);

        manager.navigate_to(at(2_500), NavigateFlags::ALIGN_TOP).unwrap();
        settle(&mut manager);
        assert_eq!(manager.pivots(), vec![(a, Pivot::Above), (b, Pivot::Over)]);
        let stable = manager.stable_range();
        assert_eq!(stable, DateRange::new(just_after(at(2_490)), at(2_600)));

        // the reader notices the growth; its event is left unhandled so the
        // next update sees a source that now reaches into the stable range
        early.append(1_000, 2_550);
        let deadline = Instant::now() + WAIT;
        while manager
            .source_stats(a)
            .and_then(|s| s.available_time)
            .is_none_or(|t| t.end <= stable.begin)
        {
            assert!(Instant::now() < deadline, "growth never showed up");
            std::thread::sleep(Duration::from_millis(5));
        }

        manager.update().unwrap();
        assert!(!manager.is_stable());
        assert_eq!(manager.pivots(), vec![(a, Pivot::Over), (b, Pivot::Over)]);
        assert_eq!(manager.stable_range(), stable);

        settle(&mut manager);
        assert!(merged_times(&manager).contains(&2_550));
        assert!(merged_times(&manager).iter().all(|&t| t >= 2_490));
    }

    #[test]
    fn test_replaced_single_source_returns_to_default_command() {
        let mut manager = manager();
        let provider = provider(0);
        manager.add_source("a", provider.clone()).unwrap();
        settle(&mut manager);
        manager.navigate_to(at(500), NavigateFlags::ALIGN_TOP).unwrap();
        settle(&mut manager);
        assert_ne!(manager.last_user_command(), Some(NavigationCommand::default()));

        provider.replace((0..50).map(|i| (i * 10, 5_000 + i * 10)));
        let deadline = Instant::now() + WAIT;
        while manager.last_user_command() != Some(NavigationCommand::default()) {
            assert!(Instant::now() < deadline, "replacement never showed up");
            manager.pump_events(Duration::from_millis(10)).unwrap();
        }
        settle(&mut manager);

        assert_eq!(
            merged_times(&manager),
            (40..50).map(|i| 5_000 + i * 10).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_shift_cancelled_from_another_thread() {
        let mut manager = manager();
        let provider = provider(0);
        manager.add_source("a", provider.clone()).unwrap();
        settle(&mut manager);
        manager.navigate_to(at(0), NavigateFlags::ALIGN_TOP).unwrap();
        settle(&mut manager);

        provider.set_read_delay(Duration::from_millis(100));
        let canceller = manager.shift_canceller();
        let done = AtomicBool::new(false);
        let outcome = std::thread::scope(|scope| {
            scope.spawn(|| {
                // cancels before the shift starts only hit the previous token
                while !done.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(20));
                    canceller.cancel();
                }
            });
            let outcome = manager.shift_down(WAIT).unwrap();
            done.store(true, Ordering::SeqCst);
            outcome
        });
        assert_eq!(outcome, ShiftOutcome::Cancelled);
        assert!(!manager.is_stable());

        provider.set_read_delay(Duration::ZERO);
        settle(&mut manager);
        assert!(merged_times(&manager).first() > Some(&0));
    }

    #[test]
    fn test_sparse_source_keeps_messages_inside_stable_range() {
        let mut manager = manager();
        // 5000 byte messages, more than a backward message search covers
        let sparse = Arc::new(VecProvider::with_entries(
            (0..100).map(|i| (i * 5_000, i * 10)),
        ));
        let a = manager.add_source("a", sparse).unwrap();
        let b = manager.add_source("b", provider(0)).unwrap();
        settle(&mut manager);
        assert_eq!(
            manager.source_stats(a).and_then(|s| s.available_time),
            Some(DateRange::inclusive(at(0), at(990)))
        );

        manager.navigate_to(at(500), NavigateFlags::ALIGN_BOTTOM).unwrap();
        settle(&mut manager);

        assert_eq!(manager.pivots(), vec![(a, Pivot::Over), (b, Pivot::Over)]);
        let stable = manager.stable_range();
        assert_eq!(stable, DateRange::new(at(500), at(510)));

        let view = manager.merged_view();
        let locked = view.lock();
        let shown: Vec<(SourceId, i64)> = locked
            .forward(0, locked.count())
            .map(|m| (m.source, m.message.time.timestamp()))
            .collect();
        assert_eq!(shown.len(), 2);
        assert!(shown.contains(&(a, 500)));
        assert!(shown.contains(&(b, 500)));
    }

    #[test]
    fn test_load_error_reported_to_subscribers() {
        let mut manager = manager();
        let events = manager.subscribe();
        let broken = Arc::new(VecProvider::with_entries([(0, 10), (10, 5), (20, 20)]));
        let id = manager.add_source("broken", broken).unwrap();
        settle(&mut manager);

        let changes: Vec<ManagerEvent> = events.try_iter().collect();
        assert!(changes.iter().any(|e| matches!(
            e,
            ManagerEvent::SourceStateChanged { source, state: LoadState::LoadError(_) } if *source == id
        )));
    }

    #[test]
    fn test_remove_and_hide_sources() {
        let mut manager = manager();
        let a = manager.add_source("a", provider(0)).unwrap();
        let b = manager.add_source("b", provider(5)).unwrap();
        settle(&mut manager);

        manager.set_visible(b, false).unwrap();
        assert!(merged_times(&manager).iter().all(|t| t % 10 == 0));

        manager.remove_source(b).unwrap();
        assert_eq!(manager.source_ids(), vec![a]);
        assert!(matches!(
            manager.remove_source(b),
            Err(ManagerError::UnknownSource(_))
        ));
        settle(&mut manager);
        assert_eq!(manager.source_name(a), Some("a"));
    }

    #[test]
    fn test_date_origin_requires_date() {
        let mut manager = manager();
        manager.add_source("a", provider(0)).unwrap();
        settle(&mut manager);

        let command = NavigationCommand::new(None, NavigateFlags::ORIGIN_DATE);
        assert!(matches!(
            manager.navigate(command),
            Err(ManagerError::MissingDate)
        ));
    }
}
