//! Per-source message window: an ordered list of ranges paged in and out by priority
//!
//! The window keeps only the messages that fall into the byte interval the
//! coordinator currently wants. Moving that interval trims or evicts existing
//! ranges and creates empty ones for uncovered parts; a reader then asks for the
//! next range to fill, fills it and closes it again. Reshaping and filling are
//! mutually exclusive: at most one range is open and `set_active_range` refuses
//! to run while it is.

use crate::concat;
use crate::error::WindowError;
use crate::file_range::{FileRange, RelativePosition};
use crate::message::{MessageRef, MessageTime};
use crate::range::{AddOutcome, Range};

/// Priority assigned by [`Messages::set_active_range`]
pub const DEFAULT_PRIORITY: i32 = 1;

/// A range handed out to a reader by [`Messages::get_next_range_to_fill`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTask {
    pub begin: i64,
    pub end: i64,
    pub priority: i32,
    /// Position to start parsing from
    pub resume_from: i64,
}

/// Loaded window of one log source
#[derive(Debug, Clone, Default)]
pub struct Messages {
    ranges: Vec<Range>,
    open: Option<usize>,
}

impl Messages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Number of loaded messages across all ranges
    pub fn count(&self) -> usize {
        self.ranges.iter().map(Range::count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn has_open_range(&self) -> bool {
        self.open.is_some()
    }

    /// Union of all desirable ranges, `None` when nothing is wanted
    pub fn desired_range(&self) -> Option<FileRange> {
        let first = self.ranges.first()?;
        let last = self.ranges.last()?;
        Some(FileRange::new(first.begin(), last.end(), first.priority()))
    }

    /// True when every range has been read to its end
    pub fn is_complete(&self) -> bool {
        self.ranges.iter().all(Range::is_complete)
    }

    pub fn first_message(&self) -> Option<&MessageRef> {
        self.ranges.iter().find_map(Range::first_message)
    }

    pub fn last_message(&self) -> Option<&MessageRef> {
        self.ranges.iter().rev().find_map(Range::last_message)
    }

    /// Messages with indices in `[begin, end)`, ascending
    pub fn forward(
        &self,
        begin: usize,
        end: usize,
    ) -> impl Iterator<Item = (usize, &MessageRef)> + '_ {
        concat::forward(&self.ranges, begin, end)
    }

    /// Messages with indices in `[begin, end)`, descending
    pub fn reverse(
        &self,
        begin: usize,
        end: usize,
    ) -> impl Iterator<Item = (usize, &MessageRef)> + '_ {
        concat::reverse(&self.ranges, begin, end)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MessageRef> {
        self.ranges.iter().flat_map(Range::iter)
    }

    /// Position of the first loaded message whose time is at or after `time`
    pub fn position_of_first_at_or_after(&self, time: MessageTime) -> Option<i64> {
        self.iter().find(|m| m.time >= time).map(|m| m.position)
    }

    /// Reshape the desired window to `[p1, p2)` at [`DEFAULT_PRIORITY`]
    pub fn set_active_range(&mut self, p1: i64, p2: i64) -> Result<bool, WindowError> {
        self.set_active_range_with_priority(FileRange::new(p1, p2, DEFAULT_PRIORITY))
    }

    /// Reshape the desired window.
    ///
    /// Ranges outside `desired` are evicted, overlapping ones are trimmed to it
    /// (keeping what was already loaded) and take over its priority, and
    /// uncovered parts become new empty ranges. Returns whether any range was
    /// added, dropped, resized or reprioritised.
    pub fn set_active_range_with_priority(
        &mut self,
        desired: FileRange,
    ) -> Result<bool, WindowError> {
        if self.open.is_some() {
            return Err(WindowError::RangeIsOpen);
        }

        let mut changed = false;
        let mut pending = (!desired.is_empty()).then_some(desired);
        let mut reshaped = Vec::with_capacity(self.ranges.len() + 2);

        for mut range in self.ranges.drain(..) {
            let Some(want) = pending else {
                // everything past the new window goes
                changed = true;
                continue;
            };

            let x = FileRange::intersect(&want, &range.desired_range());
            match x.relative_position {
                RelativePosition::Before => {
                    changed = true;
                    reshaped.push(Range::new(want));
                    pending = None;
                }
                RelativePosition::After => {
                    changed = true;
                }
                RelativePosition::Overlap => {
                    if range.priority() != want.priority {
                        range.set_priority(want.priority);
                        changed = true;
                    }
                    if let Some(left) = x.leftover1_left {
                        reshaped.push(Range::new(left));
                        changed = true;
                    }
                    if let (Some(common), Some(_)) = (x.common, x.leftover2_left) {
                        range.trim_left(common.begin)?;
                        changed = true;
                    }
                    if let (Some(common), Some(_)) = (x.common, x.leftover2_right) {
                        range.trim_right(common.end)?;
                        changed = true;
                    }
                    reshaped.push(range);
                    pending = x.leftover1_right;
                }
            }
        }

        if let Some(rest) = pending {
            reshaped.push(Range::new(rest));
            changed = true;
        }

        self.ranges = reshaped;
        self.merge_adjacent();
        Ok(changed)
    }

    /// Open the highest-priority incomplete range (leftmost on ties)
    pub fn get_next_range_to_fill(&mut self) -> Result<Option<FillTask>, WindowError> {
        if self.open.is_some() {
            return Err(WindowError::RangeIsOpen);
        }

        let next = self
            .ranges
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_complete())
            .max_by(|(ia, a), (ib, b)| a.priority().cmp(&b.priority()).then(ib.cmp(ia)))
            .map(|(i, _)| i);

        let Some(index) = next else {
            return Ok(None);
        };

        let range = &mut self.ranges[index];
        range.open();
        self.open = Some(index);
        Ok(Some(FillTask {
            begin: range.begin(),
            end: range.end(),
            priority: range.priority(),
            resume_from: range.resume_position(),
        }))
    }

    /// Add a message to the open range
    pub fn add(
        &mut self,
        message: MessageRef,
        ignore_time_in_hash: bool,
    ) -> Result<AddOutcome, WindowError> {
        self.open_range_mut()?.add(message, ignore_time_in_hash)
    }

    /// Mark the open range as read up to its end
    pub fn complete_open_range(&mut self) -> Result<(), WindowError> {
        self.open_range_mut()?.set_complete();
        Ok(())
    }

    /// Close the open range.
    ///
    /// A range that reached completion may now touch a neighbour it can be
    /// coalesced with; that happens here.
    pub fn close_open_range(&mut self) -> Result<(), WindowError> {
        self.open_range_mut()?.close();
        self.open = None;
        self.merge_adjacent();
        Ok(())
    }

    /// Drop whatever the open range loaded and close it as complete.
    ///
    /// Used when a read pass fails with an ordering violation: re-reading
    /// would hit the same data again.
    pub fn abandon_open_range(&mut self) -> Result<(), WindowError> {
        let range = self.open_range_mut()?;
        range.clear();
        range.set_complete();
        range.close();
        self.open = None;
        self.merge_adjacent();
        Ok(())
    }

    /// Forget every range (the underlying stream was replaced)
    pub fn reset(&mut self) -> Result<(), WindowError> {
        if self.open.is_some() {
            return Err(WindowError::RangeIsOpen);
        }
        self.ranges.clear();
        Ok(())
    }

    fn open_range_mut(&mut self) -> Result<&mut Range, WindowError> {
        let index = self.open.ok_or(WindowError::NoOpenRange)?;
        self.ranges.get_mut(index).ok_or(WindowError::NoOpenRange)
    }

    /// Drop zero-length ranges and coalesce neighbours of equal priority.
    ///
    /// Two ranges merge only when the result still has a loaded prefix: the
    /// left one is complete, or the right one has nothing loaded.
    fn merge_adjacent(&mut self) {
        debug_assert!(self.open.is_none());

        let mut merged: Vec<Range> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            if range.desired_range().is_empty() {
                continue;
            }
            if let Some(prev) = merged.last_mut() {
                let mergeable = prev.priority() == range.priority()
                    && prev.end() == range.begin()
                    && (prev.is_complete() || range.count() == 0);
                if mergeable {
                    prev.absorb(range);
                    continue;
                }
            }
            merged.push(range);
        }
        self.ranges = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use chrono::DateTime;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn msg(position: i64) -> MessageRef {
        let time = DateTime::from_timestamp(position, 0).unwrap();
        Arc::new(Message::new(position, position + 1, time, format!("m{position}")))
    }

    /// Fill every incomplete range with one message every `step` bytes
    fn fill_all(messages: &mut Messages, step: i64) -> usize {
        let mut reads = 0;
        while let Some(task) = messages.get_next_range_to_fill().unwrap() {
            let mut p = task.resume_from;
            while p < task.end {
                messages.add(msg(p), false).unwrap();
                reads += 1;
                p += step;
            }
            messages.complete_open_range().unwrap();
            messages.close_open_range().unwrap();
        }
        reads
    }

    fn desired(messages: &Messages) -> Vec<(i64, i64)> {
        messages
            .ranges()
            .iter()
            .map(|r| (r.begin(), r.end()))
            .collect()
    }

    fn positions(messages: &Messages) -> Vec<i64> {
        messages.iter().map(|m| m.position).collect()
    }

    fn assert_contiguous(messages: &Messages, p1: i64, p2: i64) {
        let ranges = desired(messages);
        assert_eq!(ranges.first().map(|r| r.0), Some(p1));
        assert_eq!(ranges.last().map(|r| r.1), Some(p2));
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1, pair[1].0, "gap or overlap in {:?}", ranges);
        }
    }

    #[test]
    fn test_set_active_range_on_empty_window() {
        let mut messages = Messages::new();
        assert!(messages.set_active_range(0, 100).unwrap());
        assert_eq!(desired(&messages), vec![(0, 100)]);
        assert!(!messages.is_complete());
    }

    #[test]
    fn test_fill_then_same_range_is_noop() {
        let mut messages = Messages::new();
        messages.set_active_range(0, 100).unwrap();
        fill_all(&mut messages, 10);

        assert!(messages.is_complete());
        assert!(!messages.set_active_range(0, 100).unwrap());
        assert_eq!(positions(&messages), (0..100).step_by(10).collect::<Vec<_>>());
    }

    #[test]
    fn test_window_containment_after_moving() {
        let mut messages = Messages::new();
        messages.set_active_range(100, 200).unwrap();
        fill_all(&mut messages, 10);

        for (p1, p2) in [(150, 300), (50, 120), (0, 400), (390, 395), (1000, 1100)] {
            messages.set_active_range(p1, p2).unwrap();
            assert_contiguous(&messages, p1, p2);
            fill_all(&mut messages, 5);
            assert_contiguous(&messages, p1, p2);
        }
    }

    #[test]
    fn test_partial_overlap_trims_instead_of_rereading() {
        let mut messages = Messages::new();
        messages.set_active_range(0, 100).unwrap();
        fill_all(&mut messages, 10);
        let kept = messages.iter().find(|m| m.position == 50).cloned().unwrap();

        assert!(messages.set_active_range(50, 150).unwrap());
        assert_eq!(desired(&messages), vec![(50, 150)]);

        // only the new part is read; resume starts at the last loaded message
        let task = messages.get_next_range_to_fill().unwrap().unwrap();
        assert_eq!(task.resume_from, 90);
        messages.close_open_range().unwrap();

        let reads = fill_all(&mut messages, 10);
        assert_eq!(reads, 6); // 90 re-read once, then 100..=140
        let still_there = messages.iter().find(|m| m.position == 50).unwrap();
        assert!(Arc::ptr_eq(&kept, still_there));
        assert_eq!(positions(&messages), (50..150).step_by(10).collect::<Vec<_>>());
    }

    #[test]
    fn test_moving_left_creates_leading_range() {
        let mut messages = Messages::new();
        messages.set_active_range(100, 200).unwrap();
        fill_all(&mut messages, 10);

        messages.set_active_range(50, 150).unwrap();
        assert_eq!(desired(&messages), vec![(50, 100), (100, 150)]);

        let task = messages.get_next_range_to_fill().unwrap().unwrap();
        assert_eq!((task.begin, task.end), (50, 100));
        messages.close_open_range().unwrap();
        fill_all(&mut messages, 10);

        // once the leading range is complete both coalesce
        assert_eq!(desired(&messages), vec![(50, 150)]);
        assert_eq!(positions(&messages), (50..150).step_by(10).collect::<Vec<_>>());
    }

    #[test]
    fn test_disjoint_move_evicts_everything() {
        let mut messages = Messages::new();
        messages.set_active_range(0, 100).unwrap();
        fill_all(&mut messages, 10);

        messages.set_active_range(500, 600).unwrap();
        assert_eq!(desired(&messages), vec![(500, 600)]);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_empty_active_range_clears_window() {
        let mut messages = Messages::new();
        messages.set_active_range(0, 100).unwrap();
        assert!(messages.set_active_range(40, 40).unwrap());
        assert!(messages.ranges().is_empty());
        assert_eq!(messages.desired_range(), None);
    }

    #[test]
    fn test_reprioritising_counts_as_change() {
        let mut m = Messages::new();
        m.set_active_range(0, 100).unwrap();
        fill_all(&mut m, 10);

        assert!(m
            .set_active_range_with_priority(FileRange::new(0, 100, DEFAULT_PRIORITY + 1))
            .unwrap());
        assert_eq!(m.ranges()[0].priority(), DEFAULT_PRIORITY + 1);
        assert_eq!(positions(&m).len(), 10);
        assert!(!m
            .set_active_range_with_priority(FileRange::new(0, 100, DEFAULT_PRIORITY + 1))
            .unwrap());
    }

    #[test]
    fn test_only_one_range_open() {
        let mut messages = Messages::new();
        messages.set_active_range(0, 100).unwrap();
        messages.get_next_range_to_fill().unwrap();

        assert_eq!(
            messages.get_next_range_to_fill(),
            Err(WindowError::RangeIsOpen)
        );
        assert_eq!(messages.set_active_range(0, 50), Err(WindowError::RangeIsOpen));
        assert_eq!(messages.reset(), Err(WindowError::RangeIsOpen));
    }

    #[test]
    fn test_highest_priority_range_filled_first() {
        let mut messages = Messages::new();
        messages.set_active_range(0, 100).unwrap();
        messages
            .set_active_range_with_priority(FileRange::new(0, 200, 5))
            .unwrap();

        // the existing part took over the new priority; ties go left
        let task = messages.get_next_range_to_fill().unwrap().unwrap();
        assert_eq!((task.begin, task.priority), (0, 5));
    }

    #[test]
    fn test_add_without_open_range_fails() {
        let mut messages = Messages::new();
        messages.set_active_range(0, 100).unwrap();
        assert_eq!(messages.add(msg(1), false), Err(WindowError::NoOpenRange));
        assert_eq!(messages.complete_open_range(), Err(WindowError::NoOpenRange));
    }

    #[test]
    fn test_abandon_discards_loaded_messages() {
        let mut messages = Messages::new();
        messages.set_active_range(0, 100).unwrap();
        messages.get_next_range_to_fill().unwrap();
        messages.add(msg(10), false).unwrap();

        messages.abandon_open_range().unwrap();
        assert!(messages.is_empty());
        assert!(messages.is_complete());
        assert!(!messages.has_open_range());
        assert_eq!(messages.get_next_range_to_fill(), Ok(None));
    }

    #[test]
    fn test_indexed_iteration_and_time_lookup() {
        let mut messages = Messages::new();
        messages.set_active_range(0, 1000).unwrap();
        fill_all(&mut messages, 1);

        let window: Vec<i64> = messages.forward(300, 303).map(|(_, m)| m.position).collect();
        assert_eq!(window, vec![300, 301, 302]);
        let back: Vec<usize> = messages.reverse(997, 1000).map(|(i, _)| i).collect();
        assert_eq!(back, vec![999, 998, 997]);

        let t = DateTime::from_timestamp(500, 0).unwrap();
        assert_eq!(messages.position_of_first_at_or_after(t), Some(500));
    }
}
