//! A contiguous, partially loaded run of messages for one desired byte interval

use crate::block::Block;
use crate::error::WindowError;
use crate::file_range::FileRange;
use crate::message::MessageRef;
use std::collections::VecDeque;

/// What [`Range::add`] did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored as the new last message
    Appended,
    /// Same position as the last message but different content; replaced it
    Replaced,
    /// Same position and same content hash; the stored reference was kept
    Unchanged,
    /// Positioned before the last read message (stale re-read) or outside the range
    Ignored,
}

/// Messages loaded for one desirable byte interval.
///
/// Loaded data is always a prefix of the desirable interval: messages are
/// read from `begin` forward, so everything between `begin` and the last
/// stored message is present. `is_complete` becomes true once the read
/// reached `end`.
#[derive(Debug, Clone)]
pub struct Range {
    desired: FileRange,
    blocks: VecDeque<Block>,
    count: usize,
    complete: bool,
    open: bool,
}

impl Range {
    pub(crate) fn new(desired: FileRange) -> Self {
        Self {
            desired,
            blocks: VecDeque::new(),
            count: 0,
            complete: false,
            open: false,
        }
    }

    pub fn desired_range(&self) -> FileRange {
        self.desired
    }

    pub fn begin(&self) -> i64 {
        self.desired.begin
    }

    pub fn end(&self) -> i64 {
        self.desired.end
    }

    pub fn priority(&self) -> i32 {
        self.desired.priority
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of loaded messages
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn blocks(&self) -> &VecDeque<Block> {
        &self.blocks
    }

    pub fn first_message(&self) -> Option<&MessageRef> {
        self.blocks.front().and_then(Block::first)
    }

    pub fn last_message(&self) -> Option<&MessageRef> {
        self.blocks.back().and_then(Block::last)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MessageRef> {
        self.blocks.iter().flat_map(Block::iter)
    }

    /// Where a reader should resume filling this range.
    ///
    /// The last stored message is re-read so that a partially written line
    /// that has been completed since replaces its truncated copy.
    pub fn resume_position(&self) -> i64 {
        self.last_message()
            .map(|m| m.position)
            .unwrap_or(self.desired.begin)
    }

    pub(crate) fn set_priority(&mut self, priority: i32) {
        self.desired.priority = priority;
    }

    pub(crate) fn open(&mut self) {
        self.open = true;
    }

    pub(crate) fn close(&mut self) {
        self.open = false;
    }

    pub(crate) fn set_complete(&mut self) {
        self.complete = true;
    }

    /// Forget every loaded message; the range has to be read again
    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
        self.count = 0;
        self.complete = false;
    }

    /// Add a freshly read message to this (open) range
    pub fn add(
        &mut self,
        message: MessageRef,
        ignore_time_in_hash: bool,
    ) -> Result<AddOutcome, WindowError> {
        if !self.open {
            return Err(WindowError::NoOpenRange);
        }
        if self.complete {
            return Err(WindowError::RangeComplete {
                begin: self.desired.begin,
                end: self.desired.end,
            });
        }
        if message.position < self.desired.begin || message.position >= self.desired.end {
            return Ok(AddOutcome::Ignored);
        }

        let Some(last) = self.last_message() else {
            self.append(message);
            return Ok(AddOutcome::Appended);
        };

        if message.position < last.position {
            return Ok(AddOutcome::Ignored);
        }

        if message.position == last.position {
            if last.content_hash(ignore_time_in_hash) == message.content_hash(ignore_time_in_hash) {
                return Ok(AddOutcome::Unchanged);
            }
            if let Some(previous) = self.message_before_last() {
                if message.time < previous.time {
                    return Err(WindowError::TimeConstraintViolated {
                        position: message.position,
                        time: message.time,
                        previous: previous.time,
                    });
                }
            }
            if let Some(block) = self.blocks.back_mut() {
                block.replace_last(message);
            }
            return Ok(AddOutcome::Replaced);
        }

        if message.time < last.time {
            return Err(WindowError::TimeConstraintViolated {
                position: message.position,
                time: message.time,
                previous: last.time,
            });
        }

        self.append(message);
        Ok(AddOutcome::Appended)
    }

    /// Move the desirable begin to `position`, discarding messages before it
    pub fn trim_left(&mut self, position: i64) -> Result<(), WindowError> {
        if self.open {
            return Err(WindowError::RangeIsOpen);
        }
        if position <= self.desired.begin {
            return Ok(());
        }
        let position = position.min(self.desired.end);

        while let Some(front) = self.blocks.front_mut() {
            let whole_block_before = front.last().is_some_and(|m| m.position < position);
            if whole_block_before {
                self.count -= front.len();
                self.blocks.pop_front();
                continue;
            }
            self.count -= front.drop_before(position);
            break;
        }

        self.desired.begin = position;
        Ok(())
    }

    /// Move the desirable end to `position`, discarding messages at or after it.
    ///
    /// If anything was discarded the remaining prefix is known to reach the
    /// new end, so the range becomes complete.
    pub fn trim_right(&mut self, position: i64) -> Result<(), WindowError> {
        if self.open {
            return Err(WindowError::RangeIsOpen);
        }
        if position >= self.desired.end {
            return Ok(());
        }
        let position = position.max(self.desired.begin);

        let mut dropped = 0;
        while let Some(back) = self.blocks.back_mut() {
            let whole_block_after = back.first().is_some_and(|m| m.position >= position);
            if whole_block_after {
                dropped += back.len();
                self.blocks.pop_back();
                continue;
            }
            dropped += back.drop_from(position);
            break;
        }

        self.count -= dropped;
        self.desired.end = position;
        if dropped > 0 {
            self.complete = true;
        }
        Ok(())
    }

    /// Append `next` (which must start where this range ends) to this range
    pub(crate) fn absorb(&mut self, next: Range) {
        debug_assert_eq!(self.desired.end, next.desired.begin);
        debug_assert!(self.complete || next.count == 0);

        self.desired.end = next.desired.end;
        self.complete = self.complete && next.complete;
        self.count += next.count;
        self.blocks.extend(next.blocks);
    }

    fn append(&mut self, message: MessageRef) {
        match self.blocks.back_mut() {
            Some(block) if !block.is_full() => block.push(message),
            _ => {
                let mut block = Block::new();
                block.push(message);
                self.blocks.push_back(block);
            }
        }
        self.count += 1;
    }

    fn message_before_last(&self) -> Option<&MessageRef> {
        let back = self.blocks.back()?;
        if back.len() >= 2 {
            back.get(back.len() - 2)
        } else {
            self.blocks
                .len()
                .checked_sub(2)
                .and_then(|i| self.blocks.get(i))
                .and_then(Block::last)
        }
    }
}
