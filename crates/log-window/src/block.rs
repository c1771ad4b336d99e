//! Fixed-capacity message blocks, the storage unit inside a range

use crate::message::MessageRef;

/// Number of messages a block holds before a new one is started
pub const BLOCK_CAPACITY: usize = 256;

/// An ordered run of at most [`BLOCK_CAPACITY`] messages.
///
/// Only the last block of an open range ever grows; a range never keeps an
/// empty block around.
#[derive(Debug, Clone)]
pub struct Block {
    messages: Vec<MessageRef>,
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

impl Block {
    pub fn new() -> Self {
        Self {
            messages: Vec::with_capacity(BLOCK_CAPACITY),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= BLOCK_CAPACITY
    }

    pub fn get(&self, index: usize) -> Option<&MessageRef> {
        self.messages.get(index)
    }

    pub fn first(&self) -> Option<&MessageRef> {
        self.messages.first()
    }

    pub fn last(&self) -> Option<&MessageRef> {
        self.messages.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MessageRef> {
        self.messages.iter()
    }

    pub(crate) fn push(&mut self, message: MessageRef) {
        debug_assert!(!self.is_full(), "push into a full block");
        self.messages.push(message);
    }

    /// Replace the last message, returning the previous one
    pub(crate) fn replace_last(&mut self, message: MessageRef) -> Option<MessageRef> {
        self.messages
            .last_mut()
            .map(|slot| std::mem::replace(slot, message))
    }

    /// Drop messages positioned before `position`; returns how many were dropped
    pub(crate) fn drop_before(&mut self, position: i64) -> usize {
        let cut = self.messages.partition_point(|m| m.position < position);
        self.messages.drain(..cut);
        cut
    }

    /// Drop messages positioned at or after `position`; returns how many were dropped
    pub(crate) fn drop_from(&mut self, position: i64) -> usize {
        let keep = self.messages.partition_point(|m| m.position < position);
        let dropped = self.messages.len() - keep;
        self.messages.truncate(keep);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use chrono::DateTime;
    use std::sync::Arc;

    fn msg(position: i64) -> MessageRef {
        let time = DateTime::from_timestamp(position, 0).unwrap();
        Arc::new(Message::new(position, position + 1, time, format!("m{position}")))
    }

    #[test]
    fn test_trim_both_ends() {
        let mut block = Block::new();
        for p in [0, 4, 5, 6, 10] {
            block.push(msg(p));
        }

        assert_eq!(block.drop_before(5), 2);
        assert_eq!(block.first().map(|m| m.position), Some(5));

        assert_eq!(block.drop_from(10), 1);
        assert_eq!(block.last().map(|m| m.position), Some(6));
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn test_full_block() {
        let mut block = Block::new();
        for p in 0..BLOCK_CAPACITY as i64 {
            block.push(msg(p));
        }
        assert!(block.is_full());
    }
}
