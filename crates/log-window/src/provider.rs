//! Contract between the engine and whatever turns bytes into messages
//!
//! A provider exposes a byte-position span `[begin_position, end_position)` and
//! creates parsers over it. Parsers must cope with a start position in the
//! middle of a message by skipping forward to the next message boundary.

use crate::error::ProviderError;
use crate::message::Message;
use std::ops::Range;

/// Where a parser starts and where it must stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserParams {
    /// First byte to look at; need not be a message boundary
    pub start_position: i64,

    /// When set, only messages starting inside this span are returned
    pub range: Option<Range<i64>>,
}

impl ParserParams {
    /// Parse from `start_position` to the end of the stream
    pub fn from(start_position: i64) -> Self {
        Self {
            start_position,
            range: None,
        }
    }

    /// Parse from `start_position`, stopping before `range.end`
    pub fn bounded(start_position: i64, range: Range<i64>) -> Self {
        Self {
            start_position,
            range: Some(range),
        }
    }
}

/// Result of re-checking a provider's bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsUpdate {
    NothingUpdated,
    /// The stream grew; everything loaded so far is still valid
    NewMessagesAvailable,
    /// The stream was truncated or replaced; loaded messages must be dropped
    OldMessagesInvalidated,
}

/// A forward cursor over messages
pub trait MessagesParser {
    /// Next message, or `None` at the end of the stream or of the requested range
    fn read_next(&mut self) -> Result<Option<Message>, ProviderError>;
}

/// A source of positioned messages (one log file, one stream)
pub trait PositionedMessagesProvider: Send + Sync {
    /// Position of the first message
    fn begin_position(&self) -> i64;

    /// One past the last byte of the last message
    fn end_position(&self) -> i64;

    /// Re-read the underlying stream's extent.
    ///
    /// `incremental` asks the provider to assume unchanged data before the old
    /// end and only look for growth.
    fn update_available_bounds(&self, incremental: bool) -> Result<BoundsUpdate, ProviderError>;

    fn create_parser(
        &self,
        params: ParserParams,
    ) -> Result<Box<dyn MessagesParser + '_>, ProviderError>;
}
