//! Message and date range types shared by every part of the engine

use chrono::{DateTime, TimeDelta, Utc};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

/// Timestamp of a log message
pub type MessageTime = DateTime<Utc>;

/// Shared reference to a parsed message.
///
/// Ranges hand out `Arc`s so consumers can hold on to a message after the
/// window that loaded it has been paged out.
pub type MessageRef = Arc<Message>;

/// Message severity as recognised by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

/// A single parsed log message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Byte offset of the first byte of the message; the ordering key within a source
    pub position: i64,

    /// Byte offset one past the last byte of the message
    pub end_position: i64,

    /// Message timestamp, used for cross-source ordering and date search
    pub time: MessageTime,

    /// Severity extracted from the message header
    pub severity: Severity,

    /// Thread or component name, if the format carries one
    pub thread: Option<String>,

    /// Message body, continuation lines included
    pub text: String,
}

impl Message {
    /// Create a message with default severity and no thread
    pub fn new(position: i64, end_position: i64, time: MessageTime, text: impl Into<String>) -> Self {
        Self {
            position,
            end_position,
            time,
            severity: Severity::default(),
            thread: None,
            text: text.into(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = Some(thread.into());
        self
    }

    /// Hash of the message content.
    ///
    /// Two reads of the same position produce equal hashes unless the bytes
    /// changed in between (e.g. a partially written last line got completed).
    pub fn content_hash(&self, ignore_time: bool) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.end_position.hash(&mut hasher);
        self.severity.hash(&mut hasher);
        self.thread.hash(&mut hasher);
        self.text.hash(&mut hasher);
        if !ignore_time {
            self.time.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Half-open date interval `[begin, end)`.
///
/// `MIN_UTC` / `MAX_UTC` stand for "no bound" on the respective side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub begin: MessageTime,
    pub end: MessageTime,
}

impl DateRange {
    /// Create a range; an inverted range collapses to an empty one at `begin`
    pub fn new(begin: MessageTime, end: MessageTime) -> Self {
        Self {
            begin,
            end: end.max(begin),
        }
    }

    /// Range without bounds on either side
    pub fn unbounded() -> Self {
        Self {
            begin: MessageTime::MIN_UTC,
            end: MessageTime::MAX_UTC,
        }
    }

    /// Range covering `first..=last`
    pub fn inclusive(first: MessageTime, last: MessageTime) -> Self {
        Self::new(first, just_after(last))
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn contains(&self, time: MessageTime) -> bool {
        time >= self.begin && time < self.end
    }

    pub fn has_begin(&self) -> bool {
        self.begin != MessageTime::MIN_UTC
    }

    pub fn has_end(&self) -> bool {
        self.end != MessageTime::MAX_UTC
    }

    /// Common part of two ranges (empty if they do not overlap)
    pub fn intersect(&self, other: &DateRange) -> DateRange {
        DateRange::new(self.begin.max(other.begin), self.end.min(other.end))
    }
}

/// Smallest representable time strictly after `time`
pub fn just_after(time: MessageTime) -> MessageTime {
    time.checked_add_signed(TimeDelta::nanoseconds(1))
        .unwrap_or(MessageTime::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> MessageTime {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_content_hash_tracks_text_changes() {
        let partial = Message::new(10, 20, at(1), "half a li");
        let complete = Message::new(10, 20, at(1), "half a line");
        assert_ne!(partial.content_hash(false), complete.content_hash(false));
        assert_eq!(complete.content_hash(false), complete.clone().content_hash(false));
    }

    #[test]
    fn test_content_hash_can_ignore_time() {
        let a = Message::new(10, 20, at(1), "same");
        let b = Message::new(10, 20, at(2), "same");
        assert_ne!(a.content_hash(false), b.content_hash(false));
        assert_eq!(a.content_hash(true), b.content_hash(true));
    }

    #[test]
    fn test_date_range_intersection() {
        let a = DateRange::new(at(0), at(10));
        let b = DateRange::new(at(5), at(20));
        assert_eq!(a.intersect(&b), DateRange::new(at(5), at(10)));

        let disjoint = DateRange::new(at(30), at(40));
        assert!(a.intersect(&disjoint).is_empty());

        let unbounded = DateRange::unbounded();
        assert!(!unbounded.has_begin());
        assert!(!unbounded.has_end());
        assert_eq!(unbounded.intersect(&a), a);
    }

    #[test]
    fn test_inclusive_range_contains_last() {
        let range = DateRange::inclusive(at(1), at(3));
        assert!(range.contains(at(1)));
        assert!(range.contains(at(3)));
        assert!(!range.contains(at(4)));
    }
}
