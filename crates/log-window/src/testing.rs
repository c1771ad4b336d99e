//! In-memory provider used by the engine's tests

use crate::error::ProviderError;
use crate::message::{Message, MessageTime};
use crate::provider::{BoundsUpdate, MessagesParser, ParserParams, PositionedMessagesProvider};
use chrono::DateTime;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

pub fn at(secs: i64) -> MessageTime {
    DateTime::from_timestamp(secs, 0).unwrap()
}

#[derive(Debug, Default)]
struct State {
    /// (position, time in seconds), ordered by position
    all: Vec<(i64, i64)>,
    /// Number of entries visible through the provider
    published: usize,
    truncated: bool,
    fail_reads: usize,
    read_delay: Duration,
}

/// Messages at fixed positions; message `i` spans up to message `i + 1`.
///
/// Appended entries stay invisible until `update_available_bounds` is called,
/// like a file that grew since it was last stat'ed.
#[derive(Debug, Default)]
pub struct VecProvider {
    state: Mutex<State>,
    parses: AtomicUsize,
}

impl VecProvider {
    /// Message at every position with `time = position` seconds
    pub fn with_positions(positions: &[i64]) -> Self {
        Self::with_entries(positions.iter().map(|&p| (p, p)))
    }

    pub fn with_entries(entries: impl IntoIterator<Item = (i64, i64)>) -> Self {
        let all: Vec<_> = entries.into_iter().collect();
        let published = all.len();
        Self {
            state: Mutex::new(State {
                all,
                published,
                ..State::default()
            }),
            parses: AtomicUsize::new(0),
        }
    }

    /// Queue a message; it becomes visible on the next bounds update
    pub fn append(&self, position: i64, secs: i64) {
        self.state.lock().all.push((position, secs));
    }

    /// Replace the whole stream; visible on the next bounds update
    pub fn replace(&self, entries: impl IntoIterator<Item = (i64, i64)>) {
        let mut state = self.state.lock();
        state.all = entries.into_iter().collect();
        state.truncated = true;
    }

    /// Make the next `count` parser creations fail with an I/O error
    pub fn fail_next_reads(&self, count: usize) {
        self.state.lock().fail_reads = count;
    }

    /// Make every parser creation take at least `delay`
    pub fn set_read_delay(&self, delay: Duration) {
        self.state.lock().read_delay = delay;
    }

    /// Number of parsers created so far
    pub fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    fn visible(&self) -> Vec<Message> {
        let state = self.state.lock();
        let entries = &state.all[..state.published];
        entries
            .iter()
            .enumerate()
            .map(|(i, &(position, secs))| {
                let end = entries.get(i + 1).map_or(position + 1, |next| next.0);
                Message::new(position, end, at(secs), format!("message at {position}"))
            })
            .collect()
    }
}

impl PositionedMessagesProvider for VecProvider {
    fn begin_position(&self) -> i64 {
        let state = self.state.lock();
        state.all[..state.published].first().map_or(0, |e| e.0)
    }

    fn end_position(&self) -> i64 {
        let state = self.state.lock();
        state.all[..state.published]
            .last()
            .map_or(0, |e| e.0 + 1)
    }

    fn update_available_bounds(&self, _incremental: bool) -> Result<BoundsUpdate, ProviderError> {
        let mut state = self.state.lock();
        if state.truncated {
            state.truncated = false;
            state.published = state.all.len();
            return Ok(BoundsUpdate::OldMessagesInvalidated);
        }
        if state.published < state.all.len() {
            state.published = state.all.len();
            return Ok(BoundsUpdate::NewMessagesAvailable);
        }
        Ok(BoundsUpdate::NothingUpdated)
    }

    fn create_parser(
        &self,
        params: ParserParams,
    ) -> Result<Box<dyn MessagesParser + '_>, ProviderError> {
        let delay = {
            let mut state = self.state.lock();
            if state.fail_reads > 0 {
                state.fail_reads -= 1;
                return Err(ProviderError::Io(std::io::Error::other("injected failure")));
            }
            state.read_delay
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.parses.fetch_add(1, Ordering::SeqCst);

        let stop = params.range.as_ref().map_or(i64::MAX, |r| r.end);
        let messages = self
            .visible()
            .into_iter()
            .filter(|m| m.position >= params.start_position && m.position < stop)
            .collect::<Vec<_>>();
        Ok(Box::new(VecParser {
            messages: messages.into_iter(),
        }))
    }
}

struct VecParser {
    messages: std::vec::IntoIter<Message>,
}

impl MessagesParser for VecParser {
    fn read_next(&mut self) -> Result<Option<Message>, ProviderError> {
        Ok(self.messages.next())
    }
}
