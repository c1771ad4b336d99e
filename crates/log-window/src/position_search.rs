//! Byte position and date search over a provider
//!
//! Every probe here costs a parse, so the searches are written to minimise the
//! number of parsers created rather than the number of comparisons. A byte
//! position may fall in the middle of a message; forward lookups rely on the
//! parser resynchronising, backward lookups use a guarded stride search.

use crate::error::ProviderError;
use crate::message::{Message, MessageTime};
use crate::provider::{ParserParams, PositionedMessagesProvider};

/// Size of one backward step in [`find_prev_message`]
pub const PREV_MESSAGE_STRIDE: i64 = 1024;

/// Backward steps tried before [`find_prev_message`] gives up
pub const PREV_MESSAGE_MAX_ATTEMPTS: i64 = 3;

/// Which bound of a date [`locate_date_bound`] looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueBound {
    /// First position whose nearest message is at or after the date
    Lower,
    /// First position whose nearest message is after the date
    Upper,
    /// Last message at or before the date
    LowerReversed,
    /// Last message before the date
    UpperReversed,
}

/// First message at or after `position`
pub fn read_nearest_message(
    provider: &dyn PositionedMessagesProvider,
    position: i64,
) -> Result<Option<Message>, ProviderError> {
    let mut parser = provider.create_parser(ParserParams::from(position))?;
    parser.read_next()
}

/// Time of the first message at or after `position`
pub fn read_nearest_date(
    provider: &dyn PositionedMessagesProvider,
    position: i64,
) -> Result<Option<MessageTime>, ProviderError> {
    Ok(read_nearest_message(provider, position)?.map(|m| m.time))
}

/// Snap `position` to the message boundary at or after it.
///
/// Positions before the stream clamp to its begin; positions with no message
/// after them map to `end_position`.
pub fn normalize_message_position(
    provider: &dyn PositionedMessagesProvider,
    position: i64,
) -> Result<i64, ProviderError> {
    let begin = provider.begin_position();
    let end = provider.end_position();
    if position <= begin {
        return Ok(begin);
    }
    if position >= end {
        return Ok(end);
    }
    Ok(read_nearest_message(provider, position)?
        .map(|m| m.position)
        .unwrap_or(end))
}

/// Position of the message following the one at (normalised) `position`
pub fn find_next_message_position(
    provider: &dyn PositionedMessagesProvider,
    position: i64,
) -> Result<Option<i64>, ProviderError> {
    let current = normalize_message_position(provider, position)?;
    if current >= provider.end_position() {
        return Ok(None);
    }
    let mut parser = provider.create_parser(ParserParams::from(current))?;
    if parser.read_next()?.is_none() {
        return Ok(None);
    }
    Ok(parser.read_next()?.map(|m| m.position))
}

/// Result of the bounded backward search in [`find_prev_message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrevMessage {
    Found(i64),
    /// No message precedes the position
    AtBegin,
    /// The attempts ran out; an earlier message may still exist
    Exhausted,
}

impl PrevMessage {
    pub fn position(self) -> Option<i64> {
        match self {
            PrevMessage::Found(position) => Some(position),
            PrevMessage::AtBegin | PrevMessage::Exhausted => None,
        }
    }
}

/// Count the messages starting in `[start, target)` and return the last one
fn parse_before(
    provider: &dyn PositionedMessagesProvider,
    start: i64,
    target: i64,
) -> Result<(usize, Option<i64>), ProviderError> {
    let mut parser = provider.create_parser(ParserParams::bounded(start, start..target))?;
    let mut parsed = 0;
    let mut last = None;
    while let Some(message) = parser.read_next()? {
        if message.position >= target {
            break;
        }
        parsed += 1;
        last = Some(message.position);
    }
    Ok((parsed, last))
}

/// Parse back from `target` with growing strides until a trusted message is
/// found, the stream begin is reached or `max_attempts` strides were tried.
///
/// A start inside the stream may land in the middle of a message and make the
/// parser pick up a false boundary, so unless the start is the stream's begin
/// the first parsed message only counts as a guard: an attempt succeeds with
/// at least two messages before the target.
fn search_back(
    provider: &dyn PositionedMessagesProvider,
    target: i64,
    first_stride: i64,
    next_stride: impl Fn(i64) -> i64,
    max_attempts: Option<i64>,
) -> Result<PrevMessage, ProviderError> {
    let begin = provider.begin_position();
    if target <= begin {
        return Ok(PrevMessage::AtBegin);
    }

    let mut stride = first_stride;
    let mut attempt = 1;
    loop {
        let start = target.saturating_sub(stride).max(begin);
        let (parsed, last) = parse_before(provider, start, target)?;
        let required = if start == begin { 1 } else { 2 };
        match last {
            Some(position) if parsed >= required => return Ok(PrevMessage::Found(position)),
            _ if start == begin => return Ok(PrevMessage::AtBegin),
            _ => {}
        }
        if max_attempts.is_some_and(|max| attempt >= max) {
            return Ok(PrevMessage::Exhausted);
        }
        attempt += 1;
        stride = next_stride(stride);
    }
}

/// Position of the last message before (normalised) `position`.
///
/// Parses forward from `PREV_MESSAGE_STRIDE` bytes back, stepping one more
/// stride back on each failed attempt, for at most
/// `PREV_MESSAGE_MAX_ATTEMPTS` attempts. Running out of attempts is reported
/// as [`PrevMessage::Exhausted`], not as the stream begin.
pub fn find_prev_message(
    provider: &dyn PositionedMessagesProvider,
    position: i64,
) -> Result<PrevMessage, ProviderError> {
    let target = normalize_message_position(provider, position)?;
    let outcome = search_back(
        provider,
        target,
        PREV_MESSAGE_STRIDE,
        |stride| stride + PREV_MESSAGE_STRIDE,
        Some(PREV_MESSAGE_MAX_ATTEMPTS),
    )?;
    if outcome == PrevMessage::Exhausted {
        log::debug!(
            "No message found before position {} after {} attempts",
            target,
            PREV_MESSAGE_MAX_ATTEMPTS
        );
    }
    Ok(outcome)
}

/// [`find_prev_message`] without the distinction between the stream begin
/// and running out of attempts
pub fn find_prev_message_position(
    provider: &dyn PositionedMessagesProvider,
    position: i64,
) -> Result<Option<i64>, ProviderError> {
    Ok(find_prev_message(provider, position)?.position())
}

/// Position of the last message before (normalised) `position`, however far
/// back it starts.
///
/// Tries the bounded search first and then keeps doubling the stride until a
/// trusted message turns up or the stream begin is reached.
pub fn scan_prev_message_position(
    provider: &dyn PositionedMessagesProvider,
    position: i64,
) -> Result<Option<i64>, ProviderError> {
    match find_prev_message(provider, position)? {
        PrevMessage::Found(position) => Ok(Some(position)),
        PrevMessage::AtBegin => Ok(None),
        PrevMessage::Exhausted => {
            let target = normalize_message_position(provider, position)?;
            let outcome = search_back(
                provider,
                target,
                PREV_MESSAGE_STRIDE * PREV_MESSAGE_MAX_ATTEMPTS * 2,
                |stride| stride.saturating_mul(2),
                None,
            )?;
            Ok(outcome.position())
        }
    }
}

/// Binary search for the position bound of `date`.
///
/// `Lower`/`Upper` return a position in `[begin, end]` (`end` when every
/// message is earlier). The reversed variants step back to the previous
/// message, however long the messages in between, and return `begin - 1`
/// when there is none.
pub fn locate_date_bound(
    provider: &dyn PositionedMessagesProvider,
    date: MessageTime,
    bound: ValueBound,
) -> Result<i64, ProviderError> {
    let begin = provider.begin_position();
    let end = provider.end_position();

    // Lower and UpperReversed split at "earlier than date", the others at
    // "not later than date"
    let inclusive = matches!(bound, ValueBound::Upper | ValueBound::LowerReversed);

    let (mut lo, mut hi) = (begin, end);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let go_right = match read_nearest_date(provider, mid)? {
            Some(time) if inclusive => time <= date,
            Some(time) => time < date,
            None => false,
        };
        if go_right {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    match bound {
        ValueBound::Lower | ValueBound::Upper => Ok(lo),
        ValueBound::LowerReversed | ValueBound::UpperReversed => {
            Ok(scan_prev_message_position(provider, lo)?.unwrap_or(begin - 1))
        }
    }
}
