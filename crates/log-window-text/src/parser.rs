//! Forward parser over a text log file
//!
//! A message is a header line plus every following line without a header.
//! Parsing may start at any byte: the parser first skips to the next line
//! start, then drops lines until it finds a header.

use crate::format::TextFormat;
use log_window::{Message, MessagesParser, ProviderError};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// A line read from the file
struct Line {
    position: i64,
    text: String,
}

pub struct TextParser {
    reader: BufReader<File>,
    format: Arc<TextFormat>,
    /// Offset of the next unread byte
    position: i64,
    /// Messages must start before this offset
    stop: i64,
    /// Bytes past this offset are not visible to this parser
    end: i64,
    /// Header line of the next message, already read
    pending: Option<Line>,
}

impl TextParser {
    pub(crate) fn open(
        path: &Path,
        format: Arc<TextFormat>,
        start: i64,
        stop: i64,
        end: i64,
    ) -> Result<Self, ProviderError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let start = start.clamp(0, end);

        let mut position = start;
        if start > 0 {
            // consumes the newline before `start`, or the rest of the line
            // `start` points into
            reader.seek(SeekFrom::Start((start - 1) as u64))?;
            let mut skipped = Vec::new();
            let read = reader.read_until(b'\n', &mut skipped)?;
            position = start - 1 + read as i64;
        }

        Ok(Self {
            reader,
            format,
            position,
            stop: stop.min(end),
            end,
            pending: None,
        })
    }

    fn read_line(&mut self) -> Result<Option<Line>, ProviderError> {
        if self.position >= self.end {
            return Ok(None);
        }
        let mut bytes = Vec::new();
        let read = self.reader.read_until(b'\n', &mut bytes)?;
        if read == 0 {
            return Ok(None);
        }

        let line_start = self.position;
        let visible = (self.end - line_start).min(read as i64) as usize;
        bytes.truncate(visible);
        self.position += visible as i64;

        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        let trimmed = text.trim_end_matches(['\r', '\n']).len();
        text.truncate(trimmed);
        Ok(Some(Line {
            position: line_start,
            text,
        }))
    }

    fn next_header_line(&mut self) -> Result<Option<Line>, ProviderError> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        while let Some(line) = self.read_line()? {
            if line.position >= self.stop {
                return Ok(None);
            }
            if self.format.parse_header(&line.text).is_some() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }
}

impl MessagesParser for TextParser {
    fn read_next(&mut self) -> Result<Option<Message>, ProviderError> {
        let Some(first) = self.next_header_line()? else {
            return Ok(None);
        };
        if first.position >= self.stop {
            return Ok(None);
        }
        let Some(header) = self.format.parse_header(&first.text) else {
            return Err(ProviderError::Parse {
                position: first.position,
                reason: "header line no longer matches".to_string(),
            });
        };

        let mut text = first.text[header.body_offset..].to_string();
        let mut end_position = self.position;
        while let Some(line) = self.read_line()? {
            if self.format.parse_header(&line.text).is_some() {
                end_position = line.position;
                self.pending = Some(line);
                break;
            }
            text.push('\n');
            text.push_str(&line.text);
            end_position = self.position;
        }

        let mut message = Message::new(first.position, end_position, header.time, text)
            .with_severity(header.severity);
        if let Some(thread) = header.thread {
            message = message.with_thread(thread);
        }
        Ok(Some(message))
    }
}
