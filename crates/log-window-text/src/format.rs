//! Message header recognition

use chrono::NaiveDateTime;
use log_window::{MessageTime, Severity};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Header pattern for lines like `2024-01-15 10:30:00.123 [WARN] (worker-1) text`
pub const DEFAULT_HEADER_PATTERN: &str = r"^(?P<time>\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(?:\.\d+)?)\s*(?:\[(?P<level>[A-Za-z]+)\]\s*)?(?:\((?P<thread>[^)]*)\)\s*)?";

/// chrono format of the `time` group of [`DEFAULT_HEADER_PATTERN`]
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid header pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Header pattern has no named group `time`")]
    MissingTimeGroup,
}

/// Parsed header of a message's first line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub time: MessageTime,
    pub severity: Severity,
    pub thread: Option<String>,
    /// Byte offset of the message body within the line
    pub body_offset: usize,
}

/// How message headers look in a text log.
///
/// The pattern must have a named group `time`; the optional groups `level`
/// and `thread` fill in severity and thread. Timestamps carry no zone and are
/// read as UTC.
#[derive(Debug, Clone)]
pub struct TextFormat {
    header: Regex,
    timestamp_format: String,
}

impl TextFormat {
    pub fn new(pattern: &str, timestamp_format: impl Into<String>) -> Result<Self, FormatError> {
        let header = Regex::new(pattern)?;
        if !header.capture_names().any(|name| name == Some("time")) {
            return Err(FormatError::MissingTimeGroup);
        }
        Ok(Self {
            header,
            timestamp_format: timestamp_format.into(),
        })
    }

    /// Parse `line` as a message header; `None` for continuation lines
    pub fn parse_header(&self, line: &str) -> Option<Header> {
        let captures = self.header.captures(line)?;
        let raw_time = captures.name("time")?.as_str();
        // accept ISO `T` separators with a space-separated format
        let normalized = raw_time.replacen('T', " ", 1);
        let time = NaiveDateTime::parse_from_str(raw_time, &self.timestamp_format)
            .or_else(|_| NaiveDateTime::parse_from_str(&normalized, &self.timestamp_format))
            .ok()?
            .and_utc();

        let severity = captures
            .name("level")
            .map_or(Severity::Info, |level| parse_severity(level.as_str()));
        let thread = captures
            .name("thread")
            .map(|t| t.as_str().to_string())
            .filter(|t| !t.is_empty());
        let body_offset = captures.get(0).map_or(0, |m| m.end());

        Some(Header {
            time,
            severity,
            thread,
            body_offset,
        })
    }
}

impl Default for TextFormat {
    fn default() -> Self {
        static DEFAULT_HEADER: OnceLock<Regex> = OnceLock::new();

        let header = DEFAULT_HEADER.get_or_init(|| {
            // Safe to unwrap: the pattern is a tested constant
            Regex::new(DEFAULT_HEADER_PATTERN).unwrap()
        });
        Self {
            header: header.clone(),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

fn parse_severity(level: &str) -> Severity {
    match level.to_ascii_uppercase().as_str() {
        "ERROR" | "ERR" | "FATAL" | "CRITICAL" => Severity::Error,
        "WARN" | "WARNING" => Severity::Warning,
        _ => Severity::Info,
    }
}
