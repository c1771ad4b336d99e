//! Plain-text printing of the merged view

use log_window::{LogSourcesManager, MergedMessage, MessageTime, SourceId, TimeGap};
use std::io::{self, Write};

/// Identifies a printed message so follow mode does not print it twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PrintedKey {
    time: MessageTime,
    source: SourceId,
    position: i64,
}

impl PrintedKey {
    fn of(entry: &MergedMessage) -> Self {
        Self {
            time: entry.message.time,
            source: entry.source,
            position: entry.message.position,
        }
    }
}

pub fn format_message(entry: &MergedMessage, source_name: &str) -> String {
    format!(
        "{} [{}] {}",
        entry.message.time.format("%Y-%m-%d %H:%M:%S%.3f"),
        source_name,
        entry.message.text
    )
}

pub fn format_gap(gap: &TimeGap) -> String {
    let duration = gap.duration();
    format!(
        "{} .. {} ({}s without messages)",
        gap.begin.format("%Y-%m-%d %H:%M:%S"),
        gap.end.format("%Y-%m-%d %H:%M:%S"),
        duration.num_seconds()
    )
}

/// Print the merged view, skipping everything up to and including `after`.
///
/// Returns the key of the last message printed, or `after` when nothing new
/// was printed.
pub fn print_view(
    manager: &LogSourcesManager,
    out: &mut impl Write,
    after: Option<PrintedKey>,
) -> io::Result<Option<PrintedKey>> {
    let view = manager.merged_view();
    let locked = view.lock();
    let mut last = after;
    for entry in locked.forward(0, locked.count()) {
        let key = PrintedKey::of(&entry);
        if after.is_some_and(|a| key <= a) {
            continue;
        }
        let name = manager.source_name(entry.source).unwrap_or("?");
        writeln!(out, "{}", format_message(&entry, name))?;
        last = Some(key);
    }
    out.flush()?;
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use log_window::Message;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn entry(source: u64, position: i64, secs: u32, text: &str) -> MergedMessage {
        let time = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, secs).unwrap();
        MergedMessage {
            index: 0,
            source: SourceId(source),
            message: Arc::new(Message::new(position, position + 10, time, text)),
        }
    }

    #[test]
    fn test_format_message() {
        assert_eq!(
            format_message(&entry(1, 0, 5, "disk full"), "app.log"),
            "2024-01-15 10:00:05.000 [app.log] disk full"
        );
    }

    #[test]
    fn test_format_gap() {
        let gap = TimeGap {
            begin: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 15, 10, 5, 0).unwrap(),
        };
        assert_eq!(
            format_gap(&gap),
            "2024-01-15 10:00:00 .. 2024-01-15 10:05:00 (300s without messages)"
        );
    }

    #[test]
    fn test_printed_key_order_follows_merge_order() {
        let a = PrintedKey::of(&entry(1, 100, 5, ""));
        let b = PrintedKey::of(&entry(2, 0, 5, ""));
        let c = PrintedKey::of(&entry(1, 110, 6, ""));
        assert!(a < b);
        assert!(b < c);
    }
}
