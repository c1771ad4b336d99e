//! Command-line arguments

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, ValueEnum};
use log_window::{MessageTime, NavigateFlags, NavigationCommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "log-window", version, about = "Show a time-merged window over several log files")]
pub struct Cli {
    /// Log files to merge
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Jump to this date (RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`, UTC)
    #[arg(long, value_parser = parse_date)]
    pub at: Option<MessageTime>,

    /// Where the target lands in the window
    #[arg(long, value_enum, default_value_t = Align::Bottom)]
    pub align: Align,

    /// Number of additional pages to print
    #[arg(long, default_value_t = 0)]
    pub pages: usize,

    /// Page towards older messages instead of newer ones
    #[arg(long)]
    pub up: bool,

    /// Keep printing messages as the files grow
    #[arg(long)]
    pub follow: bool,

    /// Print periods in which no file logged anything
    #[arg(long)]
    pub gaps: bool,

    /// Config file (defaults to .log-window.toml lookup)
    #[arg(long, env = "LOG_WINDOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write the tool's own log to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Top,
    Bottom,
    Center,
}

impl Align {
    fn flags(self) -> NavigateFlags {
        match self {
            Align::Top => NavigateFlags::ALIGN_TOP,
            Align::Bottom => NavigateFlags::ALIGN_BOTTOM,
            Align::Center => NavigateFlags::ALIGN_CENTER,
        }
    }
}

impl Cli {
    /// Initial navigation: the given date, or the head/tail of every file
    pub fn navigation(&self) -> NavigationCommand {
        let mut command = match self.at {
            Some(date) => NavigationCommand::to_date(date, self.align.flags()),
            None if self.align == Align::Top => NavigationCommand::new(
                None,
                NavigateFlags::ALIGN_TOP | NavigateFlags::ORIGIN_STREAM_BOUNDARIES,
            ),
            None => NavigationCommand::follow_tail(),
        };
        if self.follow {
            command.flags |= NavigateFlags::STICKY_COMMAND_MODE;
        }
        command
    }
}

fn parse_date(value: &str) -> Result<MessageTime, String> {
    if let Ok(date) = chrono::DateTime::parse_from_rfc3339(value) {
        return Ok(date.to_utc());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(date) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(date.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .ok_or_else(|| format!("invalid date '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use log_window::{Alignment, Origin};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_date_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(parse_date("2024-01-15T10:30:00Z"), Ok(expected));
        assert_eq!(parse_date("2024-01-15T11:30:00+01:00"), Ok(expected));
        assert_eq!(parse_date("2024-01-15 10:30:00"), Ok(expected));
        assert_eq!(
            parse_date("2024-01-15"),
            Ok(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
        );
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_default_follows_tail() {
        let cli = Cli::try_parse_from(["log-window", "a.log", "b.log"]).unwrap();
        assert_eq!(cli.files.len(), 2);
        assert_eq!(cli.navigation(), NavigationCommand::follow_tail());
    }

    #[test]
    fn test_date_navigation() {
        let cli = Cli::try_parse_from([
            "log-window",
            "--at",
            "2024-01-15 10:30:00",
            "--align",
            "center",
            "a.log",
        ])
        .unwrap();
        let command = cli.navigation();
        assert_eq!(command.flags.alignment(), Alignment::Center);
        assert_eq!(command.flags.origin(), Origin::Date);
        assert!(!command.flags.is_sticky());
        assert!(command.date.is_some());
    }

    #[test]
    fn test_head_navigation_and_follow() {
        let cli = Cli::try_parse_from(["log-window", "--align", "top", "--follow", "a.log"]).unwrap();
        let command = cli.navigation();
        assert_eq!(command.flags.alignment(), Alignment::Top);
        assert_eq!(command.flags.origin(), Origin::StreamBoundaries);
        assert!(command.flags.is_sticky());
    }

    #[test]
    fn test_files_are_required() {
        assert!(Cli::try_parse_from(["log-window"]).is_err());
    }
}
