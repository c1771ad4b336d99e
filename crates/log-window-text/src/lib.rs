//! Text log files as message sources for `log-window`
//!
//! A message starts at a line whose prefix matches the header pattern of a
//! [`TextFormat`]; lines without a header continue the previous message.

pub mod format;
mod parser;
pub mod provider;

pub use format::{FormatError, Header, TextFormat, DEFAULT_HEADER_PATTERN, DEFAULT_TIMESTAMP_FORMAT};
pub use parser::TextParser;
pub use provider::TextLogProvider;
