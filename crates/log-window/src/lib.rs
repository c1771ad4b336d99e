//! Virtualized multi-source log windowing
//!
//! Each log source is read through a [`PositionedMessagesProvider`] by a
//! background reader that keeps only a bounded window of parsed messages in
//! memory. The [`LogSourcesManager`] navigates all readers to a common date,
//! computes the date range every source has fully loaded, and exposes the
//! windows as one time-ordered sequence through a [`MergeView`].
//!
//! # Example
//!
//! ```no_run
//! use log_window::{LogSourcesManager, ReaderSettings, PositionedMessagesProvider};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn provider() -> Arc<dyn PositionedMessagesProvider> { unimplemented!() }
//! let mut manager = LogSourcesManager::new(ReaderSettings::default());
//! manager.add_source("app.log", provider())?;
//! manager.wait_for_idle(Duration::from_secs(5), &Default::default())?;
//!
//! let view = manager.merged_view();
//! let locked = view.lock();
//! for entry in locked.forward(0, locked.count()) {
//!     println!("{} {}", entry.message.time, entry.message.text);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod block;
pub mod concat;
pub mod error;
pub mod file_range;
pub mod merge;
pub mod message;
pub mod messages;
pub mod navigation;
pub mod position_search;
pub mod provider;
pub mod range;
pub mod reader;
pub mod sources_manager;
pub mod time_gaps;

#[cfg(test)]
mod testing;

pub use error::{ProviderError, ReaderError, WindowError};
pub use merge::{LockedMerge, MergeSource, MergeView, MergedMessage};
pub use message::{DateRange, Message, MessageRef, MessageTime, Severity};
pub use messages::Messages;
pub use navigation::{Alignment, NavigateFlags, NavigationCommand, Origin};
pub use provider::{BoundsUpdate, MessagesParser, ParserParams, PositionedMessagesProvider};
pub use reader::{LoadState, ReaderCommand, ReaderHandle, ReaderSettings, SourceId, SourceStats};
pub use sources_manager::{
    IdleWait, LogSourcesManager, ManagerError, ManagerEvent, Pivot, ShiftCanceller, ShiftOutcome,
};
pub use time_gaps::{GapScan, GapSettings, GapsEvent, TimeGap, TimeGapsWorker, find_time_gaps};
