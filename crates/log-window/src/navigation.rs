//! Navigation commands and their flags

use crate::message::MessageTime;
use bitflags::bitflags;

bitflags! {
    /// How a navigation command places the window and where its target comes from
    ///
    /// One alignment and one origin flag are expected; missing ones default to
    /// bottom alignment and a date origin.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NavigateFlags: u32 {
        /// Target date becomes the first line of the window
        const ALIGN_TOP = 1 << 0;

        /// Target date becomes the last line of the window
        const ALIGN_BOTTOM = 1 << 1;

        /// Target date is centered in the window
        const ALIGN_CENTER = 1 << 2;

        /// Target is the command's date
        const ORIGIN_DATE = 1 << 4;

        /// Target is the beginning (top) or end (bottom) of every stream
        const ORIGIN_STREAM_BOUNDARIES = 1 << 5;

        /// Target is the matching edge of the current stable range
        const ORIGIN_LOADED_RANGE_BOUNDARIES = 1 << 6;

        /// Command scrolls by one page rather than jumping
        const SHIFTING_MODE = 1 << 8;

        /// Command is replayed when sources grow
        const STICKY_COMMAND_MODE = 1 << 9;

        const ALIGN_MASK = Self::ALIGN_TOP.bits() | Self::ALIGN_BOTTOM.bits() | Self::ALIGN_CENTER.bits();

        const ORIGIN_MASK = Self::ORIGIN_DATE.bits()
            | Self::ORIGIN_STREAM_BOUNDARIES.bits()
            | Self::ORIGIN_LOADED_RANGE_BOUNDARIES.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Top,
    Bottom,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Date,
    StreamBoundaries,
    LoadedRangeBoundaries,
}

impl NavigateFlags {
    pub fn alignment(self) -> Alignment {
        if self.contains(Self::ALIGN_TOP) {
            Alignment::Top
        } else if self.contains(Self::ALIGN_CENTER) {
            Alignment::Center
        } else {
            Alignment::Bottom
        }
    }

    pub fn origin(self) -> Origin {
        if self.contains(Self::ORIGIN_STREAM_BOUNDARIES) {
            Origin::StreamBoundaries
        } else if self.contains(Self::ORIGIN_LOADED_RANGE_BOUNDARIES) {
            Origin::LoadedRangeBoundaries
        } else {
            Origin::Date
        }
    }

    /// Same flags with the origin replaced
    pub fn with_origin(self, origin: NavigateFlags) -> Self {
        (self - Self::ORIGIN_MASK) | (origin & Self::ORIGIN_MASK)
    }

    pub fn is_shifting(self) -> bool {
        self.contains(Self::SHIFTING_MODE)
    }

    pub fn is_sticky(self) -> bool {
        self.contains(Self::STICKY_COMMAND_MODE)
    }
}

impl Default for NavigateFlags {
    fn default() -> Self {
        Self::ALIGN_BOTTOM | Self::ORIGIN_STREAM_BOUNDARIES | Self::STICKY_COMMAND_MODE
    }
}

/// A navigation request as issued to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationCommand {
    /// Target date, used with [`NavigateFlags::ORIGIN_DATE`]
    pub date: Option<MessageTime>,
    pub flags: NavigateFlags,
}

impl NavigationCommand {
    pub fn new(date: Option<MessageTime>, flags: NavigateFlags) -> Self {
        Self { date, flags }
    }

    /// Jump to `date` with the given alignment
    pub fn to_date(date: MessageTime, alignment: NavigateFlags) -> Self {
        Self::new(
            Some(date),
            (alignment & NavigateFlags::ALIGN_MASK) | NavigateFlags::ORIGIN_DATE,
        )
    }

    /// Follow the end of every stream
    pub fn follow_tail() -> Self {
        Self::new(None, NavigateFlags::default())
    }
}

impl Default for NavigationCommand {
    fn default() -> Self {
        Self::follow_tail()
    }
}
