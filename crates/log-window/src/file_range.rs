//! Byte-position intervals with priorities
//!
//! `FileRange` is the algebra the paging container is built on: intersecting a
//! desired interval with an existing one yields the common part plus whatever
//! is left over on either side of either operand.

/// Half-open byte interval `[begin, end)` with a fill priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileRange {
    pub begin: i64,
    pub end: i64,
    pub priority: i32,
}

/// Where the first operand of an intersection lies relative to the second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativePosition {
    /// First range ends at or before the second one begins
    Before,
    /// The ranges share at least one position
    Overlap,
    /// First range begins at or after the second one ends
    After,
}

/// Result of [`FileRange::intersect`]
///
/// Leftovers are only filled in for overlapping ranges. `*1*` leftovers keep
/// the priority of the first operand, `*2*` leftovers the priority of the
/// second one; `common` carries the first operand's priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intersection {
    pub relative_position: RelativePosition,
    pub common: Option<FileRange>,
    pub leftover1_left: Option<FileRange>,
    pub leftover1_right: Option<FileRange>,
    pub leftover2_left: Option<FileRange>,
    pub leftover2_right: Option<FileRange>,
}

impl FileRange {
    /// Create a range; an inverted range collapses to an empty one at `begin`
    pub fn new(begin: i64, end: i64, priority: i32) -> Self {
        Self {
            begin,
            end: end.max(begin),
            priority,
        }
    }

    pub fn len(&self) -> i64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn contains(&self, position: i64) -> bool {
        position >= self.begin && position < self.end
    }

    pub fn with_priority(self, priority: i32) -> Self {
        Self { priority, ..self }
    }

    /// Intersect `r1` with `r2`
    pub fn intersect(r1: &FileRange, r2: &FileRange) -> Intersection {
        let mut result = Intersection {
            relative_position: RelativePosition::Overlap,
            common: None,
            leftover1_left: None,
            leftover1_right: None,
            leftover2_left: None,
            leftover2_right: None,
        };

        let common_begin = r1.begin.max(r2.begin);
        let common_end = r1.end.min(r2.end);
        if common_begin >= common_end {
            result.relative_position = if r1.end <= r2.begin && r1.begin < r2.end {
                RelativePosition::Before
            } else if r1.begin >= r2.end {
                RelativePosition::After
            } else {
                // Empty r1 strictly inside r2
                RelativePosition::Before
            };
            return result;
        }

        result.common = Some(FileRange::new(common_begin, common_end, r1.priority));
        if r1.begin < r2.begin {
            result.leftover1_left = Some(FileRange::new(r1.begin, r2.begin, r1.priority));
        }
        if r1.end > r2.end {
            result.leftover1_right = Some(FileRange::new(r2.end, r1.end, r1.priority));
        }
        if r2.begin < r1.begin {
            result.leftover2_left = Some(FileRange::new(r2.begin, r1.begin, r2.priority));
        }
        if r2.end > r1.end {
            result.leftover2_right = Some(FileRange::new(r1.end, r2.end, r2.priority));
        }
        result
    }
}
