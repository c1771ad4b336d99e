//! Indexed iteration over a chain of ranges and their blocks.
//!
//! A global index is resolved by walking the range/block chain and summing
//! counts, so a random seek costs O(ranges + blocks) while a sequential scan
//! from there is O(1) per message.

use crate::message::MessageRef;
use crate::range::Range;

/// Location of a message inside a range chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    range: usize,
    block: usize,
    offset: usize,
}

fn locate(ranges: &[Range], index: usize) -> Option<Slot> {
    let mut remaining = index;
    for (range_idx, range) in ranges.iter().enumerate() {
        if remaining >= range.count() {
            remaining -= range.count();
            continue;
        }
        for (block_idx, block) in range.blocks().iter().enumerate() {
            if remaining < block.len() {
                return Some(Slot {
                    range: range_idx,
                    block: block_idx,
                    offset: remaining,
                });
            }
            remaining -= block.len();
        }
        return None;
    }
    None
}

fn total(ranges: &[Range]) -> usize {
    ranges.iter().map(Range::count).sum()
}

/// Messages with global indices in `[begin, end)`, in ascending order
pub fn forward(
    ranges: &[Range],
    begin: usize,
    end: usize,
) -> impl Iterator<Item = (usize, &MessageRef)> + '_ {
    let end = end.min(total(ranges));
    let start = if begin < end { locate(ranges, begin) } else { None };

    start.into_iter().flat_map(move |slot| {
        ranges[slot.range..]
            .iter()
            .flat_map(|r| r.blocks().iter())
            .skip(slot.block)
            .flat_map(|b| b.iter())
            .skip(slot.offset)
            .take(end - begin)
            .enumerate()
            .map(move |(i, m)| (begin + i, m))
    })
}

/// Messages with global indices in `[begin, end)`, in descending order
pub fn reverse(
    ranges: &[Range],
    begin: usize,
    end: usize,
) -> impl Iterator<Item = (usize, &MessageRef)> + '_ {
    let end = end.min(total(ranges));
    let start = if begin < end {
        locate(ranges, end - 1)
    } else {
        None
    };

    start.into_iter().flat_map(move |slot| {
        let blocks_after = ranges[slot.range].blocks().len() - 1 - slot.block;
        let items_after = ranges[slot.range].blocks()[slot.block].len() - 1 - slot.offset;
        ranges[..=slot.range]
            .iter()
            .rev()
            .flat_map(|r| r.blocks().iter().rev())
            .skip(blocks_after)
            .flat_map(|b| b.iter().rev())
            .skip(items_after)
            .take(end - begin)
            .enumerate()
            .map(move |(i, m)| (end - 1 - i, m))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BLOCK_CAPACITY;
    use crate::file_range::FileRange;
    use crate::message::Message;
    use chrono::DateTime;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn filled(begin: i64, end: i64, step: i64) -> Range {
        let mut range = Range::new(FileRange::new(begin, end, 1));
        range.open();
        let mut p = begin;
        while p < end {
            let time = DateTime::from_timestamp(p, 0).unwrap();
            range
                .add(Arc::new(Message::new(p, p + 1, time, "x")), false)
                .unwrap();
            p += step;
        }
        range.set_complete();
        range.close();
        range
    }

    fn chain() -> Vec<Range> {
        vec![
            filled(0, 300, 1),
            Range::new(FileRange::new(300, 400, 1)),
            filled(400, 1000, 2),
        ]
    }

    #[test]
    fn test_forward_crosses_blocks_and_ranges() {
        let ranges = chain();
        let got: Vec<(usize, i64)> = forward(&ranges, 254, 302)
            .map(|(i, m)| (i, m.position))
            .collect();

        assert_eq!(got.len(), 48);
        assert_eq!(got[0], (254, 254));
        assert_eq!(got[2], (256, 256)); // first message of the second block
        assert_eq!(got[46], (300, 400)); // empty range skipped
        assert_eq!(got[47], (301, 402));
    }

    #[test]
    fn test_reverse_mirrors_forward() {
        let ranges = chain();
        let mut fwd: Vec<(usize, i64)> = forward(&ranges, 10, 700)
            .map(|(i, m)| (i, m.position))
            .collect();
        let rev: Vec<(usize, i64)> = reverse(&ranges, 10, 700)
            .map(|(i, m)| (i, m.position))
            .collect();

        fwd.reverse();
        assert_eq!(fwd, rev);
    }

    #[test]
    fn test_out_of_bounds_is_clamped() {
        let ranges = chain();
        let count = total(&ranges);
        assert_eq!(count, 300 + 300);
        assert_eq!(forward(&ranges, count - 1, count + 50).count(), 1);
        assert_eq!(reverse(&ranges, 0, usize::MAX).count(), count);
        assert_eq!(forward(&ranges, 5, 5).count(), 0);
        assert_eq!(forward(&[], 0, 10).count(), 0);
    }

    #[test]
    fn test_locate_in_later_block() {
        let ranges = chain();
        assert_eq!(
            locate(&ranges, BLOCK_CAPACITY + 1),
            Some(Slot {
                range: 0,
                block: 1,
                offset: 1
            })
        );
        assert_eq!(locate(&ranges, 10_000), None);
    }
}
