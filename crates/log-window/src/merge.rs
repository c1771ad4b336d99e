//! Time-ordered k-way merge over the loaded windows of several sources
//!
//! Nothing is materialised: a scan keeps one cursor per source in a binary
//! heap keyed by message time and pops the earliest (or latest, for reverse
//! scans) head on every step. Ties are broken by source order, so repeated
//! scans over unchanged windows yield the same sequence and a reverse scan
//! mirrors a forward one.

use crate::message::MessageRef;
use crate::messages::Messages;
use crate::reader::SourceId;
use parking_lot::{Mutex, MutexGuard};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

/// One source's window as seen by the merge
#[derive(Debug, Clone)]
pub struct MergeSource {
    pub id: SourceId,
    pub messages: Arc<Mutex<Messages>>,
    pub visible: Arc<AtomicBool>,
}

/// A message of the merged sequence
#[derive(Debug, Clone)]
pub struct MergedMessage {
    /// Index in the merged sequence
    pub index: usize,
    pub source: SourceId,
    pub message: MessageRef,
}

/// Merged, indexable view over several per-source windows
#[derive(Debug, Clone, Default)]
pub struct MergeView {
    sources: Vec<MergeSource>,
}

impl MergeView {
    pub fn new(sources: Vec<MergeSource>) -> Self {
        Self { sources }
    }

    /// Lock every visible source for the duration of a scan.
    ///
    /// Readers keep filling their windows concurrently; the merged sequence is
    /// only consistent while the returned guard is alive. Sources hidden at
    /// this point are left out of the scan.
    pub fn lock(&self) -> LockedMerge<'_> {
        let guards = self
            .sources
            .iter()
            .filter(|s| s.visible.load(AtomicOrdering::Acquire))
            .map(|s| (s.id, s.messages.lock()))
            .collect();
        LockedMerge { guards }
    }
}

/// A merge scan holding the locks of all participating sources
pub struct LockedMerge<'a> {
    guards: Vec<(SourceId, MutexGuard<'a, Messages>)>,
}

impl LockedMerge<'_> {
    /// Total number of merged messages
    pub fn count(&self) -> usize {
        self.guards.iter().map(|(_, g)| g.count()).sum()
    }

    pub fn sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.guards.iter().map(|(id, _)| *id)
    }

    /// Merged messages with indices in `[begin, end)`, earliest first
    pub fn forward(&self, begin: usize, end: usize) -> impl Iterator<Item = MergedMessage> + '_ {
        let end = end.min(self.count());
        let ids = self.ids();
        merge_sorted(
            self.guards.iter().map(|(_, g)| g.iter()),
            |m: &&MessageRef| m.time,
            MergeOrder::Ascending,
        )
        .skip(begin)
        .take(end.saturating_sub(begin))
        .enumerate()
        .map(move |(i, (slot, message))| MergedMessage {
            index: begin + i,
            source: ids[slot],
            message: message.clone(),
        })
    }

    /// Merged messages with indices in `[begin, end)`, latest first
    pub fn reverse(&self, begin: usize, end: usize) -> impl Iterator<Item = MergedMessage> + '_ {
        let end = end.min(self.count());
        let ids = self.ids();
        let skipped = self.count() - end;
        merge_sorted(
            self.guards.iter().map(|(_, g)| g.iter().rev()),
            |m: &&MessageRef| m.time,
            MergeOrder::Descending,
        )
        .skip(skipped)
        .take(end.saturating_sub(begin))
        .enumerate()
        .map(move |(i, (slot, message))| MergedMessage {
            index: end - 1 - i,
            source: ids[slot],
            message: message.clone(),
        })
    }

    fn ids(&self) -> Vec<SourceId> {
        self.guards.iter().map(|(id, _)| *id).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOrder {
    Ascending,
    Descending,
}

struct HeapEntry<K> {
    key: K,
    slot: usize,
    order: MergeOrder,
}

impl<K: Ord> PartialEq for HeapEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord> Eq for HeapEntry<K> {}

impl<K: Ord> PartialOrd for HeapEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for HeapEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        let ord = self
            .key
            .cmp(&other.key)
            .then(self.slot.cmp(&other.slot));
        // BinaryHeap pops the maximum
        match self.order {
            MergeOrder::Ascending => ord.reverse(),
            MergeOrder::Descending => ord,
        }
    }
}

/// Lazy k-way merge; yields `(source slot, item)`
pub struct MergeSorted<I: Iterator, K, F> {
    sources: Vec<I>,
    heads: Vec<Option<I::Item>>,
    heap: BinaryHeap<HeapEntry<K>>,
    key: F,
    order: MergeOrder,
}

/// Merge sequences that are each sorted by `key` in `order`
pub fn merge_sorted<S, I, K, F>(sources: S, mut key: F, order: MergeOrder) -> MergeSorted<I, K, F>
where
    S: IntoIterator<Item = I>,
    I: Iterator,
    K: Ord,
    F: FnMut(&I::Item) -> K,
{
    let mut sources: Vec<I> = sources.into_iter().collect();
    let mut heads = Vec::with_capacity(sources.len());
    let mut heap = BinaryHeap::with_capacity(sources.len());
    for (slot, source) in sources.iter_mut().enumerate() {
        let head = source.next();
        if let Some(item) = &head {
            heap.push(HeapEntry {
                key: key(item),
                slot,
                order,
            });
        }
        heads.push(head);
    }
    MergeSorted {
        sources,
        heads,
        heap,
        key,
        order,
    }
}

impl<I, K, F> Iterator for MergeSorted<I, K, F>
where
    I: Iterator,
    K: Ord,
    F: FnMut(&I::Item) -> K,
{
    type Item = (usize, I::Item);

    fn next(&mut self) -> Option<Self::Item> {
        let top = self.heap.pop()?;
        let slot = top.slot;
        let item = self.heads[slot].take()?;

        if let Some(next) = self.sources[slot].next() {
            self.heap.push(HeapEntry {
                key: (self.key)(&next),
                slot,
                order: self.order,
            });
            self.heads[slot] = Some(next);
        }
        Some((slot, item))
    }
}
