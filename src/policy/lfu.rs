use std::collections::BTreeMap;

use crate::entry::{EntryRef, UNTRACKED};
use crate::error::corruption;

use super::Policy;

/// Frequency assigned on `track`.
const BASE_FREQUENCY: u64 = 1;

struct LfuNode {
    /// `None` for free slots.
    entry: Option<EntryRef>,
    freq: u64,
    /// Insertion order; the tie-break among equal frequencies.
    seq: u64,
}

/// LFU policy over frequency buckets.
///
/// ```text
/// buckets: freq=1 -> { seq 4: slot 7, seq 9: slot 2 }
///          freq=3 -> { seq 1: slot 0 }
/// ```
///
/// Each bucket orders its members by insertion sequence, so the victim is the
/// first member of the lowest bucket: lowest frequency, oldest insertion. A
/// touch moves one node to the next bucket in O(log n).
pub struct LfuPolicy {
    nodes: Vec<LfuNode>,
    free_list: Vec<usize>,
    /// frequency -> (insertion seq -> slot)
    buckets: BTreeMap<u64, BTreeMap<u64, usize>>,
    next_seq: u64,
    len: usize,
}

impl LfuPolicy {
    pub fn new() -> Self {
        LfuPolicy {
            nodes: Vec::with_capacity(16),
            free_list: Vec::new(),
            buckets: BTreeMap::new(),
            next_seq: 0,
            len: 0,
        }
    }

    fn alloc_node(&mut self, entry: EntryRef, seq: u64) -> usize {
        let node = LfuNode {
            entry: Some(entry),
            freq: BASE_FREQUENCY,
            seq,
        };
        if let Some(idx) = self.free_list.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn position(&self, entry: &EntryRef) -> Option<usize> {
        let idx = entry.entry().slot();
        if idx == UNTRACKED {
            return None;
        }
        match self.nodes.get(idx).and_then(|n| n.entry.as_ref()) {
            Some(held) if held.ptr_eq(entry) => Some(idx),
            _ => corruption("lfu slot does not hold its entry"),
        }
    }

    fn bucket_remove(&mut self, freq: u64, seq: u64) {
        let Some(bucket) = self.buckets.get_mut(&freq) else {
            corruption("lfu node missing from its bucket");
        };
        if bucket.remove(&seq).is_none() {
            corruption("lfu node missing from its bucket");
        }
        if bucket.is_empty() {
            self.buckets.remove(&freq);
        }
    }

    /// Current frequency of a tracked entry.
    #[cfg(test)]
    pub(crate) fn frequency(&self, entry: &EntryRef) -> Option<u64> {
        self.position(entry).map(|idx| self.nodes[idx].freq)
    }
}

impl Default for LfuPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for LfuPolicy {
    fn track(&mut self, entry: EntryRef) {
        if entry.entry().slot() != UNTRACKED {
            corruption("entry tracked twice");
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let e = entry.clone();
        let idx = self.alloc_node(entry, seq);
        e.entry().set_slot(idx);
        self.buckets
            .entry(BASE_FREQUENCY)
            .or_default()
            .insert(seq, idx);
        self.len += 1;
    }

    fn touch(&mut self, entry: &EntryRef) {
        let Some(idx) = self.position(entry) else {
            return;
        };
        let (freq, seq) = (self.nodes[idx].freq, self.nodes[idx].seq);
        if freq == u64::MAX {
            return;
        }
        self.bucket_remove(freq, seq);
        self.nodes[idx].freq = freq + 1;
        self.buckets.entry(freq + 1).or_default().insert(seq, idx);
    }

    fn candidates(&self) -> Box<dyn Iterator<Item = &EntryRef> + '_> {
        Box::new(
            self.buckets
                .values()
                .flat_map(|bucket| bucket.values())
                .filter_map(move |&idx| self.nodes[idx].entry.as_ref()),
        )
    }

    fn untrack(&mut self, entry: &EntryRef) -> Option<EntryRef> {
        let idx = self.position(entry)?;
        let (freq, seq) = (self.nodes[idx].freq, self.nodes[idx].seq);
        self.bucket_remove(freq, seq);
        let held = self.nodes[idx].entry.take();
        entry.entry().set_slot(UNTRACKED);
        self.free_list.push(idx);
        self.len -= 1;
        held
    }

    fn len(&self) -> usize {
        self.len
    }
}
