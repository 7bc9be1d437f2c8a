use crate::entry::{EntryRef, UNTRACKED};
use crate::error::corruption;

use super::Policy;

/// Sentinel indices in the `nodes` arena.
const HEAD: usize = 0; // most-recently-used end
const TAIL: usize = 1; // least-recently-used end
const NULL: usize = usize::MAX;

struct LruNode {
    /// `None` for the HEAD and TAIL sentinels and for free slots.
    entry: Option<EntryRef>,
    /// Index toward HEAD (more recently used).
    prev: usize,
    /// Index toward TAIL (less recently used).
    next: usize,
}

/// O(1) LRU policy backed by an index-arena doubly-linked list.
///
/// Each tracked entry stores its arena index in its policy slot, so a touch
/// is an unlink plus a relink with no lookup.
pub struct LruPolicy {
    /// Index 0 = HEAD sentinel, 1 = TAIL sentinel, 2+ = real entries.
    nodes: Vec<LruNode>,
    /// Indices of freed (reusable) slots.
    free_list: Vec<usize>,
    len: usize,
}

impl LruPolicy {
    pub fn new() -> Self {
        let mut nodes: Vec<LruNode> = Vec::with_capacity(16);
        // HEAD sentinel (index 0): next points to TAIL initially
        nodes.push(LruNode {
            entry: None,
            prev: NULL,
            next: TAIL,
        });
        // TAIL sentinel (index 1): prev points to HEAD initially
        nodes.push(LruNode {
            entry: None,
            prev: HEAD,
            next: NULL,
        });

        LruPolicy {
            nodes,
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Links `idx` immediately after the HEAD sentinel (marks it most-recently-used).
    fn link_after_head(&mut self, idx: usize) {
        let old_first = self.nodes[HEAD].next;
        self.nodes[idx].prev = HEAD;
        self.nodes[idx].next = old_first;
        self.nodes[HEAD].next = idx;
        self.nodes[old_first].prev = idx;
    }

    /// Detaches `idx` from its current position in the list.
    fn unlink(&mut self, idx: usize) {
        let prev = self.nodes[idx].prev;
        let next = self.nodes[idx].next;
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[idx].prev = NULL;
        self.nodes[idx].next = NULL;
    }

    /// Allocates a new node (reusing from the free list when available).
    fn alloc_node(&mut self, entry: EntryRef) -> usize {
        if let Some(idx) = self.free_list.pop() {
            self.nodes[idx].entry = Some(entry);
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(LruNode {
                entry: Some(entry),
                prev: NULL,
                next: NULL,
            });
            idx
        }
    }

    /// Resolves the arena index of a tracked entry.
    fn position(&self, entry: &EntryRef) -> Option<usize> {
        let idx = entry.entry().slot();
        if idx == UNTRACKED {
            return None;
        }
        match self.nodes.get(idx).and_then(|n| n.entry.as_ref()) {
            Some(held) if held.ptr_eq(entry) => Some(idx),
            _ => corruption("lru slot does not hold its entry"),
        }
    }

    /// Tracked keys from least to most recently used.
    #[cfg(test)]
    pub(crate) fn order(&self) -> Vec<Vec<u8>> {
        self.candidates().map(|e| e.key().to_vec()).collect()
    }
}

impl Default for LruPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for LruPolicy {
    fn track(&mut self, entry: EntryRef) {
        if entry.entry().slot() != UNTRACKED {
            corruption("entry tracked twice");
        }
        let e = entry.clone();
        let idx = self.alloc_node(entry);
        e.entry().set_slot(idx);
        self.link_after_head(idx);
        self.len += 1;
    }

    fn touch(&mut self, entry: &EntryRef) {
        if let Some(idx) = self.position(entry) {
            self.unlink(idx);
            self.link_after_head(idx);
        }
    }

    fn candidates(&self) -> Box<dyn Iterator<Item = &EntryRef> + '_> {
        // Walk from the least-recently-used end toward HEAD.
        let mut idx = self.nodes[TAIL].prev;
        Box::new(std::iter::from_fn(move || {
            if idx == HEAD {
                return None;
            }
            let node = &self.nodes[idx];
            idx = node.prev;
            node.entry.as_ref()
        }))
    }

    fn untrack(&mut self, entry: &EntryRef) -> Option<EntryRef> {
        let idx = self.position(entry)?;
        self.unlink(idx);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::test_support::{backing, entry};

    #[test]
    fn victim_is_least_recently_tracked() {
        let b = backing(64 * 1024, 256);
        let mut policy = LruPolicy::new();
        let (a, bb, c) = (entry(&b, b"a", b"1"), entry(&b, b"b", b"2"), entry(&b, b"c", b"3"));
        policy.track(a.clone());
        policy.track(bb.clone());
        policy.track(c.clone());
        assert!(policy.select_victim().unwrap().ptr_eq(&a));
        assert_eq!(policy.order(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn touch_promotes_to_mru() {
        let b = backing(64 * 1024, 256);
        let mut policy = LruPolicy::new();
        let (a, bb) = (entry(&b, b"a", b"1"), entry(&b, b"b", b"2"));
        policy.track(a.clone());
        policy.track(bb.clone());
        policy.touch(&a); // "a" is now MRU, "b" is LRU
        assert!(policy.select_victim().unwrap().ptr_eq(&bb));
    }

    #[test]
    fn untrack_returns_the_policy_reference() {
        let b = backing(64 * 1024, 256);
        let mut policy = LruPolicy::new();
        let a = entry(&b, b"a", b"1");
        policy.track(a.clone());
        assert_eq!(a.references(), 2);

        let held = policy.untrack(&a).expect("tracked");
        drop(held);
        assert_eq!(a.references(), 1);
        assert_eq!(a.entry().slot(), UNTRACKED);
        assert!(policy.untrack(&a).is_none(), "second untrack is a no-op");
        assert!(policy.is_empty());
    }

    #[test]
    fn touch_on_untracked_entry_is_ignored() {
        let b = backing(64 * 1024, 256);
        let mut policy = LruPolicy::new();
        let a = entry(&b, b"a", b"1");
        policy.touch(&a);
        assert!(policy.select_victim().is_none());
    }

    #[test]
    fn freed_slots_are_reused() {
        let b = backing(64 * 1024, 256);
        let mut policy = LruPolicy::new();
        let a = entry(&b, b"a", b"1");
        policy.track(a.clone());
        let slot = a.entry().slot();
        drop(policy.untrack(&a));
        let c = entry(&b, b"c", b"3");
        policy.track(c.clone());
        assert_eq!(c.entry().slot(), slot);
        assert_eq!(policy.len(), 1);
    }
}
