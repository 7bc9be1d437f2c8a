use crate::entry::EntryRef;

use super::Policy;

/// Unmanaged mode: nothing is tracked and nothing is ever a victim.
///
/// The cache rejects puts that do not fit instead of evicting.
pub struct NonePolicy;

impl Policy for NonePolicy {
    #[inline]
    fn track(&mut self, _entry: EntryRef) {}

    #[inline]
    fn touch(&mut self, _entry: &EntryRef) {}

    #[inline]
    fn candidates(&self) -> Box<dyn Iterator<Item = &EntryRef> + '_> {
        Box::new(std::iter::empty())
    }

    #[inline]
    fn untrack(&mut self, _entry: &EntryRef) -> Option<EntryRef> {
        None
    }

    #[inline]
    fn len(&self) -> usize {
        0
    }
}
