//! Pass chains: retained entries threaded in insertion order so a whole render pass can be
//! recycled (or demoted to temp) as one unit.

use crate::cache::store::{CacheStore, EntryId};

impl CacheStore {
    /// Splice an entry out of its chain.
    pub(crate) fn unlink(&mut self, id: EntryId) {
        let Some(e) = self.entry(id) else {
            return;
        };
        let (prev, next) = (e.link_prev, e.link_next);

        if let Some(n) = next
            && let Some(ne) = self.entry_mut(n)
        {
            debug_assert_eq!(ne.link_prev, Some(id), "chain next/prev mismatch");
            ne.link_prev = prev;
        }
        if let Some(p) = prev
            && let Some(pe) = self.entry_mut(p)
        {
            debug_assert_eq!(pe.link_next, Some(id), "chain prev/next mismatch");
            pe.link_next = next;
        }
        if let Some(e) = self.entry_mut(id) {
            e.link_prev = None;
            e.link_next = None;
        }
    }

    /// Remove `base` and every entry chained to it, walking backward then forward.
    ///
    /// A walk stops early at an entry that is gone or whose neighbour no longer points back at it:
    /// the rest of that side was already reclaimed by an invalidation. Returns the number of
    /// entries removed.
    pub(crate) fn recycle_linked(&mut self, base: EntryId) -> usize {
        let Some(first_next) = self.entry(base).map(|e| e.link_next) else {
            return 0;
        };
        let mut removed = 0;

        let mut cur = Some(base);
        while let Some(id) = cur {
            let Some(e) = self.entry(id) else {
                break;
            };
            let prev = e.link_prev.filter(|&p| self.entry(p).is_some());
            if let Some(p) = prev
                && self.entry(p).and_then(|pe| pe.link_next) != Some(id)
            {
                if let Some(e) = self.entry_mut(id) {
                    e.link_prev = None;
                }
                break;
            }
            self.remove(id);
            removed += 1;
            cur = prev;
        }

        let mut cur = first_next;
        while let Some(id) = cur {
            let Some(e) = self.entry(id) else {
                break;
            };
            let next = e.link_next.filter(|&n| self.entry(n).is_some());
            if let Some(n) = next
                && self.entry(n).and_then(|ne| ne.link_prev) != Some(id)
            {
                if let Some(e) = self.entry_mut(id) {
                    e.link_next = None;
                }
                break;
            }
            self.remove(id);
            removed += 1;
            cur = next;
        }

        removed
    }

    /// Demote the chain containing `base` to temp entries and dissolve its links.
    ///
    /// Used when recycling is blocked: the pass stays available for immediate re-use but can no
    /// longer grow or be treated as retained. Returns the number of entries demoted.
    pub(crate) fn mark_chain_temp(&mut self, base: EntryId) -> usize {
        let mut members = Vec::new();

        let mut cur = Some(base);
        while let Some(id) = cur {
            let Some(e) = self.entry(id) else {
                break;
            };
            members.push(id);
            cur = e.link_prev;
        }
        let mut cur = self.entry(base).and_then(|e| e.link_next);
        while let Some(id) = cur {
            let Some(e) = self.entry(id) else {
                break;
            };
            members.push(id);
            cur = e.link_next;
        }

        for &id in &members {
            if let Some(e) = self.entry_mut(id) {
                e.is_temp = true;
                e.link_prev = None;
                e.link_next = None;
            }
        }
        members.len()
    }

    /// Ids of the chain containing `id`, oldest first. Empty if `id` is gone.
    #[cfg(test)]
    pub(crate) fn chain_of(&self, id: EntryId) -> Vec<EntryId> {
        let mut head = id;
        if self.entry(id).is_none() {
            return Vec::new();
        }
        while let Some(p) = self.entry(head).and_then(|e| e.link_prev) {
            if self.entry(p).is_none() {
                break;
            }
            head = p;
        }
        let mut out = vec![head];
        let mut cur = self.entry(head).and_then(|e| e.link_next);
        while let Some(n) = cur {
            let Some(e) = self.entry(n) else {
                break;
            };
            out.push(n);
            cur = e.link_next;
        }
        out
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/chain.rs"]
mod tests;
