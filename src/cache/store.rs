use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::key::{CacheKey, InvalidationScope, Stage};
use crate::foundation::core::FrameRGBA;

/// Non-owning handle to a store entry.
///
/// Slots are reused, so a handle also carries the slot generation: a handle to a removed entry
/// never resolves to whatever took its slot afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct EntryId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) key: CacheKey,
    pub(crate) frame: Arc<FrameRGBA>,
    /// Not eligible for retention: never linked, never a recycle candidate.
    pub(crate) is_temp: bool,
    pub(crate) link_prev: Option<EntryId>,
    pub(crate) link_next: Option<EntryId>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Snapshot of what the store currently holds, handed to memory monitors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheUsage {
    /// Live entries (temp and retained).
    pub entries: usize,
    /// Sum of artifact sizes of live entries.
    pub resident_bytes: u64,
}

/// Cache counters. Monotonic counters count since creation or the last `clear`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Live entries.
    pub entries: usize,
    /// Live temp entries.
    pub temp_entries: usize,
    /// Bytes held by live entries.
    pub resident_bytes: u64,
    /// Memory lookups that found an image.
    pub hits: u64,
    /// Memory lookups that found nothing.
    pub misses: u64,
    /// Images served by the disk tier.
    pub disk_hits: u64,
    /// Images written to the disk tier.
    pub disk_writes: u64,
    /// Images inserted.
    pub inserted: u64,
    /// Stores dropped because the key was already cached.
    pub duplicates_dropped: u64,
    /// Passes evicted by recycling.
    pub recycled_chains: u64,
    /// Entries evicted by recycling.
    pub recycled_entries: u64,
    /// Passes downgraded to temp because recycling could not make room.
    pub temp_downgrades: u64,
    /// Entries dropped by invalidation.
    pub invalidated: u64,
}

/// Key -> image table plus the pass chain bookkeeping.
///
/// Not synchronized; the owning cache wraps it in a mutex and every method here runs with that
/// lock held.
#[derive(Debug, Default)]
pub(crate) struct CacheStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: HashMap<CacheKey, EntryId>,
    /// Tail of the chain currently being built. `None` starts a new chain on the next insert.
    last_inserted: Option<EntryId>,
    resident_bytes: u64,
    pub(crate) stats: CacheStats,
}

impl CacheStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn usage(&self) -> CacheUsage {
        CacheUsage {
            entries: self.index.len(),
            resident_bytes: self.resident_bytes,
        }
    }

    pub(crate) fn stats(&self) -> CacheStats {
        let mut st = self.stats;
        st.entries = self.index.len();
        st.temp_entries = self.iter().filter(|(_, e)| e.is_temp).count();
        st.resident_bytes = self.resident_bytes;
        st
    }

    pub(crate) fn last_inserted(&self) -> Option<EntryId> {
        self.last_inserted
    }

    pub(crate) fn reset_chain(&mut self) {
        self.last_inserted = None;
    }

    pub(crate) fn entry(&self, id: EntryId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub(crate) fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    #[cfg(test)]
    pub(crate) fn id_of(&self, key: &CacheKey) -> Option<EntryId> {
        self.index.get(key).copied()
    }

    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.index.contains_key(key)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.entry.as_ref().map(|e| {
                (
                    EntryId {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    e,
                )
            })
        })
    }

    /// Handles of all live entries; for scans that remove while iterating.
    pub(crate) fn ids(&self) -> Vec<EntryId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Look up an image, handing out a new reference on hit.
    pub(crate) fn get(&mut self, key: &CacheKey) -> Option<Arc<FrameRGBA>> {
        let found = self
            .index
            .get(key)
            .and_then(|&id| self.entry(id))
            .map(|e| Arc::clone(&e.frame));
        if found.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        found
    }

    /// Insert an entry for a key that is not present yet.
    ///
    /// Retained entries are appended to the current chain. A final-output entry closes the chain so
    /// the next insert starts a new pass. If the key is already present the new reference is
    /// dropped and `None` is returned (first insert wins).
    pub(crate) fn insert(
        &mut self,
        key: CacheKey,
        frame: Arc<FrameRGBA>,
        retain: bool,
    ) -> Option<EntryId> {
        if self.index.contains_key(&key) {
            debug_assert!(false, "duplicate cache key inserted: {key:?}");
            self.stats.duplicates_dropped += 1;
            return None;
        }

        let stage = key.stage();
        let prev = if retain {
            self.last_inserted.filter(|&id| self.entry(id).is_some())
        } else {
            None
        };
        let bytes = frame.byte_len() as u64;
        let id = self.alloc(Entry {
            key: key.clone(),
            frame,
            is_temp: !retain,
            link_prev: prev,
            link_next: None,
        });
        self.index.insert(key, id);
        self.resident_bytes += bytes;
        self.stats.inserted += 1;

        if retain {
            if let Some(p) = prev
                && let Some(e) = self.entry_mut(p)
            {
                e.link_next = Some(id);
            }
            self.last_inserted = Some(id);
        }

        if stage == Stage::FinalOut {
            self.last_inserted = None;
        }
        Some(id)
    }

    /// Unlink and drop one entry. Returns it so callers can inspect what went away.
    pub(crate) fn remove(&mut self, id: EntryId) -> Option<Entry> {
        self.entry(id)?;
        self.unlink(id);

        let slot = &mut self.slots[id.index as usize];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        self.index.remove(&entry.key);
        self.resident_bytes = self
            .resident_bytes
            .saturating_sub(entry.frame.byte_len() as u64);
        if self.last_inserted == Some(id) {
            self.last_inserted = None;
        }
        Some(entry)
    }

    /// Drop everything. Counters restart.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.last_inserted = None;
        self.resident_bytes = 0;
        self.stats = CacheStats::default();
    }

    /// Drop temp entries of `task_id` that no longer serve `timeline_frame`.
    ///
    /// An entry is stale if the frame index it would get at `timeline_frame` differs from the one it
    /// was stored under, or `timeline_frame` lies outside its strip's handles. Comparing frame
    /// indices keeps raw images that are shared by many timeline frames.
    pub(crate) fn remove_temp_entries(&mut self, task_id: u16, timeline_frame: i32) -> usize {
        let mut removed = 0;
        for id in self.ids() {
            let Some(e) = self.entry(id) else {
                continue;
            };
            if !e.is_temp || e.key.task_id() != task_id {
                continue;
            }
            let strip = e.key.strip();
            let frame_index = crate::cache::key::frame_index_for(
                strip,
                timeline_frame as f32,
                e.key.stage(),
            );
            let stale = frame_index.to_bits() != e.key.frame_index().to_bits()
                || !strip.handles().contains(timeline_frame);
            if stale {
                self.remove(id);
                removed += 1;
            }
        }
        removed
    }

    /// Drop entries matching `scope` and close the current chain.
    pub(crate) fn invalidate(&mut self, scope: &InvalidationScope) -> usize {
        let mut removed = 0;
        for id in self.ids() {
            let Some(e) = self.entry(id) else {
                continue;
            };
            if scope.matches(e.key.strip_id(), e.key.stage(), e.key.timeline_frame()) {
                self.remove(id);
                removed += 1;
            }
        }
        self.last_inserted = None;
        self.stats.invalidated += removed as u64;
        removed
    }

    fn alloc(&mut self, entry: Entry) -> EntryId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return EntryId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        EntryId {
            index,
            generation: 0,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/store.rs"]
mod tests;
