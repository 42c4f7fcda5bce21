//! Recycling: which pass to evict when the memory budget is exceeded.
//!
//! Only chain tails are candidates. Of those, the leftmost and rightmost (by timeline frame) are
//! considered. While a prefetch job runs, a candidate outside its window is preferred and nothing
//! is evicted if both lie inside it. Otherwise the candidate farther from the playhead goes.

use crate::cache::memory::MemoryMonitor;
use crate::cache::prefetch::PrefetchMonitor;
use crate::cache::store::{CacheStore, EntryId};
use crate::foundation::core::FrameRange;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub(crate) id: EntryId,
    pub(crate) timeline_frame: i32,
}

/// Inputs of one recycling run.
pub(crate) struct RecyclePolicy<'a> {
    pub(crate) budget_bytes: u64,
    pub(crate) memory: &'a dyn MemoryMonitor,
    /// `None` when prefetch-aware caching is disabled.
    pub(crate) prefetch: Option<&'a dyn PrefetchMonitor>,
    pub(crate) playback_frame: i32,
}

impl RecyclePolicy<'_> {
    pub(crate) fn is_over_budget(&self, store: &CacheStore) -> bool {
        self.memory.used_bytes(&store.usage()) > self.budget_bytes
    }

    /// Recycle whole passes until usage is within budget.
    ///
    /// Returns `false` if usage is still over budget and nothing more may be evicted.
    pub(crate) fn run(&self, store: &mut CacheStore) -> bool {
        while self.is_over_budget(store) {
            let Some(victim) = self.pick(store) else {
                tracing::debug!(
                    entries = store.len(),
                    "recycle blocked: no evictable pass"
                );
                return false;
            };
            let removed = store.recycle_linked(victim.id);
            store.stats.recycled_chains += 1;
            store.stats.recycled_entries += removed as u64;
            tracing::trace!(
                frame = victim.timeline_frame,
                removed,
                "recycled pass"
            );
            if removed == 0 {
                // The candidate could not be removed; scanning again would pick it again.
                return false;
            }
        }
        true
    }

    fn pick(&self, store: &CacheStore) -> Option<Candidate> {
        let (left, right) = find_candidates(store)?;
        let window = self
            .prefetch
            .filter(|p| p.is_running())
            .map(|p| p.frame_range());
        choose_candidate(left, right, window, self.playback_frame)
    }
}

/// Leftmost and rightmost chain tails among retained entries.
pub(crate) fn find_candidates(store: &CacheStore) -> Option<(Candidate, Candidate)> {
    let mut left: Option<Candidate> = None;
    let mut right: Option<Candidate> = None;

    for (id, e) in store.iter() {
        if e.is_temp || e.link_next.is_some() {
            continue;
        }
        let c = Candidate {
            id,
            timeline_frame: e.key.timeline_frame(),
        };
        if left.is_none_or(|l| c.timeline_frame < l.timeline_frame) {
            left = Some(c);
        }
        if right.is_none_or(|r| c.timeline_frame > r.timeline_frame) {
            right = Some(c);
        }
    }

    Some((left?, right?))
}

/// Pick one of two candidates.
///
/// With an active prefetch `window`, the first candidate outside the window wins and `None` means
/// both are needed by the prefetch job. Without one, the candidate farther from `playback_frame`
/// wins; ties go to the right.
pub(crate) fn choose_candidate(
    left: Candidate,
    right: Candidate,
    window: Option<FrameRange>,
    playback_frame: i32,
) -> Option<Candidate> {
    if let Some(w) = window {
        return [left, right]
            .into_iter()
            .find(|c| !w.contains(c.timeline_frame));
    }

    let (l, r) = if left.timeline_frame > right.timeline_frame {
        (right, left)
    } else {
        (left, right)
    };
    let l_diff = i64::from(playback_frame) - i64::from(l.timeline_frame);
    let r_diff = i64::from(r.timeline_frame) - i64::from(playback_frame);
    if l_diff > r_diff { Some(l) } else { Some(r) }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/recycle.rs"]
mod tests;
