use parking_lot::RwLock;

use crate::cache::key::StageMask;
use crate::foundation::core::FrameRange;
use crate::foundation::error::{SeqCacheError, SeqCacheResult};

/// Stable strip identity. Cache keys compare strips by this id only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct StripId(pub u32);

/// What a strip produces; decides how timeline frames map onto source media frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StripKind {
    /// Single still image; every timeline frame shows media frame 0.
    Image,
    /// Movie with `len` source frames; frames before/after the media are held.
    Movie {
        /// Source frame count.
        len: u32,
    },
    /// Generated solid color.
    Color,
    /// Effect over other strips; has no source media of its own.
    Effect,
}

/// Editable timing and cache settings of a strip.
#[derive(Clone, Debug, PartialEq)]
pub struct StripTiming {
    /// Timeline frame where media frame 0 sits.
    pub start: f32,
    /// Visible (trimmed) extent on the timeline, inclusive.
    pub handles: FrameRange,
    /// Per-strip stage override. `None` defers to the editing-wide stored stages.
    pub cache_override: Option<StageMask>,
}

/// A timeline editing unit producing frames.
///
/// Shared as `Arc<Strip>` between the timeline and the cache. Timing lives behind a lock so edits
/// are visible to cache bookkeeping (timeline frame of an entry, invalidation ranges) without
/// rebuilding keys.
#[derive(Debug)]
pub struct Strip {
    id: StripId,
    kind: StripKind,
    timing: RwLock<StripTiming>,
}

impl Strip {
    /// Strip with validated timing.
    pub fn new(id: StripId, kind: StripKind, timing: StripTiming) -> SeqCacheResult<Self> {
        if !timing.start.is_finite() {
            return Err(SeqCacheError::validation("strip start must be finite"));
        }
        if timing.handles.start > timing.handles.end {
            return Err(SeqCacheError::validation(
                "strip left handle must be <= right handle",
            ));
        }
        if let StripKind::Movie { len: 0 } = kind {
            return Err(SeqCacheError::validation("movie strip must have frames"));
        }
        Ok(Self {
            id,
            kind,
            timing: RwLock::new(timing),
        })
    }

    /// Strip whose handles cover exactly its media, starting at `start`.
    pub fn movie(id: StripId, start: i32, len: u32) -> SeqCacheResult<Self> {
        let end = start.saturating_add(len as i32).saturating_sub(1);
        Self::new(
            id,
            StripKind::Movie { len },
            StripTiming {
                start: start as f32,
                handles: FrameRange::new(start, end)?,
                cache_override: None,
            },
        )
    }

    /// Stable identity.
    pub fn id(&self) -> StripId {
        self.id
    }

    /// What the strip produces.
    pub fn kind(&self) -> StripKind {
        self.kind
    }

    /// Whether the strip has no source media of its own.
    pub fn is_effect(&self) -> bool {
        matches!(self.kind, StripKind::Effect)
    }

    /// Snapshot of the current timing.
    pub fn timing(&self) -> StripTiming {
        self.timing.read().clone()
    }

    /// Timeline frame of media frame 0.
    pub fn start_frame(&self) -> f32 {
        self.timing.read().start
    }

    /// Visible extent on the timeline.
    pub fn handles(&self) -> FrameRange {
        self.timing.read().handles
    }

    /// Per-strip retained stages, if overridden.
    pub fn cache_override(&self) -> Option<StageMask> {
        self.timing.read().cache_override
    }

    /// Move the strip (media and handles) by `delta` frames.
    pub fn translate(&self, delta: i32) {
        let mut t = self.timing.write();
        t.start += delta as f32;
        t.handles = t.handles.shift(delta);
    }

    /// Trim the visible extent without moving the media.
    pub fn set_handles(&self, handles: FrameRange) {
        self.timing.write().handles = handles;
    }

    /// Override (or with `None`, stop overriding) the retained stages.
    pub fn set_cache_override(&self, mask: Option<StageMask>) {
        self.timing.write().cache_override = mask;
    }

    /// Source-media frame shown at `timeline_frame`.
    ///
    /// Still sources collapse to frame 0 and movies hold their first/last frame outside the media
    /// range, so repeated frames share one raw cache entry.
    pub fn media_frame_index(&self, timeline_frame: f32) -> f32 {
        let offset = timeline_frame - self.start_frame();
        match self.kind {
            StripKind::Image | StripKind::Color => 0.0,
            StripKind::Movie { len } => offset.floor().clamp(0.0, (len - 1) as f32),
            StripKind::Effect => offset,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/timeline/strip.rs"]
mod tests;
