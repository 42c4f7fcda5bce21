use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::foundation::core::FrameRange;
use crate::timeline::context::{ContextFingerprint, RenderContext};
use crate::timeline::strip::{Strip, StripId};

/// Processing phase a cached image belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Decoded source media.
    Raw,
    /// Source after per-strip transforms/color/modifiers.
    Preprocessed,
    /// Strip blended over everything below it.
    Composite,
    /// Fully composited timeline output.
    FinalOut,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 4] = [
        Stage::Raw,
        Stage::Preprocessed,
        Stage::Composite,
        Stage::FinalOut,
    ];

    /// Bit of this stage in a [`StageMask`].
    pub fn bit(self) -> u8 {
        match self {
            Stage::Raw => 1 << 0,
            Stage::Preprocessed => 1 << 1,
            Stage::Composite => 1 << 2,
            Stage::FinalOut => 1 << 3,
        }
    }

    /// Short tag used in disk-tier file names.
    pub fn tag(self) -> &'static str {
        match self {
            Stage::Raw => "raw",
            Stage::Preprocessed => "pre",
            Stage::Composite => "comp",
            Stage::FinalOut => "final",
        }
    }

    /// Inverse of [`Stage::tag`].
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.tag() == tag)
    }
}

/// Set of stages, e.g. which stages are retained or which ones an edit invalidates.
///
/// Serialized as a list of stage names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(from = "Vec<Stage>", into = "Vec<Stage>")]
pub struct StageMask(u8);

impl StageMask {
    /// No stage.
    pub const NONE: StageMask = StageMask(0);
    /// Every stage.
    pub const ALL: StageMask = StageMask(0b1111);
    /// Per-strip intermediate stages.
    pub const SOURCES: StageMask = StageMask(0b0111);
    /// Final output only.
    pub const FINAL_OUT: StageMask = StageMask(1 << 3);

    /// Whether `stage` is in the set.
    pub fn contains(self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    /// Whether both sets share a stage.
    pub fn intersects(self, other: StageMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Stages in either set.
    pub fn union(self, other: StageMask) -> StageMask {
        StageMask(self.0 | other.0)
    }

    /// Stages in both sets.
    pub fn intersection(self, other: StageMask) -> StageMask {
        StageMask(self.0 & other.0)
    }

    /// This set plus `stage`.
    pub fn with(self, stage: Stage) -> StageMask {
        StageMask(self.0 | stage.bit())
    }

    /// Whether the set has no stage.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Stages in the set, in pipeline order.
    pub fn stages(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl From<Stage> for StageMask {
    fn from(stage: Stage) -> Self {
        StageMask(stage.bit())
    }
}

impl From<Vec<Stage>> for StageMask {
    fn from(stages: Vec<Stage>) -> Self {
        stages.into_iter().fold(StageMask::NONE, StageMask::with)
    }
}

impl From<StageMask> for Vec<Stage> {
    fn from(mask: StageMask) -> Self {
        mask.stages().collect()
    }
}

impl std::ops::BitOr for Stage {
    type Output = StageMask;

    fn bitor(self, rhs: Stage) -> StageMask {
        StageMask::from(self).with(rhs)
    }
}

impl std::ops::BitOr<Stage> for StageMask {
    type Output = StageMask;

    fn bitor(self, rhs: Stage) -> StageMask {
        self.with(rhs)
    }
}

/// Identity of one cached image.
///
/// Equality and hashing cover strip identity, `frame_index` (by bit pattern), stage and the
/// full context fingerprint. `task_id` rides along for temp cleanup but is not part of identity.
#[derive(Clone, Debug)]
pub struct CacheKey {
    strip: Arc<Strip>,
    frame_index: f32,
    stage: Stage,
    context: ContextFingerprint,
    task_id: u16,
}

impl CacheKey {
    /// Key for `strip` at `timeline_frame` and `stage`, rendered under `ctx`.
    pub fn new(ctx: &RenderContext, strip: &Arc<Strip>, timeline_frame: f32, stage: Stage) -> Self {
        Self {
            strip: Arc::clone(strip),
            frame_index: frame_index_for(strip, timeline_frame, stage),
            stage,
            context: ctx.fingerprint(),
            task_id: ctx.task_id,
        }
    }

    /// Strip the image belongs to.
    pub fn strip(&self) -> &Arc<Strip> {
        &self.strip
    }

    /// Id of [`CacheKey::strip`].
    pub fn strip_id(&self) -> StripId {
        self.strip.id()
    }

    /// Media-relative frame for raw entries of source strips, strip-start offset otherwise.
    pub fn frame_index(&self) -> f32 {
        self.frame_index
    }

    /// Processing phase of the image.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Render parameters the image was made with.
    pub fn context(&self) -> &ContextFingerprint {
        &self.context
    }

    /// Render task that made the image.
    pub fn task_id(&self) -> u16 {
        self.task_id
    }

    /// Timeline frame of this entry relative to where the strip currently starts.
    ///
    /// For raw entries this is the media frame placed at the strip start, not necessarily the frame
    /// that requested it.
    pub fn timeline_frame(&self) -> i32 {
        (self.frame_index + self.strip.start_frame()) as i32
    }
}

/// Map a timeline frame to the frame index stored in a key.
///
/// Raw images of source strips use the media frame so held/still frames share one entry.
pub(crate) fn frame_index_for(strip: &Strip, timeline_frame: f32, stage: Stage) -> f32 {
    let idx = if stage == Stage::Raw && !strip.is_effect() {
        strip.media_frame_index(timeline_frame)
    } else {
        timeline_frame - strip.start_frame()
    };
    // -0.0 and 0.0 must hash alike.
    if idx == 0.0 { 0.0 } else { idx }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.strip.id() == other.strip.id()
            && self.frame_index.to_bits() == other.frame_index.to_bits()
            && self.stage == other.stage
            && self.context == other.context
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.strip.id().hash(state);
        self.frame_index.to_bits().hash(state);
        self.stage.hash(state);
        self.context.hash(state);
    }
}

/// Which entries an edit of one strip invalidates, as seen from another (or the same) strip.
///
/// Final-output entries in `mask` match inside `final_range`: the overlap of both strips'
/// handles, or all of the changed strip's handles when forced. Intermediate entries in `mask`
/// match only if they belong to `strip` and lie within the changed strip's handles.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InvalidationScope {
    /// Strip whose intermediate entries are in scope.
    pub strip: StripId,
    /// Start frame of `strip` when the scope was taken.
    pub strip_start: f32,
    /// Stages in scope.
    pub mask: StageMask,
    /// Changed strip's handles, for intermediate stages.
    pub source_range: FrameRange,
    /// Frames where final output is dropped. `None` if the strips do not overlap.
    pub final_range: Option<FrameRange>,
}

impl InvalidationScope {
    /// Scope of an edit of `changed`, as seen from `strip`.
    pub fn new(strip: &Strip, changed: &Strip, mask: StageMask, force_changed_range: bool) -> Self {
        let changed_range = changed.handles();
        let final_range = if force_changed_range {
            Some(changed_range)
        } else {
            changed_range.intersect(strip.handles())
        };
        Self {
            strip: strip.id(),
            strip_start: strip.start_frame(),
            mask,
            source_range: changed_range,
            final_range,
        }
    }

    /// Whether an entry of `strip` at `timeline_frame` and `stage` is in scope.
    pub fn matches(&self, strip: StripId, stage: Stage, timeline_frame: i32) -> bool {
        if !self.mask.contains(stage) {
            return false;
        }
        if stage == Stage::FinalOut {
            return self
                .final_range
                .is_some_and(|r| r.contains(timeline_frame));
        }
        strip == self.strip && self.source_range.contains(timeline_frame)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/key.rs"]
mod tests;
