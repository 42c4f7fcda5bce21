use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use parking_lot::RwLock;

use crate::foundation::core::FrameRange;
use crate::timeline::context::RenderContext;
use crate::timeline::strip::{Strip, StripId};

/// Queries the cache needs from the background prefetch job of one timeline.
pub trait PrefetchMonitor: Send + Sync {
    /// Whether a prefetch job is currently rendering.
    fn is_running(&self) -> bool;

    /// Frame window the running job covers.
    fn frame_range(&self) -> FrameRange;

    /// Stop the job. Called before the cache is cleared.
    fn stop(&self);

    /// Context of the interactive session a prefetch render was derived from.
    fn original_context(&self, ctx: &RenderContext) -> RenderContext;

    /// Strip of the interactive session matching a strip of the prefetch copy.
    fn original_strip(&self, strip: &Arc<Strip>) -> Option<Arc<Strip>>;
}

/// No prefetch job ever runs; redirection is the identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPrefetch;

impl PrefetchMonitor for NoPrefetch {
    fn is_running(&self) -> bool {
        false
    }

    fn frame_range(&self) -> FrameRange {
        FrameRange { start: 0, end: 0 }
    }

    fn stop(&self) {}

    fn original_context(&self, ctx: &RenderContext) -> RenderContext {
        ctx.clone()
    }

    fn original_strip(&self, strip: &Arc<Strip>) -> Option<Arc<Strip>> {
        Some(Arc::clone(strip))
    }
}

/// Prefetch state driven by whoever owns the prefetch job.
///
/// Clones share state. Strips of the prefetch copy are mapped back through an explicit table;
/// strips without an entry map to themselves.
#[derive(Clone, Debug, Default)]
pub struct PrefetchWindow {
    running: Arc<AtomicBool>,
    start: Arc<AtomicI32>,
    end: Arc<AtomicI32>,
    originals: Arc<RwLock<HashMap<StripId, Arc<Strip>>>>,
}

impl PrefetchWindow {
    /// Stopped window with no strip mappings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the job as running over `range`.
    pub fn start(&self, range: FrameRange) {
        self.start.store(range.start, Ordering::Relaxed);
        self.end.store(range.end, Ordering::Relaxed);
        self.running.store(true, Ordering::Release);
    }

    /// Redirect `prefetch_copy` to `original` when caching.
    pub fn map_strip(&self, prefetch_copy: StripId, original: Arc<Strip>) {
        self.originals.write().insert(prefetch_copy, original);
    }
}

impl PrefetchMonitor for PrefetchWindow {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn frame_range(&self) -> FrameRange {
        FrameRange {
            start: self.start.load(Ordering::Relaxed),
            end: self.end.load(Ordering::Relaxed),
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn original_context(&self, ctx: &RenderContext) -> RenderContext {
        RenderContext {
            is_prefetch_render: false,
            ..ctx.clone()
        }
    }

    fn original_strip(&self, strip: &Arc<Strip>) -> Option<Arc<Strip>> {
        match self.originals.read().get(&strip.id()) {
            Some(orig) => Some(Arc::clone(orig)),
            None => Some(Arc::clone(strip)),
        }
    }
}
