//! Per-timeline cache facade.
//!
//! An [`Editing`] session owns the cache settings, the playhead and the collaborators the cache
//! consults (prefetch job, memory monitor, disk tier). The cache itself is created on first use and
//! guarded by one mutex. That mutex is never held across disk I/O, and callers only ever hold
//! `Arc<FrameRGBA>` handles, never the lock.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::cache::disk::{DirDiskCache, DiskCache};
use crate::cache::key::{CacheKey, InvalidationScope, Stage, StageMask};
use crate::cache::memory::{CacheMemory, MemoryMonitor};
use crate::cache::prefetch::{NoPrefetch, PrefetchMonitor};
use crate::cache::recycle::RecyclePolicy;
use crate::cache::store::{CacheStats, CacheStore};
use crate::config::CacheConfig;
use crate::foundation::core::FrameRGBA;
use crate::foundation::error::SeqCacheResult;
use crate::timeline::context::{RenderContext, SceneId};
use crate::timeline::strip::Strip;

/// Receives a snapshot walk over the cache, e.g. to draw cache lines on a timeline.
///
/// Both callbacks run with the cache lock held and must not call back into the cache.
pub trait CacheVisitor {
    /// Called once with the number of entries. Returning `true` skips the walk.
    fn init(&mut self, count: usize) -> bool;

    /// Called once per entry. Returning `true` stops the walk.
    fn visit(&mut self, strip: &Arc<Strip>, timeline_frame: i32, stage: Stage) -> bool;
}

/// The cache instance of one timeline.
struct SeqCache {
    store: Mutex<CacheStore>,
    disk: Mutex<Option<Arc<dyn DiskCache>>>,
}

impl SeqCache {
    fn new(disk: Option<Arc<dyn DiskCache>>) -> Self {
        Self {
            store: Mutex::new(CacheStore::new()),
            disk: Mutex::new(disk),
        }
    }
}

/// One timeline's editing session, as far as the image cache is concerned.
pub struct Editing {
    scene: SceneId,
    config: RwLock<CacheConfig>,
    playback_frame: AtomicI32,
    prefetch: Arc<dyn PrefetchMonitor>,
    memory: Arc<dyn MemoryMonitor>,
    disk_override: Option<Arc<dyn DiskCache>>,
    cache: OnceLock<SeqCache>,
}

impl Editing {
    /// Session for `scene` with no prefetch job and the cache's own memory figure.
    pub fn new(scene: SceneId, config: CacheConfig) -> SeqCacheResult<Self> {
        config.validate()?;
        Ok(Self {
            scene,
            config: RwLock::new(config),
            playback_frame: AtomicI32::new(0),
            prefetch: Arc::new(NoPrefetch),
            memory: Arc::new(CacheMemory),
            disk_override: None,
            cache: OnceLock::new(),
        })
    }

    /// Consult `prefetch` for redirection and window-aware recycling.
    pub fn with_prefetch(mut self, prefetch: Arc<dyn PrefetchMonitor>) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Compare `memory`'s figure against the budget.
    pub fn with_memory_monitor(mut self, memory: Arc<dyn MemoryMonitor>) -> Self {
        self.memory = memory;
        self
    }

    /// Use `disk` as the disk tier instead of opening the configured directory.
    pub fn with_disk_cache(mut self, disk: Arc<dyn DiskCache>) -> Self {
        self.disk_override = Some(disk);
        self
    }

    /// Scene this session caches.
    pub fn scene(&self) -> SceneId {
        self.scene
    }

    /// Current cache settings.
    pub fn config(&self) -> CacheConfig {
        self.config.read().clone()
    }

    /// Replace the cache settings. Entries already cached keep their retained/temp state.
    pub fn set_config(&self, config: CacheConfig) -> SeqCacheResult<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    /// Playhead used to rank recycle candidates.
    pub fn playback_frame(&self) -> i32 {
        self.playback_frame.load(Ordering::Relaxed)
    }

    /// Move the playhead.
    pub fn set_playback_frame(&self, frame: i32) {
        self.playback_frame.store(frame, Ordering::Relaxed);
    }

    /// Look up an image, falling back to the disk tier on a memory miss.
    ///
    /// Images read from disk are put back into memory; final-output images only if recycling
    /// makes room for them.
    pub fn fetch(
        &self,
        ctx: &RenderContext,
        strip: &Arc<Strip>,
        timeline_frame: f32,
        stage: Stage,
    ) -> Option<Arc<FrameRGBA>> {
        if ctx.bypasses_cache() {
            return None;
        }
        let (ctx, strip) = self.resolve(ctx, strip)?;
        let cache = self.cache();
        let key = CacheKey::new(&ctx, &strip, timeline_frame, stage);

        if let Some(frame) = cache.store.lock().get(&key) {
            return Some(frame);
        }
        if ctx.for_render {
            return None;
        }

        let disk = self.disk(cache)?;
        let frame = match disk.read(&key) {
            Ok(Some(frame)) => Arc::new(frame),
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(error = %err, "disk cache read failed");
                return None;
            }
        };

        let retain = self.retains(&ctx, &strip, stage);
        let policy = self.policy();
        let mut store = cache.store.lock();
        store.stats.disk_hits += 1;
        if (stage != Stage::FinalOut || policy.run(&mut store)) && !store.contains(&key) {
            store.insert(key, Arc::clone(&frame), retain);
        }
        Some(frame)
    }

    /// Cache an image. A key that is already cached keeps its first image.
    ///
    /// Retained images are also written to the disk tier, if one is enabled.
    pub fn store(
        &self,
        ctx: &RenderContext,
        strip: &Arc<Strip>,
        timeline_frame: f32,
        stage: Stage,
        frame: Arc<FrameRGBA>,
    ) {
        if ctx.bypasses_cache() {
            return;
        }
        let Some((ctx, strip)) = self.resolve(ctx, strip) else {
            return;
        };
        let cache = self.cache();
        let key = CacheKey::new(&ctx, &strip, timeline_frame, stage);
        let retain = self.retains(&ctx, &strip, stage);

        {
            let mut store = cache.store.lock();
            if store.contains(&key) {
                store.stats.duplicates_dropped += 1;
                return;
            }
            store.insert(key.clone(), Arc::clone(&frame), retain);
        }

        if !retain {
            return;
        }
        let Some(disk) = self.disk(cache) else {
            return;
        };
        match disk.write(&key, &frame) {
            Ok(()) => {
                cache.store.lock().stats.disk_writes += 1;
                if let Err(err) = disk.enforce_limits() {
                    tracing::warn!(error = %err, "disk cache size enforcement failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "disk cache write failed"),
        }
    }

    /// Recycle down to budget, then cache the image.
    ///
    /// If the budget cannot be met the pass being built is downgraded to temp and the image is not
    /// cached; returns `false` in that case.
    pub fn store_if_capacity(
        &self,
        ctx: &RenderContext,
        strip: &Arc<Strip>,
        timeline_frame: f32,
        stage: Stage,
        frame: Arc<FrameRGBA>,
    ) -> bool {
        if ctx.bypasses_cache() {
            return false;
        }
        let Some((ctx, strip)) = self.resolve(ctx, strip) else {
            return false;
        };

        if self.recycle() {
            self.store(&ctx, &strip, timeline_frame, stage, frame);
            return true;
        }

        let mut store = self.cache().store.lock();
        if let Some(tail) = store.last_inserted() {
            let downgraded = store.mark_chain_temp(tail);
            if downgraded > 0 {
                store.stats.temp_downgrades += 1;
                tracing::debug!(downgraded, "over budget: current pass downgraded to temp");
            }
        }
        store.reset_chain();
        false
    }

    /// Evict whole passes until memory use is within budget. Returns `false` if that is not
    /// possible right now.
    pub fn recycle(&self) -> bool {
        let cache = self.cache();
        let policy = self.policy();
        let mut store = cache.store.lock();
        policy.run(&mut store)
    }

    /// Drop temp entries of render task `task_id` that do not serve `timeline_frame`.
    #[tracing::instrument(skip(self))]
    pub fn remove_temp_entries(&self, task_id: u16, timeline_frame: i32) -> usize {
        let Some(cache) = self.cache.get() else {
            return 0;
        };
        let removed = cache
            .store
            .lock()
            .remove_temp_entries(task_id, timeline_frame);
        tracing::trace!(removed, "temp entries removed");
        removed
    }

    /// Drop entries made stale by an edit of `changed`, as seen from `strip`.
    ///
    /// Entries of `strip` with a stage in `mask` are dropped within `changed`'s handles. Final
    /// output is dropped where both strips overlap, or across all of `changed`'s handles when
    /// `force_changed_range` is set. Matching disk-tier files go too.
    #[tracing::instrument(skip(self, strip, changed), fields(strip_id = strip.id().0, changed_id = changed.id().0))]
    pub fn invalidate(
        &self,
        strip: &Strip,
        changed: &Strip,
        mask: StageMask,
        force_changed_range: bool,
    ) -> usize {
        let scope = InvalidationScope::new(strip, changed, mask, force_changed_range);
        let Some(cache) = self.cache.get() else {
            // Nothing in memory, but files of an earlier session may be stale.
            if let Some(disk) = self.idle_disk() {
                invalidate_disk(disk.as_ref(), &scope);
            }
            return 0;
        };

        if let Some(disk) = self.disk(cache) {
            invalidate_disk(disk.as_ref(), &scope);
        }

        let removed = cache.store.lock().invalidate(&scope);
        tracing::debug!(removed, "cache entries invalidated");
        removed
    }

    /// Stop prefetching and drop every entry. The disk tier is left alone.
    #[tracing::instrument(skip(self))]
    pub fn clear(&self) {
        self.prefetch.stop();
        let Some(cache) = self.cache.get() else {
            return;
        };
        let mut store = cache.store.lock();
        let entries = store.len();
        store.clear();
        tracing::debug!(entries, "cache cleared");
    }

    /// Tear the cache instance down, releasing all images and the disk-tier handle.
    ///
    /// The next cache operation creates a fresh instance.
    pub fn destroy(&mut self) {
        if let Some(cache) = self.cache.take() {
            tracing::debug!(entries = cache.store.lock().len(), "cache destroyed");
        }
    }

    /// Walk all entries under the lock. Closes the pass being built.
    pub fn iterate(&self, visitor: &mut dyn CacheVisitor) {
        let Some(cache) = self.cache.get() else {
            return;
        };
        let mut store = cache.store.lock();
        let mut stop = visitor.init(store.len());
        for (_, e) in store.iter() {
            if stop {
                break;
            }
            stop = visitor.visit(e.key.strip(), e.key.timeline_frame(), e.key.stage());
        }
        store.reset_chain();
    }

    /// Counters of the current cache instance. Zero before first use.
    pub fn stats(&self) -> CacheStats {
        self.cache
            .get()
            .map(|c| c.store.lock().stats())
            .unwrap_or_default()
    }

    /// Number of live entries, temp ones included.
    pub fn len(&self) -> usize {
        self.cache.get().map_or(0, |c| c.store.lock().len())
    }

    /// Whether no entry is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cache(&self) -> &SeqCache {
        self.cache.get_or_init(|| {
            tracing::debug!(scene = self.scene.0, "creating sequencer cache");
            SeqCache::new(self.disk_override.clone())
        })
    }

    /// Requests from the prefetch job are cached under the interactive session's context and
    /// strips. `None` if the strip has no interactive counterpart.
    fn resolve(
        &self,
        ctx: &RenderContext,
        strip: &Arc<Strip>,
    ) -> Option<(RenderContext, Arc<Strip>)> {
        if !ctx.is_prefetch_render {
            return Some((ctx.clone(), Arc::clone(strip)));
        }
        let strip = self.prefetch.original_strip(strip)?;
        Some((self.prefetch.original_context(ctx), strip))
    }

    fn retains(&self, ctx: &RenderContext, strip: &Strip, stage: Stage) -> bool {
        !ctx.for_render
            && self
                .config
                .read()
                .effective_stages(strip.cache_override())
                .contains(stage)
    }

    fn policy(&self) -> RecyclePolicy<'_> {
        let cfg = self.config.read();
        RecyclePolicy {
            budget_bytes: cfg.memory_budget_bytes(),
            memory: self.memory.as_ref(),
            prefetch: cfg.prefetch.then_some(self.prefetch.as_ref()),
            playback_frame: self.playback_frame(),
        }
    }

    /// Disk tier for a session without a cache instance. Never creates directories.
    fn idle_disk(&self) -> Option<Arc<dyn DiskCache>> {
        if let Some(disk) = &self.disk_override {
            return Some(Arc::clone(disk));
        }
        let cfg = self.config.read().disk.clone()?;
        let disk = DirDiskCache::existing(&cfg, self.scene)?;
        Some(Arc::new(disk))
    }

    /// Disk tier handle, opened on first use. `None` when no disk tier is configured or it failed
    /// to open.
    fn disk(&self, cache: &SeqCache) -> Option<Arc<dyn DiskCache>> {
        let mut slot = cache.disk.lock();
        if let Some(disk) = slot.as_ref() {
            return Some(Arc::clone(disk));
        }
        let cfg = self.config.read().disk.clone()?;
        match DirDiskCache::open(&cfg, self.scene) {
            Ok(disk) => {
                tracing::debug!(dir = %disk.root().display(), "disk cache opened");
                let disk: Arc<dyn DiskCache> = Arc::new(disk);
                *slot = Some(Arc::clone(&disk));
                Some(disk)
            }
            Err(err) => {
                tracing::warn!(error = %err, "disk cache unavailable");
                None
            }
        }
    }
}

fn invalidate_disk(disk: &dyn DiskCache, scope: &InvalidationScope) {
    match disk.invalidate(scope) {
        Ok(files) => tracing::trace!(files, "disk cache files invalidated"),
        Err(err) => tracing::warn!(error = %err, "disk cache invalidation failed"),
    }
}

impl std::fmt::Debug for Editing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editing")
            .field("scene", &self.scene)
            .field("config", &*self.config.read())
            .field("playback_frame", &self.playback_frame())
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "../tests/unit/sequencer.rs"]
mod tests;
