use std::collections::HashMap;

use super::*;
use crate::cache::key::InvalidationScope;
use crate::cache::memory::SharedMemoryGauge;
use crate::cache::prefetch::PrefetchWindow;
use crate::foundation::core::FrameRange;
use crate::foundation::error::SeqCacheError;
use crate::timeline::strip::StripId;

/// In-memory disk tier recording what the cache asks of it.
#[derive(Default)]
struct MemDisk {
    files: Mutex<HashMap<CacheKey, FrameRGBA>>,
    fail_writes: bool,
}

impl DiskCache for MemDisk {
    fn read(&self, key: &CacheKey) -> SeqCacheResult<Option<FrameRGBA>> {
        Ok(self.files.lock().get(key).cloned())
    }

    fn write(&self, key: &CacheKey, frame: &FrameRGBA) -> SeqCacheResult<()> {
        if self.fail_writes {
            return Err(SeqCacheError::disk("disk full"));
        }
        self.files.lock().insert(key.clone(), frame.clone());
        Ok(())
    }

    fn invalidate(&self, scope: &InvalidationScope) -> SeqCacheResult<usize> {
        let mut files = self.files.lock();
        let before = files.len();
        files.retain(|k, _| !scope.matches(k.strip_id(), k.stage(), k.timeline_frame()));
        Ok(before - files.len())
    }

    fn enforce_limits(&self) -> SeqCacheResult<usize> {
        Ok(0)
    }
}

fn ctx() -> RenderContext {
    RenderContext::preview(SceneId(1), 4, 4)
}

fn strip(id: u32, start: i32, len: u32) -> Arc<Strip> {
    Arc::new(Strip::movie(StripId(id), start, len).unwrap())
}

fn frame(v: u8) -> Arc<FrameRGBA> {
    Arc::new(FrameRGBA::solid(4, 4, [v, v, v, 255]))
}

fn editing() -> Editing {
    Editing::new(SceneId(1), CacheConfig::default()).unwrap()
}

#[test]
fn cache_is_created_lazily() {
    let ed = editing();
    assert!(ed.cache.get().is_none());
    assert!(ed.fetch(&ctx(), &strip(1, 0, 10), 0.0, Stage::Raw).is_none());
    assert!(ed.cache.get().is_some());
}

#[test]
fn bypass_flags_skip_the_cache() {
    let ed = editing();
    let s = strip(1, 0, 10);
    let mut skip = ctx();
    skip.skip_cache = true;
    ed.store(&skip, &s, 0.0, Stage::Raw, frame(1));
    assert!(ed.is_empty());

    let mut proxy = ctx();
    proxy.is_proxy_render = true;
    assert!(!ed.store_if_capacity(&proxy, &s, 0.0, Stage::Raw, frame(1)));
    ed.store(&ctx(), &s, 0.0, Stage::Raw, frame(1));
    assert!(ed.fetch(&proxy, &s, 0.0, Stage::Raw).is_none());
    assert!(ed.fetch(&ctx(), &s, 0.0, Stage::Raw).is_some());
}

#[test]
fn unretained_stages_are_temp() {
    let ed = editing();
    let s = strip(1, 0, 10);
    ed.store(&ctx(), &s, 0.0, Stage::Raw, frame(1));
    ed.store(&ctx(), &s, 0.0, Stage::Preprocessed, frame(2));
    let st = ed.stats();
    assert_eq!(st.entries, 2);
    assert_eq!(st.temp_entries, 1);

    s.set_cache_override(Some(StageMask::from(Stage::Preprocessed)));
    ed.store(&ctx(), &s, 1.0, Stage::Preprocessed, frame(3));
    ed.store(&ctx(), &s, 1.0, Stage::Raw, frame(4));
    assert_eq!(ed.stats().temp_entries, 2);
}

#[test]
fn render_entries_are_temp_and_skip_disk() {
    let disk = Arc::new(MemDisk::default());
    let ed = editing().with_disk_cache(disk.clone());
    let s = strip(1, 0, 10);
    let mut render = ctx();
    render.for_render = true;

    ed.store(&render, &s, 0.0, Stage::Raw, frame(1));
    assert_eq!(ed.stats().temp_entries, 1);
    assert!(disk.files.lock().is_empty());

    let key = CacheKey::new(&ctx(), &s, 5.0, Stage::Raw);
    disk.files.lock().insert(key, FrameRGBA::solid(4, 4, [5, 5, 5, 255]));
    assert!(ed.fetch(&render, &s, 5.0, Stage::Raw).is_none());
    assert!(ed.fetch(&ctx(), &s, 5.0, Stage::Raw).is_some());
}

#[test]
fn disk_hits_are_reinserted_in_memory() {
    let disk = Arc::new(MemDisk::default());
    let ed = editing().with_disk_cache(disk.clone());
    let s = strip(1, 0, 10);

    ed.store(&ctx(), &s, 3.0, Stage::Raw, frame(7));
    assert_eq!(disk.files.lock().len(), 1);
    assert_eq!(ed.stats().disk_writes, 1);

    ed.clear();
    assert!(ed.is_empty());

    let got = ed.fetch(&ctx(), &s, 3.0, Stage::Raw).unwrap();
    assert_eq!(got.data[0], 7);
    let st = ed.stats();
    assert_eq!(st.disk_hits, 1);
    assert_eq!(st.entries, 1);

    let again = ed.fetch(&ctx(), &s, 3.0, Stage::Raw).unwrap();
    assert!(Arc::ptr_eq(&got, &again));
}

#[test]
fn disk_write_failures_do_not_affect_memory() {
    let disk = Arc::new(MemDisk {
        fail_writes: true,
        ..MemDisk::default()
    });
    let ed = editing().with_disk_cache(disk);
    let s = strip(1, 0, 10);
    ed.store(&ctx(), &s, 0.0, Stage::Raw, frame(1));
    assert!(ed.fetch(&ctx(), &s, 0.0, Stage::Raw).is_some());
    assert_eq!(ed.stats().disk_writes, 0);
}

#[test]
fn invalidate_reaches_the_disk_tier() {
    let disk = Arc::new(MemDisk::default());
    let ed = editing().with_disk_cache(disk.clone());
    let s = strip(1, 0, 10);
    ed.store(&ctx(), &s, 2.0, Stage::Raw, frame(1));
    ed.store(&ctx(), &s, 2.0, Stage::FinalOut, frame(2));

    assert_eq!(ed.invalidate(&s, &s, StageMask::ALL, false), 2);
    assert!(disk.files.lock().is_empty());
    assert!(ed.fetch(&ctx(), &s, 2.0, Stage::Raw).is_none());
}

#[test]
fn invalidate_before_first_use_leaves_the_cache_uncreated() {
    let disk = Arc::new(MemDisk::default());
    let s = strip(1, 0, 10);
    let stale = CacheKey::new(&ctx(), &s, 2.0, Stage::Raw);
    disk.write(&stale, &frame(1)).unwrap();

    let ed = editing().with_disk_cache(disk.clone());
    assert_eq!(ed.invalidate(&s, &s, StageMask::ALL, false), 0);
    assert!(ed.cache.get().is_none());
    assert!(disk.files.lock().is_empty());

    let ed = editing();
    assert_eq!(ed.invalidate(&s, &s, StageMask::ALL, false), 0);
    assert!(ed.cache.get().is_none());
}

#[test]
fn prefetch_requests_use_the_original_strip() {
    let window = Arc::new(PrefetchWindow::new());
    let ed = editing().with_prefetch(window.clone());
    let orig = strip(1, 0, 10);
    let copy = strip(101, 0, 10);
    window.map_strip(StripId(101), Arc::clone(&orig));

    let mut pf = ctx();
    pf.is_prefetch_render = true;
    ed.store(&pf, &copy, 4.0, Stage::Raw, frame(9));

    let got = ed.fetch(&ctx(), &orig, 4.0, Stage::Raw).unwrap();
    assert_eq!(got.data[0], 9);
    assert!(ed.fetch(&ctx(), &copy, 4.0, Stage::Raw).is_none());
}

#[test]
fn blocked_recycle_downgrades_the_current_pass() {
    let window = Arc::new(PrefetchWindow::new());
    let gauge = SharedMemoryGauge::new();
    let cfg = CacheConfig {
        prefetch: true,
        memory_budget_mb: 1,
        ..CacheConfig::default()
    };
    let ed = Editing::new(SceneId(1), cfg)
        .unwrap()
        .with_prefetch(window.clone())
        .with_memory_monitor(Arc::new(gauge.clone()));
    let s = strip(1, 0, 100);

    assert!(ed.store_if_capacity(&ctx(), &s, 10.0, Stage::Raw, frame(1)));
    assert!(ed.store_if_capacity(&ctx(), &s, 11.0, Stage::Raw, frame(2)));
    assert_eq!(ed.stats().temp_entries, 0);

    window.start(FrameRange::new(0, 50).unwrap());
    gauge.set(u64::MAX);
    assert!(!ed.store_if_capacity(&ctx(), &s, 12.0, Stage::Raw, frame(3)));

    let st = ed.stats();
    assert_eq!(st.entries, 2);
    assert_eq!(st.temp_entries, 2);
    assert_eq!(st.temp_downgrades, 1);
    assert!(ed.fetch(&ctx(), &s, 12.0, Stage::Raw).is_none());
}

#[test]
fn clear_stops_prefetch() {
    let window = Arc::new(PrefetchWindow::new());
    let ed = editing().with_prefetch(window.clone());
    window.start(FrameRange::new(0, 10).unwrap());
    ed.store(&ctx(), &strip(1, 0, 10), 0.0, Stage::Raw, frame(1));

    ed.clear();
    assert!(!window.is_running());
    assert!(ed.is_empty());
}

struct Collect {
    stop_after: usize,
    seen: Vec<(StripId, i32, Stage)>,
    count: usize,
}

impl CacheVisitor for Collect {
    fn init(&mut self, count: usize) -> bool {
        self.count = count;
        false
    }

    fn visit(&mut self, strip: &Arc<Strip>, timeline_frame: i32, stage: Stage) -> bool {
        self.seen.push((strip.id(), timeline_frame, stage));
        self.seen.len() >= self.stop_after
    }
}

#[test]
fn iterate_reports_entries_and_honors_stop() {
    let ed = editing();
    let s = strip(1, 10, 10);
    ed.store(&ctx(), &s, 12.0, Stage::Raw, frame(1));
    ed.store(&ctx(), &s, 12.0, Stage::FinalOut, frame(2));
    ed.store(&ctx(), &s, 13.0, Stage::Raw, frame(3));

    let mut all = Collect {
        stop_after: usize::MAX,
        seen: Vec::new(),
        count: 0,
    };
    ed.iterate(&mut all);
    assert_eq!(all.count, 3);
    assert_eq!(all.seen.len(), 3);
    assert!(all.seen.contains(&(StripId(1), 12, Stage::FinalOut)));
    assert!(all.seen.contains(&(StripId(1), 13, Stage::Raw)));

    let mut one = Collect {
        stop_after: 1,
        seen: Vec::new(),
        count: 0,
    };
    ed.iterate(&mut one);
    assert_eq!(one.seen.len(), 1);
    assert_eq!(ed.cache.get().unwrap().store.lock().last_inserted(), None);
}

#[test]
fn destroy_releases_everything() {
    let mut ed = editing();
    let s = strip(1, 0, 10);
    let f = frame(1);
    ed.store(&ctx(), &s, 0.0, Stage::Raw, Arc::clone(&f));
    assert_eq!(Arc::strong_count(&f), 2);

    ed.destroy();
    assert_eq!(Arc::strong_count(&f), 1);
    assert!(ed.is_empty());
    assert_eq!(ed.stats(), CacheStats::default());

    ed.store(&ctx(), &s, 0.0, Stage::Raw, frame(2));
    assert_eq!(ed.len(), 1);
}
