use super::*;
use crate::cache::key::StageMask;
use crate::foundation::core::FrameRange;
use crate::timeline::strip::Strip;
use crate::timeline::context::{RenderContext, SceneId};
use crate::timeline::strip::StripId;

fn ctx() -> RenderContext {
    RenderContext::preview(SceneId(1), 4, 4)
}

fn strip(id: u32, start: i32, len: u32) -> Arc<Strip> {
    Arc::new(Strip::movie(StripId(id), start, len).unwrap())
}

fn frame() -> Arc<FrameRGBA> {
    Arc::new(FrameRGBA::solid(4, 4, [9, 9, 9, 255]))
}

fn key(s: &Arc<Strip>, f: i32, stage: Stage) -> CacheKey {
    CacheKey::new(&ctx(), s, f as f32, stage)
}

#[test]
fn get_hands_out_extra_reference() {
    let mut st = CacheStore::new();
    let s = strip(1, 0, 10);
    let f = frame();
    st.insert(key(&s, 0, Stage::Raw), Arc::clone(&f), true).unwrap();
    assert_eq!(Arc::strong_count(&f), 2);

    let got = st.get(&key(&s, 0, Stage::Raw)).unwrap();
    assert!(Arc::ptr_eq(&got, &f));
    assert_eq!(Arc::strong_count(&f), 3);
    drop(got);
    assert_eq!(Arc::strong_count(&f), 2);

    assert!(st.get(&key(&s, 1, Stage::Raw)).is_none());
    assert_eq!(st.stats().hits, 1);
    assert_eq!(st.stats().misses, 1);
}

#[test]
fn retained_inserts_form_a_chain() {
    let mut st = CacheStore::new();
    let s = strip(1, 0, 10);
    let a = st.insert(key(&s, 0, Stage::Raw), frame(), true).unwrap();
    let b = st.insert(key(&s, 0, Stage::Preprocessed), frame(), true).unwrap();
    let c = st.insert(key(&s, 0, Stage::Composite), frame(), true).unwrap();

    assert_eq!(st.entry(a).unwrap().link_next, Some(b));
    assert_eq!(st.entry(b).unwrap().link_prev, Some(a));
    assert_eq!(st.entry(b).unwrap().link_next, Some(c));
    assert_eq!(st.entry(c).unwrap().link_next, None);
    assert_eq!(st.last_inserted(), Some(c));
}

#[test]
fn temp_inserts_are_never_linked() {
    let mut st = CacheStore::new();
    let s = strip(1, 0, 10);
    let a = st.insert(key(&s, 0, Stage::Raw), frame(), true).unwrap();
    let t = st.insert(key(&s, 0, Stage::Preprocessed), frame(), false).unwrap();
    let b = st.insert(key(&s, 0, Stage::Composite), frame(), true).unwrap();

    let te = st.entry(t).unwrap();
    assert!(te.is_temp);
    assert_eq!(te.link_prev, None);
    assert_eq!(te.link_next, None);
    assert_eq!(st.entry(a).unwrap().link_next, Some(b));
    assert_eq!(st.entry(b).unwrap().link_prev, Some(a));
}

#[test]
fn final_out_closes_the_chain() {
    let mut st = CacheStore::new();
    let s = strip(1, 0, 10);
    let a = st.insert(key(&s, 0, Stage::Raw), frame(), true).unwrap();
    let f = st.insert(key(&s, 0, Stage::FinalOut), frame(), true).unwrap();
    assert_eq!(st.last_inserted(), None);
    let d = st.insert(key(&s, 1, Stage::Raw), frame(), true).unwrap();

    assert_eq!(st.entry(a).unwrap().link_next, Some(f));
    assert_eq!(st.entry(f).unwrap().link_next, None);
    assert_eq!(st.entry(d).unwrap().link_prev, None);
}

#[test]
fn remove_keeps_byte_accounting() {
    let mut st = CacheStore::new();
    let s = strip(1, 0, 10);
    let a = st.insert(key(&s, 0, Stage::Raw), frame(), true).unwrap();
    st.insert(key(&s, 1, Stage::Raw), frame(), true).unwrap();
    assert_eq!(st.usage().resident_bytes, 128);

    st.remove(a).unwrap();
    assert_eq!(st.usage(), CacheUsage {
        entries: 1,
        resident_bytes: 64
    });
    assert!(st.remove(a).is_none());
}

#[test]
fn reused_slot_does_not_resolve_old_handle() {
    let mut st = CacheStore::new();
    let s = strip(1, 0, 10);
    let a = st.insert(key(&s, 0, Stage::Raw), frame(), false).unwrap();
    st.remove(a).unwrap();
    let b = st.insert(key(&s, 1, Stage::Raw), frame(), false).unwrap();

    assert!(st.entry(a).is_none());
    assert!(st.entry(b).is_some());
    assert_eq!(st.id_of(&key(&s, 1, Stage::Raw)), Some(b));
}

#[test]
fn remove_temp_entries_drops_stale_frames_of_task() {
    let mut st = CacheStore::new();
    let s = strip(1, 0, 10);
    let task = |t: u16, f: i32, stage| CacheKey::new(&ctx().with_task(t), &s, f as f32, stage);

    st.insert(task(1, 3, Stage::Preprocessed), frame(), false).unwrap();
    st.insert(task(1, 4, Stage::Preprocessed), frame(), false).unwrap();
    st.insert(task(2, 3, Stage::Composite), frame(), false).unwrap();
    st.insert(task(1, 2, Stage::Composite), frame(), true).unwrap();

    let removed = st.remove_temp_entries(1, 4);
    assert_eq!(removed, 1);
    assert!(!st.contains(&key(&s, 3, Stage::Preprocessed)));
    assert!(st.contains(&key(&s, 4, Stage::Preprocessed)));
    // Other task and retained entries are untouched.
    assert!(st.contains(&key(&s, 3, Stage::Composite)));
    assert!(st.contains(&key(&s, 2, Stage::Composite)));
}

#[test]
fn remove_temp_entries_keeps_shared_raw_frames() {
    let mut st = CacheStore::new();
    let s = strip(1, 0, 3);
    s.set_handles(FrameRange::new(0, 8).unwrap());
    // Frames past the media end hold media frame 2.
    st.insert(key(&s, 5, Stage::Raw), frame(), false).unwrap();

    assert_eq!(st.remove_temp_entries(0, 7), 0);
    assert_eq!(st.remove_temp_entries(0, 12), 1);
}

#[test]
fn invalidate_scopes_by_strip_stage_and_range() {
    let mut st = CacheStore::new();
    let s = strip(1, 0, 10);
    let other = strip(2, 0, 30);

    st.insert(key(&s, 2, Stage::Raw), frame(), true).unwrap();
    st.insert(key(&s, 3, Stage::Preprocessed), frame(), true).unwrap();
    st.insert(key(&s, 3, Stage::Composite), frame(), true).unwrap();
    st.insert(key(&other, 3, Stage::Raw), frame(), true).unwrap();
    st.insert(key(&other, 20, Stage::FinalOut), frame(), true).unwrap();

    let removed = st.invalidate(&InvalidationScope::new(&s, &s, Stage::Raw | Stage::Preprocessed, false));
    assert_eq!(removed, 2);
    assert!(st.contains(&key(&s, 3, Stage::Composite)));
    assert!(st.contains(&key(&other, 3, Stage::Raw)));
    assert!(st.contains(&key(&other, 20, Stage::FinalOut)));
    assert_eq!(st.last_inserted(), None);
}

#[test]
fn invalidate_final_out_uses_overlap_unless_forced() {
    let mut st = CacheStore::new();
    let s = strip(1, 0, 10);
    let changed = strip(2, 5, 20);

    st.insert(key(&s, 7, Stage::FinalOut), frame(), true).unwrap();
    st.insert(key(&s, 15, Stage::FinalOut), frame(), true).unwrap();
    st.insert(key(&s, 2, Stage::FinalOut), frame(), true).unwrap();

    assert_eq!(st.invalidate(&InvalidationScope::new(&s, &changed, StageMask::FINAL_OUT, false)), 1);
    assert!(st.contains(&key(&s, 15, Stage::FinalOut)));

    assert_eq!(st.invalidate(&InvalidationScope::new(&s, &changed, StageMask::FINAL_OUT, true)), 1);
    assert!(!st.contains(&key(&s, 15, Stage::FinalOut)));
    assert!(st.contains(&key(&s, 2, Stage::FinalOut)));
}

#[test]
fn clear_resets_everything() {
    let mut st = CacheStore::new();
    let s = strip(1, 0, 10);
    st.insert(key(&s, 0, Stage::Raw), frame(), true).unwrap();
    st.clear();
    assert_eq!(st.len(), 0);
    assert_eq!(st.last_inserted(), None);
    assert_eq!(st.stats(), CacheStats::default());
}
