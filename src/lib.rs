//! Image cache for a non-linear video sequencer.
//!
//! Renders of a timeline produce images at several stages per strip (raw source, preprocessed,
//! composited) and a final output per frame. This crate keeps those images in memory, keyed by
//! strip, frame, stage and render parameters, so scrubbing and playback can reuse them.
//!
//! # Overview
//!
//! - Entries inserted by one render pass form a *chain*. Eviction always removes whole chains, so
//!   a pass is either fully cached or not cached at all.
//! - When memory use exceeds the budget, the chain farthest from the playhead is recycled. While
//!   a prefetch job runs, chains inside its window are kept.
//! - Stages a strip does not retain are stored as *temp* entries, owned by the render task that
//!   made them and dropped once that task moves on.
//! - An optional disk tier keeps retained images across sessions as PNG files.
//!
//! The entry point is [`Editing`].
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cache;
mod config;
mod foundation;
mod sequencer;
mod timeline;

pub use cache::disk::{DirDiskCache, DiskCache};
pub use cache::key::{CacheKey, InvalidationScope, Stage, StageMask};
pub use cache::memory::{CacheMemory, MemoryMonitor, ProcessMemory, SharedMemoryGauge};
pub use cache::prefetch::{NoPrefetch, PrefetchMonitor, PrefetchWindow};
pub use cache::store::{CacheStats, CacheUsage};
pub use config::{CacheConfig, DiskCacheConfig, DiskCompression};
pub use foundation::core::{FrameRGBA, FrameRange};
pub use foundation::error::{SeqCacheError, SeqCacheResult};
pub use sequencer::{CacheVisitor, Editing};
pub use timeline::context::{ContextFingerprint, RenderContext, SceneId};
pub use timeline::strip::{Strip, StripId, StripKind, StripTiming};
