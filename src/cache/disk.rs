use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use anyhow::Context;
use image::ImageEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};

use crate::cache::key::{CacheKey, InvalidationScope, Stage};
use crate::config::{DiskCacheConfig, DiskCompression};
use crate::foundation::core::FrameRGBA;
use crate::foundation::error::{SeqCacheError, SeqCacheResult};
use crate::timeline::context::SceneId;
use crate::timeline::strip::StripId;

/// Secondary tier consulted on memory misses and fed with retained inserts.
///
/// Failures are reported but never affect correctness: the cache logs them and treats them as
/// misses or skipped writes.
pub trait DiskCache: Send + Sync {
    /// Read the image stored under `key`, if any.
    fn read(&self, key: &CacheKey) -> SeqCacheResult<Option<FrameRGBA>>;
    /// Persist `frame` under `key`, replacing an existing file.
    fn write(&self, key: &CacheKey, frame: &FrameRGBA) -> SeqCacheResult<()>;
    /// Delete files matching `scope`. Returns how many were deleted.
    fn invalidate(&self, scope: &InvalidationScope) -> SeqCacheResult<usize>;
    /// Delete oldest files until the tier fits its size limit. Returns how many were deleted.
    fn enforce_limits(&self) -> SeqCacheResult<usize>;
}

/// Disk tier storing one PNG per entry.
///
/// Layout: `<dir>/scene_<id>/strip_<id>/<stage>_<context hash>_<frame index bits>[_t<frame>]_p<0|1>.png`.
/// Final-output files also record the timeline frame they were written at, since final-output
/// invalidation spans strips whose start frames this tier does not know. The `p` part records
/// whether the pixels are premultiplied, which PNG itself cannot say.
#[derive(Debug)]
pub struct DirDiskCache {
    root: PathBuf,
    size_limit_bytes: u64,
    compression: DiskCompression,
}

impl DirDiskCache {
    /// Open (creating if needed) the tier of `scene` under `cfg.dir`.
    pub fn open(cfg: &DiskCacheConfig, scene: SceneId) -> SeqCacheResult<Self> {
        let root = cfg.dir.join(format!("scene_{}", scene.0));
        fs::create_dir_all(&root)
            .with_context(|| format!("create disk cache dir '{}'", root.display()))?;
        Ok(Self {
            root,
            size_limit_bytes: cfg.size_limit_bytes(),
            compression: cfg.compression,
        })
    }

    /// Like [`DirDiskCache::open`], but `None` if the scene has no files yet.
    pub(crate) fn existing(cfg: &DiskCacheConfig, scene: SceneId) -> Option<Self> {
        let root = cfg.dir.join(format!("scene_{}", scene.0));
        root.is_dir().then(|| Self {
            root,
            size_limit_bytes: cfg.size_limit_bytes(),
            compression: cfg.compression,
        })
    }

    /// Directory holding this scene's files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn strip_dir(&self, strip: StripId) -> PathBuf {
        self.root.join(format!("strip_{}", strip.0))
    }

    fn path_for(&self, key: &CacheKey, premultiplied: bool) -> PathBuf {
        let mut name = format!(
            "{}_{:016x}_{:08x}",
            key.stage().tag(),
            key.context().stable_hash(),
            key.frame_index().to_bits()
        );
        if key.stage() == Stage::FinalOut {
            name.push_str(&format!("_t{}", key.timeline_frame()));
        }
        name.push_str(if premultiplied { "_p1.png" } else { "_p0.png" });
        self.strip_dir(key.strip_id()).join(name)
    }

    fn png_compression(&self) -> CompressionType {
        match self.compression {
            DiskCompression::Fast => CompressionType::Fast,
            DiskCompression::Best => CompressionType::Best,
        }
    }

    fn png_files(&self) -> SeqCacheResult<Vec<PathBuf>> {
        let mut out = Vec::new();
        let Ok(strips) = fs::read_dir(&self.root) else {
            return Ok(out);
        };
        for strip_dir in strips.flatten() {
            let path = strip_dir.path();
            if !path.is_dir() {
                continue;
            }
            let files = fs::read_dir(&path)
                .with_context(|| format!("list disk cache dir '{}'", path.display()))?;
            for f in files.flatten() {
                let p = f.path();
                if p.extension().and_then(|e| e.to_str()) == Some("png") {
                    out.push(p);
                }
            }
        }
        Ok(out)
    }
}

/// Per-write temp file suffix. Writers of the same key never share a temp file.
static NEXT_TMP: AtomicU64 = AtomicU64::new(0);

/// What a disk-tier file name says about its entry.
#[derive(Clone, Copy, Debug, PartialEq)]
struct FileMeta {
    stage: Stage,
    frame_index: f32,
    timeline_frame: Option<i32>,
    premultiplied: bool,
}

fn parse_file_name(name: &str) -> Option<FileMeta> {
    let stem = name.strip_suffix(".png")?;
    let mut parts = stem.split('_');
    let stage = Stage::from_tag(parts.next()?)?;
    let _ctx = parts.next()?;
    let frame_index = f32::from_bits(u32::from_str_radix(parts.next()?, 16).ok()?);
    let mut timeline_frame = None;
    let mut premultiplied = None;
    for part in parts {
        if let Some(t) = part.strip_prefix('t') {
            timeline_frame = Some(t.parse().ok()?);
        } else {
            premultiplied = match part {
                "p0" => Some(false),
                "p1" => Some(true),
                _ => return None,
            };
        }
    }
    Some(FileMeta {
        stage,
        frame_index,
        timeline_frame,
        premultiplied: premultiplied?,
    })
}

fn parse_strip_dir(name: &str) -> Option<StripId> {
    name.strip_prefix("strip_")?.parse().ok().map(StripId)
}

impl DiskCache for DirDiskCache {
    fn read(&self, key: &CacheKey) -> SeqCacheResult<Option<FrameRGBA>> {
        let mut found = None;
        for premultiplied in [true, false] {
            let path = self.path_for(key, premultiplied);
            match fs::read(&path) {
                Ok(b) => {
                    found = Some((path, b, premultiplied));
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(SeqCacheError::disk(format!(
                        "read '{}': {e}",
                        path.display()
                    )));
                }
            }
        }
        let Some((path, bytes, premultiplied)) = found else {
            return Ok(None);
        };
        let img = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)
            .map_err(|e| SeqCacheError::disk(format!("decode '{}': {e}", path.display())))?
            .into_rgba8();
        Ok(Some(FrameRGBA {
            width: img.width(),
            height: img.height(),
            data: img.into_raw(),
            premultiplied,
        }))
    }

    fn write(&self, key: &CacheKey, frame: &FrameRGBA) -> SeqCacheResult<()> {
        let expected = u64::from(frame.width)
            .saturating_mul(u64::from(frame.height))
            .saturating_mul(4);
        if expected == 0 || frame.data.len() as u64 != expected {
            return Err(SeqCacheError::disk(format!(
                "{}x{} frame has {} bytes, expected {expected}",
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        let path = self.path_for(key, frame.premultiplied);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("create disk cache dir '{}'", dir.display()))?;
        }
        let tmp = path.with_extension(format!(
            "png.{}-{}.tmp",
            std::process::id(),
            NEXT_TMP.fetch_add(1, Ordering::Relaxed)
        ));
        {
            let file = fs::File::create(&tmp)
                .with_context(|| format!("create '{}'", tmp.display()))?;
            let encoder = PngEncoder::new_with_quality(
                BufWriter::new(file),
                self.png_compression(),
                FilterType::Adaptive,
            );
            encoder
                .write_image(
                    &frame.data,
                    frame.width,
                    frame.height,
                    image::ExtendedColorType::Rgba8,
                )
                .map_err(|e| {
                    let _ = fs::remove_file(&tmp);
                    SeqCacheError::disk(format!("encode '{}': {e}", tmp.display()))
                })?;
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(anyhow::Error::new(e)
                .context(format!("move '{}' into place", path.display()))
                .into());
        }
        // Same key with the other alpha mode is now stale.
        let other = self.path_for(key, !frame.premultiplied);
        match fs::remove_file(&other) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SeqCacheError::disk(format!(
                    "remove '{}': {e}",
                    other.display()
                )));
            }
        }
        Ok(())
    }

    fn invalidate(&self, scope: &InvalidationScope) -> SeqCacheResult<usize> {
        let mut removed = 0;
        for path in self.png_files()? {
            let Some(strip) = path
                .parent()
                .and_then(|d| d.file_name())
                .and_then(|n| n.to_str())
                .and_then(parse_strip_dir)
            else {
                continue;
            };
            let Some(meta) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_file_name)
            else {
                continue;
            };
            let frame = match meta.timeline_frame {
                Some(t) => t,
                None if strip == scope.strip => (meta.frame_index + scope.strip_start) as i32,
                None => continue,
            };
            if scope.matches(strip, meta.stage, frame) {
                fs::remove_file(&path)
                    .with_context(|| format!("remove '{}'", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn enforce_limits(&self) -> SeqCacheResult<usize> {
        let mut files = Vec::new();
        let mut total = 0u64;
        for path in self.png_files()? {
            let Ok(md) = fs::metadata(&path) else {
                continue;
            };
            total += md.len();
            files.push((md.modified().unwrap_or(SystemTime::UNIX_EPOCH), md.len(), path));
        }
        if total <= self.size_limit_bytes {
            return Ok(0);
        }

        files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));
        let mut removed = 0;
        for (_, len, path) in files {
            if total <= self.size_limit_bytes {
                break;
            }
            fs::remove_file(&path).with_context(|| format!("remove '{}'", path.display()))?;
            total = total.saturating_sub(len);
            removed += 1;
        }
        tracing::debug!(removed, total, "disk cache trimmed to size limit");
        Ok(removed)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/disk.rs"]
mod tests;
