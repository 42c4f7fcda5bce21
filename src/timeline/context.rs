use xxhash_rust::xxh3::Xxh3;

const XXH3_SEED: u64 = 0x5eb1_ca7c_4e0f_9d21;

/// Identity of the scene a render context renders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct SceneId(pub u32);

/// Parameters of one render request, as handed to the cache by the render pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderContext {
    /// Output width in pixels.
    pub rectx: u32,
    /// Output height in pixels.
    pub recty: u32,
    /// Preview size percentage (100 = full resolution).
    pub preview_render_size: u16,
    /// Scene being rendered.
    pub scene: SceneId,
    /// Motion blur shutter length in frames.
    pub motion_blur_shutter: f32,
    /// Motion blur sub-frame samples.
    pub motion_blur_samples: u32,
    /// Stereo views format (individual / stereo 3d).
    pub views_format: u8,
    /// Stereo view being rendered.
    pub view_id: u8,
    /// Render task that issued the request; only used for temp-entry cleanup.
    pub task_id: u16,
    /// Bypass the cache entirely.
    pub skip_cache: bool,
    /// Proxy builds never read or write the cache.
    pub is_proxy_render: bool,
    /// Request comes from the prefetch job and must be redirected to the original context.
    pub is_prefetch_render: bool,
    /// Final render: store misses never fall through to disk and new entries are never retained.
    pub for_render: bool,
}

impl RenderContext {
    /// Preview context with neutral motion blur and stereo settings.
    pub fn preview(scene: SceneId, rectx: u32, recty: u32) -> Self {
        Self {
            rectx,
            recty,
            preview_render_size: 100,
            scene,
            motion_blur_shutter: 0.5,
            motion_blur_samples: 1,
            views_format: 0,
            view_id: 0,
            task_id: 0,
            skip_cache: false,
            is_proxy_render: false,
            is_prefetch_render: false,
            for_render: false,
        }
    }

    /// Same context, issued by render task `task_id`.
    pub fn with_task(mut self, task_id: u16) -> Self {
        self.task_id = task_id;
        self
    }

    /// Whether this request must not touch the cache at all.
    pub fn bypasses_cache(&self) -> bool {
        self.skip_cache || self.is_proxy_render
    }

    /// Cache identity of this context.
    pub fn fingerprint(&self) -> ContextFingerprint {
        ContextFingerprint {
            rectx: self.rectx,
            recty: self.recty,
            preview_render_size: self.preview_render_size,
            scene: self.scene,
            motion_blur_shutter_bits: self.motion_blur_shutter.to_bits(),
            motion_blur_samples: self.motion_blur_samples,
            views_format: self.views_format,
            view_id: self.view_id,
        }
    }
}

/// The part of a [`RenderContext`] that decides whether two renders produce the same pixels.
///
/// Flags and the task id are excluded; two contexts are equal iff every field here matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextFingerprint {
    /// Output width in pixels.
    pub rectx: u32,
    /// Output height in pixels.
    pub recty: u32,
    /// Preview size percentage.
    pub preview_render_size: u16,
    /// Scene being rendered.
    pub scene: SceneId,
    /// Shutter length as `f32` bits.
    pub motion_blur_shutter_bits: u32,
    /// Motion blur sub-frame samples.
    pub motion_blur_samples: u32,
    /// Stereo views format.
    pub views_format: u8,
    /// Stereo view.
    pub view_id: u8,
}

impl ContextFingerprint {
    /// Process-independent 64-bit hash, used to name disk-tier files.
    pub fn stable_hash(&self) -> u64 {
        let mut h = Xxh3::with_seed(XXH3_SEED);
        h.update(&self.rectx.to_le_bytes());
        h.update(&self.recty.to_le_bytes());
        h.update(&self.preview_render_size.to_le_bytes());
        h.update(&self.scene.0.to_le_bytes());
        h.update(&self.motion_blur_shutter_bits.to_le_bytes());
        h.update(&self.motion_blur_samples.to_le_bytes());
        h.update(&[self.views_format, self.view_id]);
        h.digest()
    }
}
