use crate::foundation::error::{SeqCacheError, SeqCacheResult};

/// Inclusive range of timeline frames, e.g. a strip's visible handles or a prefetch window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameRange {
    /// First frame.
    pub start: i32,
    /// Last frame, inclusive.
    pub end: i32,
}

impl FrameRange {
    /// Range `start..=end`. Fails if `start > end`.
    pub fn new(start: i32, end: i32) -> SeqCacheResult<Self> {
        if start > end {
            return Err(SeqCacheError::validation("FrameRange start must be <= end"));
        }
        Ok(Self { start, end })
    }

    /// Number of frames covered.
    pub fn len_frames(self) -> u32 {
        self.end.abs_diff(self.start) + 1
    }

    /// Whether `frame` lies inside the range.
    pub fn contains(self, frame: i32) -> bool {
        self.start <= frame && frame <= self.end
    }

    /// Overlap of two ranges. `None` when they are disjoint.
    pub fn intersect(self, other: Self) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(Self { start, end })
    }

    /// Range moved by `delta` frames.
    pub fn shift(self, delta: i32) -> Self {
        Self {
            start: self.start.saturating_add(delta),
            end: self.end.saturating_add(delta),
        }
    }
}

/// Cached artifact: one rendered or intermediate image.
///
/// The cache only needs the byte size; pixel contents are opaque to it. Entries are shared as
/// `Arc<FrameRGBA>`: the cache keeps one reference, every successful fetch hands out another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRGBA {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGBA8 bytes, tightly packed, row-major.
    pub data: Vec<u8>,
    /// Whether the `data` is premultiplied alpha.
    pub premultiplied: bool,
}

impl FrameRGBA {
    /// Allocate a frame filled with a single premultiplied color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let px = (width as usize).saturating_mul(height as usize);
        let mut data = Vec::with_capacity(px.saturating_mul(4));
        for _ in 0..px {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
            premultiplied: true,
        }
    }

    /// Bytes accounted against the memory budget.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}
