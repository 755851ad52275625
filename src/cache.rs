//! Staging cache for decoded frames awaiting encode
//!
//! An external producer (the playback decoder) fills the cache with the
//! most recent window of raw frames; a recording session then reads it
//! back as two flat regions, one per elementary stream. Every cached
//! frame is a 4-byte little-endian microsecond timestamp followed by a
//! fixed-size payload, so a region is fully described by its byte
//! length: `data_size` is always a whole multiple of the frame stride.
//!
//! Population strictly precedes encoding. The session treats the cache
//! as read-only and calls [`FrameCache::reset`] when it releases.

use std::sync::RwLock;

use crate::codec::StreamKind;

/// Leading bytes of every cached frame, holding the timestamp.
pub const PTS_PREFIX_LEN: usize = 4;

/// Audio regions get 1.5x head-room over the nominal frame budget;
/// sample frames arrive at a much higher rate than pictures and jitter
/// accumulates faster.
const AUDIO_HEADROOM: f32 = 1.5;
/// Picture regions get 1.1x head-room.
const VIDEO_HEADROOM: f32 = 1.1;

/// Sizing parameters for the two cache regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    /// Picture width in pixels.
    pub width: u32,
    /// Picture height in pixels.
    pub height: u32,
    /// Nominal picture frames per second.
    pub video_fps: u32,
    /// Nominal audio sample frames per second.
    pub audio_fps: u32,
    /// PCM bytes per audio sample frame.
    pub audio_payload_len: usize,
    /// Expected clip length in seconds.
    pub duration_secs: u32,
}

impl CacheLayout {
    /// Payload bytes of one frame of the given stream. Pictures are
    /// YUV 4:2:0, exactly `width * height * 3 / 2` bytes.
    pub fn payload_len(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Video => (self.width as usize) * (self.height as usize) * 3 / 2,
            StreamKind::Audio => self.audio_payload_len,
        }
    }

    /// Stride of one stored frame: timestamp prefix plus payload.
    pub fn frame_size(&self, kind: StreamKind) -> usize {
        PTS_PREFIX_LEN + self.payload_len(kind)
    }

    /// Frame capacity of a region, nominal budget times head-room.
    pub fn capacity_frames(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Video => {
                (self.video_fps as f32 * self.duration_secs as f32 * VIDEO_HEADROOM) as usize
            }
            StreamKind::Audio => {
                (self.audio_fps as f32 * self.duration_secs as f32 * AUDIO_HEADROOM) as usize
            }
        }
    }
}

/// Borrowed view of one cached frame.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    /// Capture timestamp in microseconds, as written by the producer.
    pub pts_us: i64,
    pub payload: &'a [u8],
}

#[derive(Debug)]
struct Region {
    buf: Vec<u8>,
    frame_size: usize,
    data_len: usize,
}

impl Region {
    fn new(frame_size: usize, capacity_frames: usize) -> Self {
        Self {
            buf: vec![0u8; frame_size * capacity_frames],
            frame_size,
            data_len: 0,
        }
    }

    fn push(&mut self, pts_us: i64, payload: &[u8]) -> bool {
        if payload.len() + PTS_PREFIX_LEN != self.frame_size {
            return false;
        }
        if self.data_len + self.frame_size > self.buf.len() {
            return false;
        }
        let start = self.data_len;
        self.buf[start..start + PTS_PREFIX_LEN]
            .copy_from_slice(&(pts_us as i32).to_le_bytes());
        self.buf[start + PTS_PREFIX_LEN..start + self.frame_size].copy_from_slice(payload);
        self.data_len += self.frame_size;
        true
    }

    fn frame_count(&self) -> usize {
        self.data_len / self.frame_size
    }
}

/// Fixed-capacity staging area holding one clip's worth of raw frames,
/// split into an audio sample region and a picture region.
#[derive(Debug)]
pub struct FrameCache {
    layout: CacheLayout,
    sample: RwLock<Region>,
    picture: RwLock<Region>,
}

impl FrameCache {
    /// Allocate both regions at full capacity, initially empty.
    pub fn new(layout: CacheLayout) -> Self {
        let sample = Region::new(
            layout.frame_size(StreamKind::Audio),
            layout.capacity_frames(StreamKind::Audio),
        );
        let picture = Region::new(
            layout.frame_size(StreamKind::Video),
            layout.capacity_frames(StreamKind::Video),
        );
        Self {
            layout,
            sample: RwLock::new(sample),
            picture: RwLock::new(picture),
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    fn region(&self, kind: StreamKind) -> &RwLock<Region> {
        match kind {
            StreamKind::Video => &self.picture,
            StreamKind::Audio => &self.sample,
        }
    }

    /// Producer-side append of one frame. Returns `false` without storing
    /// anything once the region is full, or if the payload length does
    /// not match the layout. Regions never grow.
    pub fn push_frame(&self, kind: StreamKind, pts_us: i64, payload: &[u8]) -> bool {
        if let Ok(mut region) = self.region(kind).write() {
            region.push(pts_us, payload)
        } else {
            false
        }
    }

    /// Frames currently stored in a region.
    pub fn frame_count(&self, kind: StreamKind) -> usize {
        self.region(kind)
            .read()
            .map(|r| r.frame_count())
            .unwrap_or(0)
    }

    /// Bytes currently stored in a region. Always a whole multiple of
    /// [`FrameCache::frame_size`].
    pub fn data_size(&self, kind: StreamKind) -> usize {
        self.region(kind).read().map(|r| r.data_len).unwrap_or(0)
    }

    pub fn frame_size(&self, kind: StreamKind) -> usize {
        self.layout.frame_size(kind)
    }

    pub fn capacity_frames(&self, kind: StreamKind) -> usize {
        self.layout.capacity_frames(kind)
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count(StreamKind::Video) == 0 && self.frame_count(StreamKind::Audio) == 0
    }

    /// Zero-copy read of one frame under the region lock. `None` past the
    /// populated range; reads never fail.
    pub fn with_frame<R>(
        &self,
        kind: StreamKind,
        index: usize,
        f: impl FnOnce(RawFrame<'_>) -> R,
    ) -> Option<R> {
        let region = self.region(kind).read().ok()?;
        let start = index.checked_mul(region.frame_size)?;
        if start + region.frame_size > region.data_len {
            return None;
        }
        let bytes = &region.buf[start..start + region.frame_size];
        let pts_bytes: [u8; 4] = bytes[..PTS_PREFIX_LEN].try_into().ok()?;
        Some(f(RawFrame {
            pts_us: i32::from_le_bytes(pts_bytes) as i64,
            payload: &bytes[PTS_PREFIX_LEN..],
        }))
    }

    /// Timestamp of the first cached frame of a stream, if any. Used to
    /// derive the session timestamp origin.
    pub fn first_pts(&self, kind: StreamKind) -> Option<i64> {
        self.with_frame(kind, 0, |frame| frame.pts_us)
    }

    /// Forget all cached frames. Counters go back to zero; the buffers
    /// stay allocated for the next fill.
    pub fn reset(&self) {
        for kind in StreamKind::ALL {
            if let Ok(mut region) = self.region(kind).write() {
                region.data_len = 0;
            }
        }
    }
}
