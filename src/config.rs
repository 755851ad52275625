//! Recorder configuration
//!
//! Plain data with serde derives so embedders can persist recorder
//! settings alongside their own. Defaults match the pipeline's fixed
//! H.264 + AAC-LC target; geometry-dependent values are overridden per
//! player surface. Session start validates the whole tree.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheLayout;
use crate::error::{RecorderError, Result};

/// Video track parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoEncoderConfig {
    /// Picture width in pixels. Must be even (4:2:0 input).
    pub width: u32,

    /// Picture height in pixels. Must be even.
    pub height: u32,

    /// Nominal frames per second fed to the encoder.
    pub frame_rate: u32,

    /// Seconds between forced key frames.
    pub key_frame_interval_secs: u32,
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self {
            // Placeholder player geometry; callers override with the
            // real surface size before starting a session
            width: 640,
            height: 480,
            // 24 fps nominal
            frame_rate: 24,
            // One IDR every 5 seconds
            key_frame_interval_secs: 5,
        }
    }
}

impl VideoEncoderConfig {
    /// Target bitrate in bits per second. Scales with picture area: four
    /// bits per pixel per second keeps quality roughly constant across
    /// geometries.
    pub fn bitrate(&self) -> u32 {
        self.width * self.height * 4
    }

    /// Bytes of one raw YUV 4:2:0 input frame.
    pub fn yuv_frame_len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 3 / 2
    }
}

/// Audio track parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEncoderConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,

    /// Channel count.
    pub channels: u16,

    /// Target bitrate in bits per second.
    pub bitrate: u32,

    /// PCM bytes per cached sample frame.
    pub frame_payload_len: usize,

    /// Upper bound for one encoder input buffer.
    pub max_input_len: usize,
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self {
            // AAC-LC target: 48 kHz stereo at 128 kbps
            sample_rate: 48_000,
            channels: 2,
            bitrate: 128_000,
            // 512 stereo 16-bit samples per block
            frame_payload_len: 2048,
            // 16 KiB input buffers
            max_input_len: 2048 * 8,
        }
    }
}

/// Wait budgets and pacing for the encode workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerTuning {
    /// Bounded wait for an input buffer during frame submission.
    pub input_wait: Duration,

    /// Bounded wait for one output poll.
    pub output_wait: Duration,

    /// Bounded wait for the input buffer that carries end-of-stream.
    pub eos_input_wait: Duration,

    /// Pause between picture submissions so the video encoder is not
    /// flooded with an entire clip at once. Zero disables pacing; audio
    /// always runs unpaced.
    pub video_frame_delay: Duration,
}

impl Default for WorkerTuning {
    fn default() -> Self {
        Self {
            input_wait: Duration::from_millis(1),
            output_wait: Duration::from_millis(1),
            eos_input_wait: Duration::from_millis(10),
            video_frame_delay: Duration::from_millis(15),
        }
    }
}

/// Top-level recorder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub video: VideoEncoderConfig,

    pub audio: AudioEncoderConfig,

    /// Expected clip length in seconds; sizes the frame cache.
    pub clip_secs: u32,

    /// Nominal audio sample frames per second; sizes the sample region.
    pub audio_fps: u32,

    pub tuning: WorkerTuning,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            video: VideoEncoderConfig::default(),
            audio: AudioEncoderConfig::default(),
            // 3 second replay window
            clip_secs: 3,
            // 2048-byte PCM blocks at 48 kHz stereo arrive just under 94
            // times a second; 96 leaves a little slack
            audio_fps: 96,
            tuning: WorkerTuning::default(),
        }
    }
}

impl RecorderConfig {
    /// Configuration for a player surface of the given size, everything
    /// else at the pipeline defaults.
    pub fn for_geometry(width: u32, height: u32) -> Self {
        Self {
            video: VideoEncoderConfig {
                width,
                height,
                ..VideoEncoderConfig::default()
            },
            ..Self::default()
        }
    }

    /// Cache sizing derived from this configuration.
    pub fn cache_layout(&self) -> CacheLayout {
        CacheLayout {
            width: self.video.width,
            height: self.video.height,
            video_fps: self.video.frame_rate,
            audio_fps: self.audio_fps,
            audio_payload_len: self.audio.frame_payload_len,
            duration_secs: self.clip_secs,
        }
    }

    /// Reject configurations a session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.video.width == 0 || self.video.height == 0 {
            return Err(RecorderError::InvalidConfig(
                "picture dimensions must be non-zero".into(),
            ));
        }
        if self.video.width % 2 != 0 || self.video.height % 2 != 0 {
            return Err(RecorderError::InvalidConfig(
                "picture dimensions must be even for 4:2:0 input".into(),
            ));
        }
        if self.video.frame_rate == 0 {
            return Err(RecorderError::InvalidConfig(
                "video frame rate must be non-zero".into(),
            ));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(RecorderError::InvalidConfig(
                "audio sample rate and channel count must be non-zero".into(),
            ));
        }
        if self.audio.frame_payload_len == 0 || self.audio_fps == 0 {
            return Err(RecorderError::InvalidConfig(
                "audio frame sizing must be non-zero".into(),
            ));
        }
        if self.audio.frame_payload_len > self.audio.max_input_len {
            return Err(RecorderError::InvalidConfig(
                "audio frame payload exceeds encoder input budget".into(),
            ));
        }
        if self.clip_secs == 0 {
            return Err(RecorderError::InvalidConfig(
                "clip length must be at least one second".into(),
            ));
        }
        Ok(())
    }
}
