//! Replay clip recorder
//!
//! Encodes a cached window of raw playback frames into an MP4 file.
//! The embedder keeps the last few seconds of decoded audio and video
//! in a [`FrameCache`]; a [`ClipRecorder`] session then pushes both
//! regions through platform encoders (behind [`MediaBackend`]) and
//! muxes the compressed streams into one H.264 + AAC-LC clip.
//!
//! Sessions are asynchronous: [`ClipRecorder::start_record`] returns
//! immediately and the outcome arrives through a [`RecordListener`],
//! exactly once. At most one session runs at a time; the cache is
//! reset when a session releases.

pub mod backend;
pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod mux;
pub mod session;
pub mod worker;

pub use backend::MediaBackend;
pub use cache::{CacheLayout, FrameCache, RawFrame};
pub use clock::SessionClock;
pub use codec::{
    AudioTrackFormat, EncodedPacket, EncoderEvent, InputSlot, StreamEncoder, StreamKind,
    TrackFormat, VideoTrackFormat,
};
pub use config::{AudioEncoderConfig, RecorderConfig, VideoEncoderConfig, WorkerTuning};
pub use error::{RecorderError, Result};
pub use mux::mp4file::Mp4FileMuxer;
pub use mux::{ContainerMuxer, MuxCoordinator, TrackId};
pub use session::{ClipRecorder, RecordListener, RecorderStatus, RecordingSummary, SessionPhase};
pub use worker::{StreamProfile, StreamWorker, WorkerStats};
