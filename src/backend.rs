//! Platform media backend trait

use std::path::Path;

use crate::codec::StreamEncoder;
use crate::config::{AudioEncoderConfig, VideoEncoderConfig};
use crate::error::Result;
use crate::mux::ContainerMuxer;

/// Factory for the platform pieces a recording session consumes.
///
/// Hardware codecs and container writers are single-use: every session
/// allocates fresh instances and releases them on teardown, so the
/// controller asks the backend each time instead of holding instances.
/// Codec allocation can take hundreds of milliseconds on real platforms;
/// the controller always calls these methods from a blocking worker
/// thread, never on the async runtime.
///
/// Failures here are resource-acquisition failures and abort the session
/// while it is still preparing.
pub trait MediaBackend: Send + Sync {
    /// Allocate and start a video encoder for one session.
    fn video_encoder(&self, config: &VideoEncoderConfig) -> Result<Box<dyn StreamEncoder>>;

    /// Allocate and start an audio encoder for one session.
    fn audio_encoder(&self, config: &AudioEncoderConfig) -> Result<Box<dyn StreamEncoder>>;

    /// Open the output container at `path`.
    fn muxer(&self, path: &Path) -> Result<Box<dyn ContainerMuxer>>;
}
