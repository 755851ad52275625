//! Error types for the recording pipeline

use thiserror::Error;

use crate::codec::StreamKind;

/// Convenience alias used throughout the crate.
pub type Result<T, E = RecorderError> = std::result::Result<T, E>;

/// Everything that can go wrong while recording a clip.
///
/// Back-pressure from an encoder (no free input buffer within the wait
/// budget) is deliberately NOT an error: workers treat it as flow control
/// and retry. The variants here are either rejections the caller can act
/// on (`AlreadyRecording`), session outcomes (`Cancelled`), or fatal
/// conditions that abort the session.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("recording already in progress")]
    AlreadyRecording,

    #[error("recording session cancelled")]
    Cancelled,

    #[error("invalid recorder configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to create {kind} encoder: {reason}")]
    EncoderSetup { kind: StreamKind, reason: String },

    #[error("failed to create output container: {0}")]
    MuxerSetup(String),

    #[error("{kind} encoder failure: {reason}")]
    Encoder { kind: StreamKind, reason: String },

    #[error("{kind} encoder reported its output format twice")]
    FormatChangedTwice { kind: StreamKind },

    #[error("cannot register {kind} track after the container has started")]
    MuxerAlreadyStarted { kind: StreamKind },

    #[error("{kind} packet arrived before track registration")]
    TrackNotRegistered { kind: StreamKind },

    #[error("frame of {len} bytes does not fit encoder input buffer of {capacity} bytes")]
    InputOverflow { len: usize, capacity: usize },

    #[error("too many samples buffered before container start ({0})")]
    PendingOverflow(usize),

    #[error("container error: {0}")]
    Container(String),

    #[error("encode worker terminated abnormally: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// True for conditions that reject a call without touching any state,
    /// as opposed to failures of a session that actually ran.
    pub fn is_rejection(&self) -> bool {
        matches!(self, RecorderError::AlreadyRecording)
    }
}
