//! Encoder-facing protocol types
//!
//! The pipeline drives hardware-style encoders through a bounded-wait
//! request/response protocol: input buffers are acquired with a short
//! timeout (absence of a free buffer is back-pressure, not an error),
//! and compressed output is polled with a bounded wait. Output arrives
//! as a one-time format announcement followed by a stream of packets.
//! Real codecs live behind [`StreamEncoder`]; the rest of the crate is
//! written purely against this contract.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// Which elementary stream a component belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    /// Both streams, in the order the pipeline treats as canonical
    /// (video first) wherever a fixed ordering matters.
    pub const ALL: [StreamKind; 2] = [StreamKind::Video, StreamKind::Audio];
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// Codec parameters of a finished video track format.
///
/// Produced by the encoder once it has settled its output format; the
/// parameter sets are the raw H.264 SPS/PPS NAL payloads the container
/// needs for its decoder configuration record.
#[derive(Debug, Clone)]
pub struct VideoTrackFormat {
    pub width: u32,
    pub height: u32,
    /// Nominal frames per second, for containers that need a default
    /// sample duration.
    pub frame_rate: u32,
    pub sequence_params: Vec<u8>,
    pub picture_params: Vec<u8>,
}

/// Codec parameters of a finished audio track format.
#[derive(Debug, Clone)]
pub struct AudioTrackFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
    /// AudioSpecificConfig blob as reported by the encoder. May be empty
    /// for containers that derive it from the fields above.
    pub codec_data: Vec<u8>,
}

/// Track format announcement, reported exactly once per stream before
/// any compressed packet.
#[derive(Debug, Clone)]
pub enum TrackFormat {
    Video(VideoTrackFormat),
    Audio(AudioTrackFormat),
}

impl TrackFormat {
    pub fn kind(&self) -> StreamKind {
        match self {
            TrackFormat::Video(_) => StreamKind::Video,
            TrackFormat::Audio(_) => StreamKind::Audio,
        }
    }
}

/// One compressed packet coming out of an encoder.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub data: Bytes,
    /// Presentation timestamp in session-relative microseconds.
    pub pts_us: i64,
    /// Sync sample (IDR frame for video; always true for audio).
    pub key_frame: bool,
    /// Parameter-set packet. The container never receives these; the
    /// same information already travels in [`TrackFormat`].
    pub codec_config: bool,
    pub end_of_stream: bool,
}

impl EncodedPacket {
    /// Plain media packet with no special flags.
    pub fn media(data: impl Into<Bytes>, pts_us: i64, key_frame: bool) -> Self {
        Self {
            data: data.into(),
            pts_us,
            key_frame,
            codec_config: false,
            end_of_stream: false,
        }
    }

    /// Zero-length end-of-stream marker.
    pub fn end_of_stream(pts_us: i64) -> Self {
        Self {
            data: Bytes::new(),
            pts_us,
            key_frame: false,
            codec_config: false,
            end_of_stream: true,
        }
    }
}

/// Token for an acquired encoder input buffer.
///
/// The capacity bounds how many bytes a submission may carry; stuffing
/// more into the slot is a fatal protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSlot {
    index: usize,
    capacity: usize,
}

impl InputSlot {
    pub fn new(index: usize, capacity: usize) -> Self {
        Self { index, capacity }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Outcome of polling an encoder for output.
#[derive(Debug)]
pub enum EncoderEvent {
    /// Nothing became available within the wait budget.
    Pending,
    /// The encoder settled its output format. Happens once per stream,
    /// before any packet; a second announcement is a protocol violation.
    FormatReady(TrackFormat),
    /// One compressed packet.
    Packet(EncodedPacket),
}

/// Contract between the pipeline and a compressor for one elementary
/// stream. Both media types present this same interface; the worker
/// driving it is generic over the stream profile.
///
/// Implementations are owned by exactly one worker thread at a time, so
/// methods take `&mut self` and no internal locking is required.
pub trait StreamEncoder: Send {
    /// Wait up to `timeout` for a free input buffer. `Ok(None)` means the
    /// encoder is applying back-pressure; the caller should drain output
    /// and retry.
    fn dequeue_input(&mut self, timeout: Duration) -> Result<Option<InputSlot>>;

    /// Copy `payload` into `slot` and submit it with the given
    /// presentation timestamp. An end-of-stream submission carries an
    /// empty payload and `end_of_stream = true`.
    fn queue_input(
        &mut self,
        slot: InputSlot,
        payload: &[u8],
        pts_us: i64,
        end_of_stream: bool,
    ) -> Result<()>;

    /// Wait up to `timeout` for the next output event.
    fn dequeue_output(&mut self, timeout: Duration) -> Result<EncoderEvent>;

    /// Tear down the underlying codec. Called once when the session ends;
    /// dropping the encoder must release it as well.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
