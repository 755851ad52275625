//! Shared doubles for the session tests: scripted encoders behind a
//! stub backend, a logging container, and a listener that can be
//! awaited.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use replaymux::{
    AudioEncoderConfig, AudioTrackFormat, ContainerMuxer, EncodedPacket, EncoderEvent, FrameCache,
    InputSlot, MediaBackend, Mp4FileMuxer, RecordListener, RecorderConfig, RecorderError,
    RecordingSummary, Result, StreamEncoder, StreamKind, TrackFormat, TrackId, VideoEncoderConfig,
    VideoTrackFormat,
};

pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Small geometry and short waits so sessions complete in milliseconds.
pub fn test_config() -> RecorderConfig {
    let mut config = RecorderConfig::for_geometry(16, 8);
    config.tuning.input_wait = Duration::from_micros(200);
    config.tuning.output_wait = Duration::from_micros(200);
    config.tuning.eos_input_wait = Duration::from_micros(200);
    config.tuning.video_frame_delay = Duration::from_millis(1);
    config
}

/// Append `count` frames of one stream, `spacing` microseconds apart.
pub fn push_frames(
    cache: &FrameCache,
    kind: StreamKind,
    first_pts: i64,
    spacing: i64,
    count: usize,
) {
    let payload = vec![0x42u8; cache.layout().payload_len(kind)];
    for i in 0..count {
        assert!(
            cache.push_frame(kind, first_pts + spacing * i as i64, &payload),
            "cache rejected {kind} frame {i}"
        );
    }
}

/// Per-session misbehavior knobs for a scripted encoder.
#[derive(Debug, Clone)]
pub struct EncoderScript {
    /// Format announcements to emit; well-behaved encoders emit one.
    pub announce_budget: usize,
    /// Parameter-set packets emitted right after the announcement.
    pub config_packets: usize,
    /// Produce no output at all, like a codec that wedged.
    pub never_ready: bool,
    /// Fail allocation instead of producing an encoder.
    pub fail_setup: bool,
}

impl Default for EncoderScript {
    fn default() -> Self {
        Self {
            announce_budget: 1,
            config_packets: 0,
            never_ready: false,
            fail_setup: false,
        }
    }
}

/// Encoder double that announces its format, then echoes every queued
/// input back as one compressed packet.
pub struct ScriptedEncoder {
    format: TrackFormat,
    script: EncoderScript,
    queued: VecDeque<(i64, Vec<u8>, bool)>,
    emitted: u64,
    next_slot: usize,
    slot_capacity: usize,
}

impl ScriptedEncoder {
    fn new(format: TrackFormat, script: EncoderScript) -> Self {
        Self {
            format,
            script,
            queued: VecDeque::new(),
            emitted: 0,
            next_slot: 0,
            slot_capacity: 1 << 15,
        }
    }
}

impl StreamEncoder for ScriptedEncoder {
    fn dequeue_input(&mut self, _timeout: Duration) -> Result<Option<InputSlot>> {
        let slot = InputSlot::new(self.next_slot, self.slot_capacity);
        self.next_slot += 1;
        Ok(Some(slot))
    }

    fn queue_input(
        &mut self,
        _slot: InputSlot,
        payload: &[u8],
        pts_us: i64,
        end_of_stream: bool,
    ) -> Result<()> {
        self.queued
            .push_back((pts_us, payload.to_vec(), end_of_stream));
        Ok(())
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<EncoderEvent> {
        if self.script.never_ready {
            // behave like a real codec with nothing to give: block out
            // the caller's wait budget
            std::thread::sleep(timeout);
            return Ok(EncoderEvent::Pending);
        }
        if self.script.announce_budget > 0 {
            self.script.announce_budget -= 1;
            return Ok(EncoderEvent::FormatReady(self.format.clone()));
        }
        if self.script.config_packets > 0 {
            self.script.config_packets -= 1;
            return Ok(EncoderEvent::Packet(EncodedPacket {
                data: bytes::Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x67]),
                pts_us: 0,
                key_frame: false,
                codec_config: true,
                end_of_stream: false,
            }));
        }
        match self.queued.pop_front() {
            Some((pts_us, _, true)) => Ok(EncoderEvent::Packet(EncodedPacket::end_of_stream(pts_us))),
            Some((pts_us, payload, false)) => {
                self.emitted += 1;
                Ok(EncoderEvent::Packet(EncodedPacket::media(
                    payload,
                    pts_us,
                    self.emitted == 1,
                )))
            }
            None => Ok(EncoderEvent::Pending),
        }
    }
}

fn video_format(config: &VideoEncoderConfig) -> TrackFormat {
    TrackFormat::Video(VideoTrackFormat {
        width: config.width,
        height: config.height,
        frame_rate: config.frame_rate,
        sequence_params: vec![0x67, 0x64, 0x00, 0x1f, 0xac, 0xd9, 0x40, 0x50],
        picture_params: vec![0x68, 0xeb, 0xe3, 0xcb, 0x22, 0xc0],
    })
}

fn audio_format(config: &AudioEncoderConfig) -> TrackFormat {
    TrackFormat::Audio(AudioTrackFormat {
        sample_rate: config.sample_rate,
        channels: config.channels,
        bitrate: config.bitrate,
        codec_data: vec![0x11, 0x90],
    })
}

/// Everything the logging container saw, across all sessions.
#[derive(Debug, Default)]
pub struct MuxLog {
    /// Streams in registration order; track ids are 1-based indexes.
    pub tracks: Vec<StreamKind>,
    /// `(track_id, pts_us, key_frame)` per written sample.
    pub samples: Vec<(u32, i64, bool)>,
    pub starts: u32,
    pub finishes: u32,
}

impl MuxLog {
    /// Timestamps written for one stream, in write order.
    pub fn pts_for(&self, kind: StreamKind) -> Vec<i64> {
        let ids: Vec<u32> = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, k)| **k == kind)
            .map(|(i, _)| i as u32 + 1)
            .collect();
        self.samples
            .iter()
            .filter(|(track, _, _)| ids.contains(track))
            .map(|(_, pts, _)| *pts)
            .collect()
    }
}

struct LoggingMuxer {
    log: Arc<Mutex<MuxLog>>,
}

impl ContainerMuxer for LoggingMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackId> {
        let mut log = self.log.lock().unwrap();
        log.tracks.push(format.kind());
        Ok(TrackId(log.tracks.len() as u32))
    }

    fn start(&mut self) -> Result<()> {
        self.log.lock().unwrap().starts += 1;
        Ok(())
    }

    fn write_sample(&mut self, track: TrackId, packet: &EncodedPacket) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .samples
            .push((track.0, packet.pts_us, packet.key_frame));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.log.lock().unwrap().finishes += 1;
        Ok(())
    }
}

/// Backend over scripted encoders. Scripts queue per session; a session
/// without a queued script gets a well-behaved echo encoder. The
/// container is either the shared [`MuxLog`] or a real MP4 file.
pub struct ScriptedBackend {
    log: Arc<Mutex<MuxLog>>,
    real_file: bool,
    video_scripts: Mutex<VecDeque<EncoderScript>>,
    audio_scripts: Mutex<VecDeque<EncoderScript>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::default(),
            real_file: false,
            video_scripts: Mutex::new(VecDeque::new()),
            audio_scripts: Mutex::new(VecDeque::new()),
        })
    }

    /// Same encoders, but the container is a real [`Mp4FileMuxer`].
    pub fn with_real_muxer() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::default(),
            real_file: true,
            video_scripts: Mutex::new(VecDeque::new()),
            audio_scripts: Mutex::new(VecDeque::new()),
        })
    }

    pub fn log(&self) -> Arc<Mutex<MuxLog>> {
        Arc::clone(&self.log)
    }

    pub fn script_video(&self, script: EncoderScript) {
        self.video_scripts.lock().unwrap().push_back(script);
    }

    pub fn script_audio(&self, script: EncoderScript) {
        self.audio_scripts.lock().unwrap().push_back(script);
    }
}

impl MediaBackend for ScriptedBackend {
    fn video_encoder(&self, config: &VideoEncoderConfig) -> Result<Box<dyn StreamEncoder>> {
        let script = self
            .video_scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        if script.fail_setup {
            return Err(RecorderError::EncoderSetup {
                kind: StreamKind::Video,
                reason: "scripted allocation failure".into(),
            });
        }
        Ok(Box::new(ScriptedEncoder::new(video_format(config), script)))
    }

    fn audio_encoder(&self, config: &AudioEncoderConfig) -> Result<Box<dyn StreamEncoder>> {
        let script = self
            .audio_scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        if script.fail_setup {
            return Err(RecorderError::EncoderSetup {
                kind: StreamKind::Audio,
                reason: "scripted allocation failure".into(),
            });
        }
        Ok(Box::new(ScriptedEncoder::new(audio_format(config), script)))
    }

    fn muxer(&self, path: &Path) -> Result<Box<dyn ContainerMuxer>> {
        if self.real_file {
            Ok(Box::new(Mp4FileMuxer::create(path)?))
        } else {
            Ok(Box::new(LoggingMuxer {
                log: Arc::clone(&self.log),
            }))
        }
    }
}

/// Listener that stores outcomes and wakes waiters.
pub struct CapturingListener {
    results: Mutex<Vec<Result<RecordingSummary>>>,
    notify: Notify,
}

impl CapturingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(Vec::new()),
            notify: Notify::new(),
        })
    }

    /// Wait until at least `count` outcomes have been delivered.
    pub async fn wait_for(&self, count: usize) {
        loop {
            if self.results.lock().unwrap().len() >= count {
                return;
            }
            self.notify.notified().await;
        }
    }

    pub fn outcomes(&self) -> usize {
        self.results.lock().unwrap().len()
    }

    pub fn take(&self) -> Vec<Result<RecordingSummary>> {
        std::mem::take(&mut *self.results.lock().unwrap())
    }
}

impl RecordListener for CapturingListener {
    fn on_finished(&self, result: Result<RecordingSummary>) {
        self.results.lock().unwrap().push(result);
        self.notify.notify_one();
    }
}
