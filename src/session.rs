//! Recording session controller
//!
//! A [`ClipRecorder`] owns the frame cache and runs at most one session
//! at a time through the phases Idle, Preparing, Running, Draining and
//! Released. [`ClipRecorder::start_record`] validates the call, claims
//! the recorder and spawns the session task; everything afterwards
//! happens off the caller's thread. The outcome of an accepted session
//! arrives through [`RecordListener::on_finished`], exactly once, after
//! every session resource has been released.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::MediaBackend;
use crate::cache::FrameCache;
use crate::clock::SessionClock;
use crate::codec::{StreamEncoder, StreamKind};
use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::mux::{ContainerMuxer, MuxCoordinator};
use crate::worker::{StreamProfile, StreamWorker, WorkerStats};

/// Lifecycle of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session has run yet.
    Idle,
    /// Allocating encoders and the output container.
    Preparing,
    /// Stream workers are feeding cached frames through the encoders.
    Running,
    /// Delivering end-of-stream and running the encoder queues dry.
    Draining,
    /// The last session has released its resources; a new one may start.
    Released,
}

/// Status updates broadcast while sessions run.
#[derive(Debug, Clone)]
pub enum RecorderStatus {
    /// Session accepted, resources are being allocated.
    Preparing,
    /// Encode workers are running.
    Running,
    /// End-of-stream drains in progress.
    Draining,
    /// Session completed; the container at this path is final.
    Finished {
        /// The written clip.
        output_path: PathBuf,
    },
    /// Session failed or was cancelled.
    Failed(String),
}

/// Completion callback for one recording session.
///
/// `on_finished` fires exactly once per accepted session, after every
/// session resource has been released. A rejected [`ClipRecorder::start_record`]
/// call never touches its listener.
pub trait RecordListener: Send + Sync {
    /// The session outcome: a summary of the written clip, or the first
    /// error that brought the session down.
    fn on_finished(&self, result: Result<RecordingSummary>);

    /// Encode progress hook. Reserved; the pipeline does not call it yet.
    fn on_progress(&self, _percent: u8) {}
}

/// What a completed session wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    /// Final container file.
    pub output_path: PathBuf,
    /// Cached picture frames submitted to the video encoder.
    pub video_frames: u64,
    /// Cached sample frames submitted to the audio encoder.
    pub audio_frames: u64,
    /// Compressed video samples written to the container.
    pub video_samples: u64,
    /// Compressed audio samples written to the container.
    pub audio_samples: u64,
    /// Span of the cached timestamps in microseconds.
    pub duration_us: i64,
}

struct ControllerState {
    phase: SessionPhase,
    /// Cancellation token of the active session.
    cancel: Option<CancellationToken>,
}

/// Records the cached frames into an MP4 clip, one session at a time.
///
/// The embedder's playback side fills [`ClipRecorder::cache`] with raw
/// frames, then calls [`ClipRecorder::start_record`]. The session
/// encodes the whole cache into the output file and resets the cache
/// when it releases. Construction is cheap; encoder and container
/// allocation happen per session on blocking worker threads.
pub struct ClipRecorder {
    config: RecorderConfig,
    cache: Arc<FrameCache>,
    backend: Arc<dyn MediaBackend>,
    state: Arc<Mutex<ControllerState>>,
    status_tx: broadcast::Sender<RecorderStatus>,
}

impl ClipRecorder {
    /// Build a recorder over a freshly allocated cache. The cache is
    /// sized from `config`; the configuration itself is validated when
    /// a session starts.
    pub fn new(config: RecorderConfig, backend: Arc<dyn MediaBackend>) -> Self {
        let cache = Arc::new(FrameCache::new(config.cache_layout()));
        let (status_tx, _) = broadcast::channel(16);
        Self {
            config,
            cache,
            backend,
            state: Arc::new(Mutex::new(ControllerState {
                phase: SessionPhase::Idle,
                cancel: None,
            })),
            status_tx,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// The staging cache this recorder encodes from.
    pub fn cache(&self) -> &Arc<FrameCache> {
        &self.cache
    }

    /// Phase of the current (or most recent) session.
    pub fn phase(&self) -> SessionPhase {
        self.state
            .lock()
            .map(|s| s.phase)
            .unwrap_or(SessionPhase::Released)
    }

    /// True while a session is preparing, running or draining.
    pub fn is_recording(&self) -> bool {
        matches!(
            self.phase(),
            SessionPhase::Preparing | SessionPhase::Running | SessionPhase::Draining
        )
    }

    /// Subscribe to status updates. Slow subscribers lose old events
    /// rather than stalling the session.
    pub fn subscribe_status(&self) -> broadcast::Receiver<RecorderStatus> {
        self.status_tx.subscribe()
    }

    /// Start recording the cached frames to `output_path`.
    ///
    /// The call validates the configuration, claims the recorder and
    /// returns; encoding runs on background tasks and the outcome
    /// arrives through `listener`, exactly once. While a session is
    /// active further calls are rejected with
    /// [`RecorderError::AlreadyRecording`] and the rejected listener is
    /// never invoked.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_record(
        &self,
        listener: Arc<dyn RecordListener>,
        output_path: impl Into<PathBuf>,
    ) -> Result<()> {
        let output_path = output_path.into();
        self.config.validate()?;

        let cancel = CancellationToken::new();
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| RecorderError::Worker("recorder state poisoned".into()))?;
            if matches!(
                state.phase,
                SessionPhase::Preparing | SessionPhase::Running | SessionPhase::Draining
            ) {
                warn!("Recording already in progress");
                return Err(RecorderError::AlreadyRecording);
            }
            state.phase = SessionPhase::Preparing;
            state.cancel = Some(cancel.clone());
        }

        info!("Starting recording to {:?}", output_path);

        let task = SessionTask {
            config: self.config.clone(),
            cache: Arc::clone(&self.cache),
            backend: Arc::clone(&self.backend),
            state: Arc::clone(&self.state),
            status_tx: self.status_tx.clone(),
            cancel,
            listener,
            output_path,
        };
        tokio::spawn(task.run());
        Ok(())
    }

    /// Cancel the active session. The workers observe the token between
    /// frames and inside end-of-stream drains, so the session winds down
    /// promptly and completes with a cancellation error through its
    /// listener. Without an active session this is a no-op.
    pub fn cancel(&self) {
        let token = self.state.lock().ok().and_then(|s| s.cancel.clone());
        match token {
            Some(token) => {
                info!("Cancelling recording session");
                token.cancel();
            }
            None => debug!("No recording in progress"),
        }
    }
}

struct SessionResources {
    muxer: Box<dyn ContainerMuxer>,
    video: Box<dyn StreamEncoder>,
    audio: Box<dyn StreamEncoder>,
}

/// One accepted recording session, from allocation to release.
struct SessionTask {
    config: RecorderConfig,
    cache: Arc<FrameCache>,
    backend: Arc<dyn MediaBackend>,
    state: Arc<Mutex<ControllerState>>,
    status_tx: broadcast::Sender<RecorderStatus>,
    cancel: CancellationToken,
    listener: Arc<dyn RecordListener>,
    output_path: PathBuf,
}

impl SessionTask {
    async fn run(self) {
        let outcome = self.record().await;

        // the cache is spent either way; the next session records from
        // a fresh fill
        self.cache.reset();
        if let Ok(mut state) = self.state.lock() {
            state.phase = SessionPhase::Released;
            state.cancel = None;
        }

        match &outcome {
            Ok(summary) => {
                info!(
                    "Recording finished: output={:?}, video_samples={}, audio_samples={}, duration_us={}",
                    summary.output_path,
                    summary.video_samples,
                    summary.audio_samples,
                    summary.duration_us
                );
                let _ = self.status_tx.send(RecorderStatus::Finished {
                    output_path: summary.output_path.clone(),
                });
            }
            Err(e) => {
                error!("Recording failed: {}", e);
                let _ = self.status_tx.send(RecorderStatus::Failed(e.to_string()));
            }
        }
        self.listener.on_finished(outcome);
    }

    async fn record(&self) -> Result<RecordingSummary> {
        let _ = self.status_tx.send(RecorderStatus::Preparing);

        let SessionResources { muxer, video, audio } = self.prepare().await?;

        let clock = Arc::new(SessionClock::new());
        if let Some(origin) = self.derive_origin() {
            clock.latch_origin(origin);
            debug!("Session timestamp origin: {} us", origin);
        }
        let mux = Arc::new(MuxCoordinator::new(muxer));

        self.set_phase(SessionPhase::Running);
        let _ = self.status_tx.send(RecorderStatus::Running);

        let mut outcome = self.encode(video, audio, &clock, &mux).await;

        // the container is finalized no matter how the streams ended
        if let Err(e) = mux.finish() {
            warn!("Container finalize failed: {}", e);
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }

        let (video_stats, audio_stats) = outcome?;
        Ok(RecordingSummary {
            output_path: self.output_path.clone(),
            video_frames: video_stats.frames_submitted,
            audio_frames: audio_stats.frames_submitted,
            video_samples: mux.samples_written(StreamKind::Video),
            audio_samples: mux.samples_written(StreamKind::Audio),
            duration_us: self.clip_span(),
        })
    }

    /// Allocate the container writer and both encoders. Real encoder
    /// allocation can block for a long time, so it runs on a blocking
    /// worker thread rather than stalling the runtime.
    async fn prepare(&self) -> Result<SessionResources> {
        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();
        let path = self.output_path.clone();
        tokio::task::spawn_blocking(move || {
            let attempt: Result<SessionResources> = (|| {
                let muxer = backend.muxer(&path)?;
                let video = backend.video_encoder(&config.video)?;
                let audio = backend.audio_encoder(&config.audio)?;
                Ok(SessionResources { muxer, video, audio })
            })();
            if attempt.is_err() && path.exists() {
                // don't leave a half-created container behind
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("Failed to remove partial output {:?}: {}", path, e);
                }
            }
            attempt
        })
        .await
        .map_err(|e| RecorderError::Worker(format!("session setup task failed: {}", e)))?
    }

    /// Run both stream workers to completion, then drain them in a fixed
    /// order: video first, then audio.
    async fn encode(
        &self,
        video_encoder: Box<dyn StreamEncoder>,
        audio_encoder: Box<dyn StreamEncoder>,
        clock: &Arc<SessionClock>,
        mux: &Arc<MuxCoordinator>,
    ) -> Result<(WorkerStats, WorkerStats)> {
        let video = self.spawn_worker(
            StreamProfile::video(&self.config.tuning),
            video_encoder,
            clock,
            mux,
        );
        let audio = self.spawn_worker(
            StreamProfile::audio(&self.config.tuning),
            audio_encoder,
            clock,
            mux,
        );
        let (video, audio) = tokio::join!(video, audio);
        let (video_worker, video_run) = join_worker(StreamKind::Video, video)?;
        let (audio_worker, audio_run) = join_worker(StreamKind::Audio, audio)?;

        let mut first_error = None;
        remember_error(&mut first_error, video_run);
        remember_error(&mut first_error, audio_run);

        self.set_phase(SessionPhase::Draining);
        let _ = self.status_tx.send(RecorderStatus::Draining);

        // a worker whose session already failed exits the drain through
        // its cancellation check
        let (mut video_worker, video_drain) = drain_worker(video_worker).await?;
        self.cancel_on_fatal(&video_drain);
        remember_error(&mut first_error, video_drain);
        let (mut audio_worker, audio_drain) = drain_worker(audio_worker).await?;
        self.cancel_on_fatal(&audio_drain);
        remember_error(&mut first_error, audio_drain);

        video_worker.release();
        audio_worker.release();

        match first_error {
            Some(e) => Err(e),
            None => Ok((video_worker.stats(), audio_worker.stats())),
        }
    }

    fn spawn_worker(
        &self,
        profile: StreamProfile,
        encoder: Box<dyn StreamEncoder>,
        clock: &Arc<SessionClock>,
        mux: &Arc<MuxCoordinator>,
    ) -> tokio::task::JoinHandle<(StreamWorker, Result<()>)> {
        let kind = profile.kind;
        let mut worker = StreamWorker::new(
            profile,
            encoder,
            Arc::clone(&self.cache),
            Arc::clone(clock),
            Arc::clone(mux),
            self.cancel.clone(),
        );
        let cancel = self.cancel.clone();
        tokio::task::spawn_blocking(move || {
            let result = worker.run();
            if let Err(e) = &result {
                if !matches!(e, RecorderError::Cancelled) {
                    // a fatal stream error must also stop the sibling
                    warn!("{} worker failed, cancelling session: {}", kind, e);
                    cancel.cancel();
                }
            }
            (worker, result)
        })
    }

    /// A fatal drain error stops the sibling stream too, so a wedged
    /// encoder on the other side cannot keep a failed session alive.
    fn cancel_on_fatal(&self, result: &Result<()>) {
        if let Err(e) = result {
            if !matches!(e, RecorderError::Cancelled) {
                self.cancel.cancel();
            }
        }
    }

    /// The session origin is the earlier of the two first cached
    /// timestamps, so neither stream normalizes below zero regardless of
    /// which worker touches the clock first.
    fn derive_origin(&self) -> Option<i64> {
        let audio = self.cache.first_pts(StreamKind::Audio);
        let video = self.cache.first_pts(StreamKind::Video);
        match (audio, video) {
            (Some(a), Some(v)) => Some(a.min(v)),
            (a, v) => a.or(v),
        }
    }

    /// Span between the earliest and latest cached timestamps.
    fn clip_span(&self) -> i64 {
        let last = |kind: StreamKind| {
            let count = self.cache.frame_count(kind);
            count
                .checked_sub(1)
                .and_then(|index| self.cache.with_frame(kind, index, |f| f.pts_us))
        };
        let end = match (last(StreamKind::Audio), last(StreamKind::Video)) {
            (Some(a), Some(v)) => Some(a.max(v)),
            (a, v) => a.or(v),
        };
        match (self.derive_origin(), end) {
            (Some(start), Some(end)) => end - start,
            _ => 0,
        }
    }

    fn set_phase(&self, phase: SessionPhase) {
        if let Ok(mut state) = self.state.lock() {
            state.phase = phase;
        }
    }
}

fn join_worker(
    kind: StreamKind,
    joined: Result<(StreamWorker, Result<()>), JoinError>,
) -> Result<(StreamWorker, Result<()>)> {
    joined.map_err(|e| RecorderError::Worker(format!("{} worker task failed: {}", kind, e)))
}

async fn drain_worker(mut worker: StreamWorker) -> Result<(StreamWorker, Result<()>)> {
    let kind = worker.kind();
    tokio::task::spawn_blocking(move || {
        let result = worker.finish();
        (worker, result)
    })
    .await
    .map_err(|e| RecorderError::Worker(format!("{} drain task failed: {}", kind, e)))
}

/// Keep the most informative session error: the first real failure must
/// not be masked by the cancellations it triggered on the other stream.
fn remember_error(slot: &mut Option<RecorderError>, result: Result<()>) {
    let Err(e) = result else { return };
    let replace = match slot {
        None => true,
        Some(RecorderError::Cancelled) => !matches!(e, RecorderError::Cancelled),
        Some(_) => false,
    };
    if replace {
        *slot = Some(e);
    }
}
