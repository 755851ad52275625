//! Container coordination for the two encode workers
//!
//! Both workers feed one container writer, and everything the writer
//! sees goes through [`MuxCoordinator`]: one mutex serializes track
//! registration, the start transition, sample writes and finalization,
//! so no worker can ever observe the track table and the started flag
//! half-updated. The container itself stays behind the [`ContainerMuxer`]
//! trait; the real MP4 writer lives in [`mp4file`].

pub mod mp4file;

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::codec::{EncodedPacket, StreamKind, TrackFormat};
use crate::error::{RecorderError, Result};

/// Container-assigned track handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(pub u32);

/// Contract between the pipeline and a container writer.
///
/// Implementations are always driven under the coordinator's lock and
/// need no locking of their own. Call order is guaranteed: every
/// `add_track` precedes `start`, every `write_sample` follows it, and
/// `finish` comes last, exactly once.
pub trait ContainerMuxer: Send {
    /// Register one track and return its handle.
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackId>;

    /// Open the container body.
    fn start(&mut self) -> Result<()>;

    /// Append one media sample to a started container.
    fn write_sample(&mut self, track: TrackId, packet: &EncodedPacket) -> Result<()>;

    /// Finalize and flush the container.
    fn finish(&mut self) -> Result<()>;
}

/// Cap on samples buffered before the container has started. Hitting it
/// means one stream is running far ahead of the other's format
/// negotiation; better to kill the session than to buffer without bound.
const MAX_PENDING_SAMPLES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuxPhase {
    /// Collecting track registrations; samples are buffered.
    Gathering,
    /// Body open, samples write through.
    Started,
    Finished,
}

struct MuxState {
    muxer: Box<dyn ContainerMuxer>,
    tracks: [Option<TrackId>; 2],
    phase: MuxPhase,
    pending: Vec<(TrackId, EncodedPacket)>,
    written: [u64; 2],
}

/// Serialization point between the encode workers and the container.
pub struct MuxCoordinator {
    state: Mutex<MuxState>,
}

fn slot(kind: StreamKind) -> usize {
    match kind {
        StreamKind::Video => 0,
        StreamKind::Audio => 1,
    }
}

impl MuxCoordinator {
    pub fn new(muxer: Box<dyn ContainerMuxer>) -> Self {
        Self {
            state: Mutex::new(MuxState {
                muxer,
                tracks: [None, None],
                phase: MuxPhase::Gathering,
                pending: Vec::new(),
                written: [0, 0],
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MuxState>> {
        self.state
            .lock()
            .map_err(|_| RecorderError::Container("muxer state poisoned".into()))
    }

    /// Register a stream's final output format.
    ///
    /// A second registration for the same stream, or any registration
    /// after the container started, is a fatal protocol violation. The
    /// moment both tracks are known the container is started, exactly
    /// once, and every sample buffered while gathering is flushed in
    /// arrival order inside the same critical section.
    pub fn register_track(&self, format: &TrackFormat) -> Result<()> {
        let kind = format.kind();
        let mut state = self.lock()?;

        match state.phase {
            MuxPhase::Started | MuxPhase::Finished => {
                return Err(RecorderError::MuxerAlreadyStarted { kind });
            }
            MuxPhase::Gathering => {}
        }
        if state.tracks[slot(kind)].is_some() {
            return Err(RecorderError::FormatChangedTwice { kind });
        }

        let id = state.muxer.add_track(format)?;
        state.tracks[slot(kind)] = Some(id);
        debug!("registered {} track as container track {}", kind, id.0);

        if state.tracks.iter().all(|t| t.is_some()) {
            state.muxer.start()?;
            state.phase = MuxPhase::Started;

            let pending = std::mem::take(&mut state.pending);
            let flushed = pending.len();
            for (track, packet) in pending {
                state.muxer.write_sample(track, &packet)?;
                let kind_slot = if Some(track) == state.tracks[0] { 0 } else { 1 };
                state.written[kind_slot] += 1;
            }
            info!(
                "output container started, {} early sample(s) flushed",
                flushed
            );
        }
        Ok(())
    }

    /// Hand one compressed packet to the container.
    ///
    /// Before the start transition the packet is buffered (bounded);
    /// afterwards it writes straight through. A packet for a stream that
    /// has not announced its format is a protocol violation.
    pub fn write_sample(&self, kind: StreamKind, packet: &EncodedPacket) -> Result<()> {
        let mut state = self.lock()?;

        if state.phase == MuxPhase::Finished {
            return Err(RecorderError::Container(
                "sample write after container finish".into(),
            ));
        }
        let track = state.tracks[slot(kind)].ok_or(RecorderError::TrackNotRegistered { kind })?;

        if state.phase == MuxPhase::Gathering {
            if state.pending.len() >= MAX_PENDING_SAMPLES {
                return Err(RecorderError::PendingOverflow(state.pending.len()));
            }
            state.pending.push((track, packet.clone()));
            return Ok(());
        }

        state.muxer.write_sample(track, packet)?;
        state.written[slot(kind)] += 1;
        Ok(())
    }

    /// True once the container body is open.
    pub fn is_started(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.phase == MuxPhase::Started)
            .unwrap_or(false)
    }

    /// Samples actually written for one stream, buffered flushes included.
    pub fn samples_written(&self, kind: StreamKind) -> u64 {
        self.state
            .lock()
            .map(|s| s.written[slot(kind)])
            .unwrap_or(0)
    }

    /// Finalize the container. Idempotent; later calls are no-ops.
    ///
    /// Finishing while still gathering closes whatever was opened (the
    /// session died before both formats arrived); buffered samples are
    /// dropped with a warning since there is no started body to take
    /// them.
    pub fn finish(&self) -> Result<()> {
        let mut state = self.lock()?;
        match state.phase {
            MuxPhase::Finished => Ok(()),
            MuxPhase::Started => {
                state.muxer.finish()?;
                state.phase = MuxPhase::Finished;
                Ok(())
            }
            MuxPhase::Gathering => {
                if !state.pending.is_empty() {
                    warn!(
                        "discarding {} sample(s) buffered before container start",
                        state.pending.len()
                    );
                    state.pending.clear();
                }
                state.muxer.finish()?;
                state.phase = MuxPhase::Finished;
                Ok(())
            }
        }
    }
}
