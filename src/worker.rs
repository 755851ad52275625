//! Per-stream encode workers
//!
//! One worker drives one encoder over one cache region, start to finish:
//! submit a frame, drain whatever compressed output is ready, repeat,
//! and finally drain to end of stream. Both streams run exactly this
//! code; a [`StreamProfile`] carries the only differences (which region,
//! pacing, wait budgets). Workers run on blocking threads and touch the
//! container only through the [`MuxCoordinator`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::cache::FrameCache;
use crate::clock::SessionClock;
use crate::codec::{EncoderEvent, StreamEncoder, StreamKind};
use crate::config::WorkerTuning;
use crate::error::{RecorderError, Result};
use crate::mux::MuxCoordinator;

/// Per-stream worker parameters, derived from the recorder tuning.
#[derive(Debug, Clone)]
pub struct StreamProfile {
    pub kind: StreamKind,
    /// Bounded wait for an input buffer during frame submission.
    pub input_wait: Duration,
    /// Bounded wait for one output poll.
    pub output_wait: Duration,
    /// Bounded wait for the input buffer that carries end of stream.
    pub eos_input_wait: Duration,
    /// Pause after each submission attempt. Zero disables pacing.
    pub frame_delay: Duration,
}

impl StreamProfile {
    /// Video profile: paced submission so the encoder is not flooded
    /// with a whole clip of pictures at once.
    pub fn video(tuning: &WorkerTuning) -> Self {
        Self {
            kind: StreamKind::Video,
            input_wait: tuning.input_wait,
            output_wait: tuning.output_wait,
            eos_input_wait: tuning.eos_input_wait,
            frame_delay: tuning.video_frame_delay,
        }
    }

    /// Audio profile: same wait budgets, no pacing.
    pub fn audio(tuning: &WorkerTuning) -> Self {
        Self {
            kind: StreamKind::Audio,
            input_wait: tuning.input_wait,
            output_wait: tuning.output_wait,
            eos_input_wait: tuning.eos_input_wait,
            frame_delay: Duration::ZERO,
        }
    }
}

/// What a worker did, reported back to the controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerStats {
    /// Frames successfully handed to the encoder.
    pub frames_submitted: u64,
    /// Submission attempts that hit encoder back-pressure.
    pub backpressure_retries: u64,
    /// Compressed packets handed to the coordinator.
    pub packets_forwarded: u64,
    /// Parameter-set packets dropped on the floor.
    pub config_packets_dropped: u64,
    /// The encoder signaled end of stream outside the final drain.
    pub unexpected_eos: bool,
}

/// Drives one encoder over one cache region.
pub struct StreamWorker {
    profile: StreamProfile,
    encoder: Box<dyn StreamEncoder>,
    cache: Arc<FrameCache>,
    clock: Arc<SessionClock>,
    mux: Arc<MuxCoordinator>,
    cancel: CancellationToken,
    stats: WorkerStats,
}

impl StreamWorker {
    pub fn new(
        profile: StreamProfile,
        encoder: Box<dyn StreamEncoder>,
        cache: Arc<FrameCache>,
        clock: Arc<SessionClock>,
        mux: Arc<MuxCoordinator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            profile,
            encoder,
            cache,
            clock,
            mux,
            cancel,
            stats: WorkerStats::default(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.profile.kind
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Submit every cached frame of this stream, draining output as we
    /// go. Frames denied an input buffer are retried, not dropped, so on
    /// success the submission count equals the region's frame count.
    /// The terminal end-of-stream drain is a separate step
    /// ([`StreamWorker::finish`]).
    pub fn run(&mut self) -> Result<()> {
        let total = self.cache.frame_count(self.profile.kind);
        debug!(
            "{} worker starting over {} cached frame(s)",
            self.profile.kind, total
        );

        for index in 0..total {
            loop {
                if self.cancel.is_cancelled() {
                    return Err(RecorderError::Cancelled);
                }

                let submitted = self.submit_frame(index)?;
                self.drain(false)?;

                if !self.profile.frame_delay.is_zero() {
                    std::thread::sleep(self.profile.frame_delay);
                }
                if submitted {
                    break;
                }
                self.stats.backpressure_retries += 1;
            }
        }

        debug!(
            "{} worker submitted {} frame(s), {} retry(ies)",
            self.profile.kind, self.stats.frames_submitted, self.stats.backpressure_retries
        );
        Ok(())
    }

    /// Final drain: deliver the end-of-stream input and run the encoder
    /// queue dry.
    pub fn finish(&mut self) -> Result<()> {
        self.drain(true)
    }

    /// Release the encoder. Failures are logged, not propagated, so
    /// teardown always continues.
    pub fn release(&mut self) {
        if let Err(e) = self.encoder.release() {
            warn!("{} encoder release failed: {e}", self.profile.kind);
        }
    }

    fn submit_frame(&mut self, index: usize) -> Result<bool> {
        let slot = match self.encoder.dequeue_input(self.profile.input_wait)? {
            Some(slot) => slot,
            None => {
                trace!(
                    "{} encoder input busy, will retry frame {}",
                    self.profile.kind,
                    index
                );
                return Ok(false);
            }
        };

        let kind = self.profile.kind;
        let encoder = &mut self.encoder;
        let clock = &self.clock;
        let queued = self.cache.with_frame(kind, index, |raw| {
            if raw.payload.len() > slot.capacity() {
                return Err(RecorderError::InputOverflow {
                    len: raw.payload.len(),
                    capacity: slot.capacity(),
                });
            }
            let pts_us = clock.normalize(raw.pts_us);
            encoder.queue_input(slot, raw.payload, pts_us, false)
        });

        match queued {
            Some(Ok(())) => {
                self.stats.frames_submitted += 1;
                Ok(true)
            }
            Some(Err(e)) => Err(e),
            // the region is stable for the whole session, so a vanished
            // frame means the cache was reset under a live worker
            None => Err(RecorderError::Worker(format!(
                "{kind} cache frame {index} disappeared mid-session"
            ))),
        }
    }

    /// One drain pass over the encoder's output queue.
    ///
    /// Without `end_of_stream` the pass ends at the first empty poll.
    /// With it, the encoder is first handed its EOS input and the pass
    /// spins past empty polls until the terminal packet emerges; session
    /// cancellation is the only other way out.
    fn drain(&mut self, end_of_stream: bool) -> Result<()> {
        if end_of_stream {
            self.submit_eos()?;
        }

        loop {
            if self.cancel.is_cancelled() {
                return Err(RecorderError::Cancelled);
            }

            match self.encoder.dequeue_output(self.profile.output_wait)? {
                EncoderEvent::Pending => {
                    if end_of_stream {
                        continue;
                    }
                    return Ok(());
                }
                EncoderEvent::FormatReady(format) => {
                    debug!("{} encoder settled its output format", self.profile.kind);
                    self.mux.register_track(&format)?;
                }
                EncoderEvent::Packet(packet) => {
                    if packet.codec_config {
                        // parameter sets already travel in the track
                        // format announcement
                        self.stats.config_packets_dropped += 1;
                        continue;
                    }
                    if !packet.data.is_empty() {
                        self.mux.write_sample(self.profile.kind, &packet)?;
                        self.stats.packets_forwarded += 1;
                    }
                    if packet.end_of_stream {
                        if !end_of_stream {
                            warn!(
                                "{} encoder signaled end of stream mid-session",
                                self.profile.kind
                            );
                            self.stats.unexpected_eos = true;
                        }
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Deliver the zero-length, EOS-flagged input buffer. Unlike frame
    /// submission this must not give up on back-pressure, or the encoder
    /// would never emit its terminal packet; it retries until a slot is
    /// granted or the session is cancelled.
    fn submit_eos(&mut self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(RecorderError::Cancelled);
            }
            if let Some(slot) = self.encoder.dequeue_input(self.profile.eos_input_wait)? {
                return self.encoder.queue_input(slot, &[], 0, true);
            }
            trace!(
                "{} encoder busy, retrying end-of-stream input",
                self.profile.kind
            );
        }
    }
}
