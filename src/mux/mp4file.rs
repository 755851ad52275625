//! MP4 file writing via the `mp4` crate

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::Bytes;
use mp4::{
    AacConfig, AudioObjectType, AvcConfig, ChannelConfig, MediaConfig, Mp4Config, Mp4Sample,
    Mp4Writer, SampleFreqIndex, TrackConfig, TrackType,
};

use crate::codec::{EncodedPacket, StreamKind, TrackFormat};
use crate::error::{RecorderError, Result};
use crate::mux::{ContainerMuxer, TrackId};

/// Track timescale in units per second. Microseconds, so packet
/// timestamps map one-to-one into sample times.
const TRACK_TIMESCALE: u32 = 1_000_000;

/// Movie-level timescale.
const MOVIE_TIMESCALE: u32 = 1000;

/// PCM samples per AAC frame; yields the fallback duration for the last
/// audio sample of a track.
const AAC_SAMPLES_PER_FRAME: u64 = 1024;

struct HeldSample {
    start_time_us: i64,
    is_sync: bool,
    data: Bytes,
}

struct TrackState {
    id: TrackId,
    kind: StreamKind,
    /// Duration assigned when no successor sample exists.
    nominal_duration_us: u64,
    held: Option<HeldSample>,
}

/// [`ContainerMuxer`] writing a real ISO-BMFF file.
///
/// Sample durations come from timestamp deltas, so every track holds
/// one sample back and writes it once its successor arrives; `finish`
/// flushes the stragglers with the track's nominal duration, closes
/// the file with the `moov` box and consumes the writer.
pub struct Mp4FileMuxer {
    writer: Option<Mp4Writer<BufWriter<File>>>,
    tracks: Vec<TrackState>,
}

fn brand(tag: &str) -> Result<mp4::FourCC> {
    tag.parse()
        .map_err(|_| RecorderError::Container(format!("invalid container brand {tag:?}")))
}

impl Mp4FileMuxer {
    /// Create the output file and write the container preamble.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let config = Mp4Config {
            major_brand: brand("isom")?,
            minor_version: 512,
            compatible_brands: vec![brand("isom")?, brand("iso2")?, brand("avc1")?, brand("mp41")?],
            timescale: MOVIE_TIMESCALE,
        };
        let writer = Mp4Writer::write_start(BufWriter::new(file), &config)
            .map_err(|e| RecorderError::Container(format!("write container header: {e}")))?;
        Ok(Self {
            writer: Some(writer),
            tracks: Vec::new(),
        })
    }

    fn writer_mut(&mut self) -> Result<&mut Mp4Writer<BufWriter<File>>> {
        self.writer
            .as_mut()
            .ok_or_else(|| RecorderError::Container("container already finalized".into()))
    }
}

fn aac_freq_index(sample_rate: u32) -> Result<SampleFreqIndex> {
    let index = match sample_rate {
        96_000 => SampleFreqIndex::Freq96000,
        88_200 => SampleFreqIndex::Freq88200,
        64_000 => SampleFreqIndex::Freq64000,
        48_000 => SampleFreqIndex::Freq48000,
        44_100 => SampleFreqIndex::Freq44100,
        32_000 => SampleFreqIndex::Freq32000,
        24_000 => SampleFreqIndex::Freq24000,
        22_050 => SampleFreqIndex::Freq22050,
        16_000 => SampleFreqIndex::Freq16000,
        12_000 => SampleFreqIndex::Freq12000,
        11_025 => SampleFreqIndex::Freq11025,
        8_000 => SampleFreqIndex::Freq8000,
        other => {
            return Err(RecorderError::Container(format!(
                "unsupported AAC sample rate {other}"
            )))
        }
    };
    Ok(index)
}

fn aac_channel_config(channels: u16) -> Result<ChannelConfig> {
    // The pipeline targets mono or stereo program material.
    match channels {
        1 => Ok(ChannelConfig::Mono),
        2 => Ok(ChannelConfig::Stereo),
        other => Err(RecorderError::Container(format!(
            "unsupported AAC channel count {other}"
        ))),
    }
}

fn write_held(
    writer: &mut Mp4Writer<BufWriter<File>>,
    track: TrackId,
    held: HeldSample,
    duration_us: u32,
) -> Result<()> {
    let sample = Mp4Sample {
        start_time: held.start_time_us.max(0) as u64,
        duration: duration_us,
        rendering_offset: 0,
        is_sync: held.is_sync,
        bytes: held.data,
    };
    writer
        .write_sample(track.0, &sample)
        .map_err(|e| RecorderError::Container(format!("write sample: {e}")))
}

impl ContainerMuxer for Mp4FileMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackId> {
        let (config, nominal_duration_us) = match format {
            TrackFormat::Video(v) => {
                // The avcC record takes profile/level straight from the
                // SPS header bytes, so a usable SPS is mandatory.
                if v.sequence_params.len() < 4 || v.picture_params.is_empty() {
                    return Err(RecorderError::Container(
                        "video format is missing H.264 parameter sets".into(),
                    ));
                }
                let config = TrackConfig {
                    track_type: TrackType::Video,
                    timescale: TRACK_TIMESCALE,
                    language: "und".into(),
                    media_conf: MediaConfig::AvcConfig(AvcConfig {
                        width: v.width as u16,
                        height: v.height as u16,
                        seq_param_set: v.sequence_params.clone(),
                        pic_param_set: v.picture_params.clone(),
                    }),
                };
                let nominal = if v.frame_rate > 0 {
                    1_000_000 / v.frame_rate as u64
                } else {
                    41_667
                };
                (config, nominal)
            }
            TrackFormat::Audio(a) => {
                let config = TrackConfig {
                    track_type: TrackType::Audio,
                    timescale: TRACK_TIMESCALE,
                    language: "und".into(),
                    media_conf: MediaConfig::AacConfig(AacConfig {
                        bitrate: a.bitrate,
                        profile: AudioObjectType::AacLowComplexity,
                        freq_index: aac_freq_index(a.sample_rate)?,
                        chan_conf: aac_channel_config(a.channels)?,
                    }),
                };
                let nominal = AAC_SAMPLES_PER_FRAME * 1_000_000 / u64::from(a.sample_rate.max(1));
                (config, nominal)
            }
        };

        self.writer_mut()?
            .add_track(&config)
            .map_err(|e| RecorderError::Container(format!("add {} track: {e}", format.kind())))?;

        // The writer numbers tracks sequentially from 1 in registration
        // order.
        let id = TrackId(self.tracks.len() as u32 + 1);
        self.tracks.push(TrackState {
            id,
            kind: format.kind(),
            nominal_duration_us,
            held: None,
        });
        Ok(id)
    }

    fn start(&mut self) -> Result<()> {
        // The preamble went out in `create`; sample data may flow as soon
        // as the coordinator opens the gate.
        Ok(())
    }

    fn write_sample(&mut self, track: TrackId, packet: &EncodedPacket) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| RecorderError::Container("container already finalized".into()))?;
        let state = self
            .tracks
            .iter_mut()
            .find(|t| t.id == track)
            .ok_or_else(|| RecorderError::Container(format!("unknown track {}", track.0)))?;

        if let Some(held) = state.held.take() {
            let duration = (packet.pts_us - held.start_time_us).max(1) as u32;
            write_held(writer, state.id, held, duration)?;
        }
        state.held = Some(HeldSample {
            start_time_us: packet.pts_us,
            // every audio sample is a sync point regardless of flags
            is_sync: packet.key_frame || state.kind == StreamKind::Audio,
            data: packet.data.clone(),
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Err(RecorderError::Container(
                "container already finalized".into(),
            ));
        };
        for state in &mut self.tracks {
            if let Some(held) = state.held.take() {
                write_held(&mut writer, state.id, held, state.nominal_duration_us as u32)?;
            }
        }
        writer
            .write_end()
            .map_err(|e| RecorderError::Container(format!("finalize container: {e}")))?;
        writer.into_writer().flush()?;
        Ok(())
    }
}
