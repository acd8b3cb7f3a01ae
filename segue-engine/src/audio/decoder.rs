//! Streaming audio decoder using symphonia
//!
//! Decodes one source packet at a time to interleaved stereo f32, so a
//! pipeline never holds more than its ring buffer's worth of PCM.

use crate::error::{Error, Result};
use segue_common::events::{resource_codes, stream_codes, ErrorDomain, MetaBundle};
use segue_common::time::{frames_to_nanos, NSEC_PER_SEC};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::{debug, warn};

/// Decoded packet, always two interleaved channels
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    pub samples: Vec<f32>,

    /// Source position of the first frame
    pub position_nanosec: u64,
}

impl DecodedPacket {
    pub fn frame_count(&self) -> usize {
        self.samples.len() / 2
    }
}

/// Packet-at-a-time decoder for one file
pub struct StreamingDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    source_channels: u16,
    length_nanosec: u64,
    metadata: MetaBundle,
    sample_buf: Option<SampleBuffer<f32>>,

    /// Frames still to drop after an accurate seek landed early
    skip_frames: u64,
}

impl StreamingDecoder {
    /// Open and probe `path`. `url` is only used in error reports.
    pub fn open(path: &Path, url: &str) -> Result<Self> {
        let construction = |reason: String, domain: ErrorDomain, code: i32| Error::Construction {
            url: url.to_string(),
            reason,
            domain,
            code,
        };

        let file = std::fs::File::open(path).map_err(|e| {
            construction(
                format!("cannot open {}: {}", path.display(), e),
                ErrorDomain::Resource,
                resource_codes::OPEN_READ,
            )
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let mut probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| {
                construction(
                    format!("unrecognised format: {}", e),
                    ErrorDomain::Stream,
                    stream_codes::TYPE_NOT_FOUND,
                )
            })?;

        // Tags may sit in the container or ahead of it (ID3v2)
        let mut tags: Vec<Tag> = Vec::new();
        if let Some(revision) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
            tags.extend(revision.tags().iter().cloned());
        }
        if let Some(revision) = probed.format.metadata().current() {
            tags.extend(revision.tags().iter().cloned());
        }

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                construction(
                    "no audio track".to_string(),
                    ErrorDomain::Stream,
                    stream_codes::TYPE_NOT_FOUND,
                )
            })?;

        let params = track.codec_params.clone();
        let track_id = track.id;
        let sample_rate = params.sample_rate.ok_or_else(|| {
            construction(
                "unknown sample rate".to_string(),
                ErrorDomain::Stream,
                stream_codes::TYPE_NOT_FOUND,
            )
        })?;
        let source_channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let length_nanosec = params
            .n_frames
            .map(|n| frames_to_nanos(n, sample_rate))
            .unwrap_or(0);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| {
                construction(
                    format!("no decoder: {}", e),
                    ErrorDomain::Stream,
                    stream_codes::CODEC_NOT_FOUND,
                )
            })?;

        let mut metadata = bundle_from_tags(&tags);
        metadata.samplerate = Some(sample_rate);
        metadata.bitdepth = params.bits_per_sample;
        if length_nanosec > 0 {
            metadata.length_nanosec = Some(length_nanosec);
        }

        debug!(
            path = %path.display(),
            sample_rate,
            channels = source_channels,
            length_nanosec,
            "Opened audio source"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            source_channels,
            length_nanosec,
            metadata,
            sample_buf: None,
            skip_frames: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn source_channels(&self) -> u16 {
        self.source_channels
    }

    /// Stream length, 0 when the container does not say
    pub fn length_nanosec(&self) -> u64 {
        self.length_nanosec
    }

    pub fn metadata(&self) -> &MetaBundle {
        &self.metadata
    }

    /// Decode the next packet. `Ok(None)` at end of stream.
    pub fn next_packet(&mut self) -> Result<Option<DecodedPacket>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(e)) => return Err(Error::Io(e)),
                Err(e) => return Err(Error::Decode(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(error = %e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(Error::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let needed = capacity as usize * spec.channels.count();
            if self.sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                self.sample_buf = Some(SampleBuffer::new(capacity, spec));
            }
            let Some(buf) = self.sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            let mut samples = to_stereo(buf.samples(), spec.channels.count() as u16);
            let mut frame_ts = packet.ts();
            if self.skip_frames > 0 {
                let skip = self.skip_frames.min((samples.len() / 2) as u64);
                samples.drain(..(skip as usize) * 2);
                self.skip_frames -= skip;
                frame_ts += skip;
            }
            if samples.is_empty() {
                continue;
            }

            return Ok(Some(DecodedPacket {
                samples,
                position_nanosec: self.ts_to_nanos(frame_ts),
            }));
        }
    }

    /// Seek to an absolute position. Returns the position decoding resumes
    /// from.
    pub fn seek(&mut self, nanosec: u64) -> Result<u64> {
        let time = Time::new(
            nanosec / NSEC_PER_SEC,
            (nanosec % NSEC_PER_SEC) as f64 / NSEC_PER_SEC as f64,
        );
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| Error::Decode(format!("seek failed: {}", e)))?;
        self.decoder.reset();
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        debug!(
            target = nanosec,
            required_ts = seeked.required_ts,
            actual_ts = seeked.actual_ts,
            "Decoder seeked"
        );
        Ok(self.ts_to_nanos(seeked.required_ts))
    }

    fn ts_to_nanos(&self, ts: u64) -> u64 {
        let time_base = self
            .format
            .tracks()
            .iter()
            .find(|t| t.id == self.track_id)
            .and_then(|t| t.codec_params.time_base);
        match time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                time.seconds * NSEC_PER_SEC + (time.frac * NSEC_PER_SEC as f64) as u64
            }
            None => frames_to_nanos(ts, self.sample_rate),
        }
    }
}

/// Map interleaved samples of any channel count onto two channels
pub fn to_stereo(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n as usize)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Parse a replay-gain tag value such as "-6.54 dB"
pub fn parse_gain_db(value: &str) -> Option<f32> {
    let trimmed = value.trim();
    let number = trimmed
        .strip_suffix("dB")
        .or_else(|| trimmed.strip_suffix("db"))
        .unwrap_or(trimmed)
        .trim();
    number.parse::<f32>().ok().filter(|v| v.is_finite())
}

fn bundle_from_tags(tags: &[Tag]) -> MetaBundle {
    let mut bundle = MetaBundle::default();
    for tag in tags {
        let value = tag.value.to_string();
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => bundle.title = Some(value),
            Some(StandardTagKey::Artist) => bundle.artist = Some(value),
            Some(StandardTagKey::Album) => bundle.album = Some(value),
            Some(StandardTagKey::Comment) => bundle.comment = Some(value),
            Some(StandardTagKey::Genre) => bundle.genre = Some(value),
            Some(StandardTagKey::Lyrics) => bundle.lyrics = Some(value),
            Some(StandardTagKey::Date) => {
                bundle.year = value.get(..4).and_then(|y| y.parse().ok());
            }
            Some(StandardTagKey::TrackNumber) => {
                bundle.track = value.split('/').next().and_then(|t| t.trim().parse().ok());
            }
            Some(StandardTagKey::ReplayGainTrackGain) => bundle.track_gain_db = parse_gain_db(&value),
            Some(StandardTagKey::ReplayGainAlbumGain) => bundle.album_gain_db = parse_gain_db(&value),
            _ => {}
        }
    }
    bundle
}
