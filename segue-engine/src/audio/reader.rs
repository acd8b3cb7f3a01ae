//! Track reader
//!
//! Wraps a [`StreamingDecoder`] with the track's bounds and a resampler so
//! the decode thread sees a plain sequence of output-rate chunks that stops
//! at the end bound.

use super::decoder::StreamingDecoder;
use super::resampler::StreamResampler;
use super::types::AudioChunk;
use crate::error::Result;
use crate::pipeline::TrackBounds;
use segue_common::time::{frames_to_nanos, nanos_to_frames};

pub struct TrackReader {
    decoder: StreamingDecoder,
    resampler: StreamResampler,
    bounds: TrackBounds,
    output_rate: u32,

    /// Source position of the next output frame
    position_nanosec: u64,
    finished: bool,
}

impl TrackReader {
    /// Wrap `decoder`, converting to `output_rate`, and move to the start
    /// bound
    pub fn new(mut decoder: StreamingDecoder, bounds: TrackBounds, output_rate: u32) -> Result<Self> {
        let resampler = StreamResampler::new(decoder.sample_rate(), output_rate, 2)?;
        let position_nanosec = if bounds.begin_nanosec > 0 {
            decoder.seek(bounds.begin_nanosec)?
        } else {
            0
        };
        Ok(Self {
            decoder,
            resampler,
            bounds,
            output_rate,
            position_nanosec,
            finished: false,
        })
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn decoder(&self) -> &StreamingDecoder {
        &self.decoder
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Reposition to an absolute stream position. Returns where playback
    /// resumes.
    pub fn seek(&mut self, nanosec: u64) -> Result<u64> {
        let target = nanosec.max(self.bounds.begin_nanosec);
        let resumed = self.decoder.seek(target)?;
        self.resampler.reset();
        self.position_nanosec = resumed;
        self.finished = false;
        Ok(resumed)
    }

    /// Next chunk at the output rate. `Ok(None)` once the stream or the end
    /// bound is reached.
    pub fn next_chunk(&mut self) -> Result<Option<AudioChunk>> {
        while !self.finished {
            let samples = match self.decoder.next_packet()? {
                Some(packet) => {
                    let mut samples = packet.samples;
                    if self.bounds.has_end() {
                        let remaining = self.bounds.end_nanosec.saturating_sub(packet.position_nanosec);
                        let keep = nanos_to_frames(remaining, self.decoder.sample_rate()) as usize;
                        if keep * 2 < samples.len() {
                            samples.truncate(keep * 2);
                            self.finished = true;
                        }
                    }
                    let mut out = self.resampler.process(&samples)?;
                    if self.finished {
                        out.extend(self.resampler.flush()?);
                    }
                    out
                }
                None => {
                    self.finished = true;
                    self.resampler.flush()?
                }
            };

            if samples.is_empty() {
                continue;
            }
            let chunk = AudioChunk::new(samples, self.output_rate, 2, self.position_nanosec);
            self.position_nanosec += frames_to_nanos(chunk.frame_count() as u64, self.output_rate);
            return Ok(Some(chunk));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn write_silence(dir: &Path, rate: u32, frames: u32) -> PathBuf {
        let path = dir.join("silence.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..frames * 2 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn drain(reader: &mut TrackReader) -> (usize, Vec<u64>) {
        let mut frames = 0;
        let mut positions = Vec::new();
        while let Some(chunk) = reader.next_chunk().unwrap() {
            positions.push(chunk.position_nanosec);
            frames += chunk.frame_count();
        }
        (frames, positions)
    }

    #[test]
    fn test_reads_whole_file_at_source_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_silence(dir.path(), 8_000, 8_000);
        let decoder = StreamingDecoder::open(&path, "file:///silence.wav").unwrap();
        let mut reader = TrackReader::new(decoder, TrackBounds::default(), 8_000).unwrap();

        let (frames, positions) = drain(&mut reader);
        assert_eq!(frames, 8_000);
        assert_eq!(positions[0], 0);
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(reader.is_finished());
    }

    #[test]
    fn test_bounds_trim_start_and_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_silence(dir.path(), 8_000, 16_000);
        let decoder = StreamingDecoder::open(&path, "file:///silence.wav").unwrap();
        let bounds = TrackBounds::new(false, 500_000_000, 1_500_000_000);
        let mut reader = TrackReader::new(decoder, bounds, 8_000).unwrap();

        let (frames, positions) = drain(&mut reader);
        assert_eq!(positions[0], 500_000_000);
        assert_eq!(frames, 8_000);
    }

    #[test]
    fn test_resamples_to_output_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_silence(dir.path(), 22_050, 22_050);
        let decoder = StreamingDecoder::open(&path, "file:///silence.wav").unwrap();
        let mut reader = TrackReader::new(decoder, TrackBounds::default(), 44_100).unwrap();

        let (frames, _) = drain(&mut reader);
        assert!((43_000..=45_500).contains(&frames), "got {} frames", frames);
    }

    #[test]
    fn test_seek_restarts_after_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_silence(dir.path(), 8_000, 8_000);
        let decoder = StreamingDecoder::open(&path, "file:///silence.wav").unwrap();
        let mut reader = TrackReader::new(decoder, TrackBounds::default(), 8_000).unwrap();

        drain(&mut reader);
        assert_eq!(reader.seek(250_000_000).unwrap(), 250_000_000);
        assert!(!reader.is_finished());
        let chunk = reader.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.position_nanosec, 250_000_000);
    }
}
