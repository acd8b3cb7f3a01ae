//! Core audio data types
//!
//! Decoded audio travels from a pipeline's decode thread to the engine (and
//! from there to the scope buffer and every buffer consumer) as reference
//! counted [`AudioChunk`]s, so one decode allocation serves all readers.

/// A block of decoded, post-processed PCM from one pipeline.
///
/// **Format:**
/// - Samples are f32 (floating point -1.0 to 1.0)
/// - Interleaved: [L, R, L, R, ...] for stereo
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// PCM audio samples (interleaved)
    pub samples: Vec<f32>,

    /// Sample rate of `samples`
    pub sample_rate: u32,

    /// Channel count
    pub channels: u16,

    /// Stream position of the first frame, relative to the start of the file
    pub position_nanosec: u64,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, position_nanosec: u64) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            position_nanosec,
        }
    }

    /// Number of frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Duration covered by this chunk
    pub fn duration_nanosec(&self) -> u64 {
        segue_common::time::frames_to_nanos(self.frame_count() as u64, self.sample_rate)
    }

    /// Peak absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count_and_duration() {
        let chunk = AudioChunk::new(vec![0.0; 44_100 * 2], 44_100, 2, 0);
        assert_eq!(chunk.frame_count(), 44_100);
        assert_eq!(chunk.duration_nanosec(), 1_000_000_000);
    }

    #[test]
    fn test_zero_channels() {
        let chunk = AudioChunk::new(vec![0.5; 4], 44_100, 0, 0);
        assert_eq!(chunk.frame_count(), 0);
        assert_eq!(chunk.duration_nanosec(), 0);
    }

    #[test]
    fn test_peak() {
        let chunk = AudioChunk::new(vec![0.1, -0.8, 0.3, 0.2], 48_000, 2, 0);
        assert!((chunk.peak() - 0.8).abs() < f32::EPSILON);
    }
}
