//! Streaming sample rate conversion using rubato
//!
//! Decoded packets arrive in arbitrary sizes; rubato's fixed-input
//! resampler wants fixed chunks. Input is queued per channel and converted
//! whenever a full chunk is available. `flush` drains the tail at end of
//! stream.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Frames per rubato input chunk
pub const RESAMPLER_CHUNK_FRAMES: usize = 1024;

/// Stereo stream resampler; a passthrough when rates match
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    channels: usize,
    pending: Vec<Vec<f32>>,
    input_rate: u32,
    output_rate: u32,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Result<Self> {
        let channels = channels.max(1) as usize;
        let inner = if input_rate == output_rate || input_rate == 0 || output_rate == 0 {
            None
        } else {
            debug!(input_rate, output_rate, channels, "Creating resampler");
            Some(
                FastFixedIn::<f32>::new(
                    output_rate as f64 / input_rate as f64,
                    1.0,
                    PolynomialDegree::Septic,
                    RESAMPLER_CHUNK_FRAMES,
                    channels,
                )
                .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?,
            )
        };

        Ok(Self {
            inner,
            channels,
            pending: vec![Vec::with_capacity(RESAMPLER_CHUNK_FRAMES * 2); channels],
            input_rate,
            output_rate,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Queue interleaved input; returns whatever output is ready
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(interleaved.to_vec());
        };

        let planar = deinterleave(interleaved, self.channels as u16);
        for (queued, fresh) in self.pending.iter_mut().zip(planar) {
            queued.extend(fresh);
        }

        let mut out: Vec<Vec<f32>> = vec![Vec::new(); self.channels];
        while self.pending[0].len() >= resampler.input_frames_next() {
            let needed = resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            let converted = resampler
                .process(&chunk, None)
                .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;
            for (dst, src) in out.iter_mut().zip(converted) {
                dst.extend(src);
            }
        }
        Ok(interleave(out))
    }

    /// Convert whatever input is still queued
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };
        if self.pending[0].is_empty() {
            return Ok(Vec::new());
        }
        let tail: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
        let converted = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;
        Ok(interleave(converted))
    }

    /// Drop queued input and filter state, after a seek
    pub fn reset(&mut self) {
        for channel in &mut self.pending {
            channel.clear();
        }
        if let Some(resampler) = self.inner.as_mut() {
            resampler.reset();
        }
    }
}

/// Convert interleaved samples to planar format.
///
/// Input:  [L, R, L, R, ...]
/// Output: [[L, L, ...], [R, R, ...]]
pub fn deinterleave(samples: &[f32], channels: u16) -> Vec<Vec<f32>> {
    let channels = channels.max(1) as usize;
    let mut planar = vec![Vec::with_capacity(samples.len() / channels); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, &sample) in planar.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }
    planar
}

/// Convert planar samples to interleaved format
pub fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
    let Some(frames) = planar.iter().map(Vec::len).min() else {
        return Vec::new();
    };
    let mut interleaved = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        for channel in &planar {
            interleaved.push(channel[i]);
        }
    }
    interleaved
}
