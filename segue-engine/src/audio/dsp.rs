//! Post-processing DSP
//!
//! Runs on interleaved stereo f32 in the output callback, in this order:
//! replay gain (optionally soft-clipped), mono downmix, equalizer preamp,
//! ten peaking equalizer bands, stereo balance. Volume is applied by the
//! caller afterwards.

use crate::post_processing::{PostProcessing, EQ_BAND_COUNT, EQ_BAND_FREQUENCIES};
use segue_common::config::ReplayGainMode;
use std::f32::consts::PI;

/// Bandwidth of each equalizer band
const EQ_BAND_Q: f32 = 1.0;

/// Level above which the replay-gain limiter starts compressing
const LIMITER_THRESHOLD: f32 = 0.5;

/// Normalised biquad coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    const IDENTITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Peaking EQ (RBJ audio EQ cookbook)
    fn peaking(sample_rate: u32, frequency: f32, gain_db: f32, q: f32) -> Self {
        if gain_db == 0.0 || frequency >= sample_rate as f32 / 2.0 {
            return Self::IDENTITY;
        }
        let a = 10f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * frequency / sample_rate as f32;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();
        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

/// Transposed direct form II state for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    z1: f32,
    z2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, c: &Coefficients, x: f32) -> f32 {
        let y = c.b0 * x + self.z1;
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }
}

/// Replay-gain values read from a track's tags
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReplayGainTags {
    pub track_gain_db: Option<f32>,
    pub album_gain_db: Option<f32>,
}

/// Stateful DSP chain for one pipeline
pub struct DspChain {
    sample_rate: u32,
    params: PostProcessing,
    tags: ReplayGainTags,
    coefficients: [Coefficients; EQ_BAND_COUNT],
    state: [[BiquadState; 2]; EQ_BAND_COUNT],
    replay_gain_factor: f32,
}

impl DspChain {
    pub fn new(sample_rate: u32, params: &PostProcessing, tags: ReplayGainTags) -> Self {
        let mut chain = Self {
            sample_rate,
            params: params.clone(),
            tags,
            coefficients: [Coefficients::IDENTITY; EQ_BAND_COUNT],
            state: [[BiquadState::default(); 2]; EQ_BAND_COUNT],
            replay_gain_factor: 1.0,
        };
        chain.configure(params);
        chain
    }

    /// Take new parameters. Filter state is kept so changes do not click.
    pub fn configure(&mut self, params: &PostProcessing) {
        self.params = params.clone();
        for (band, coefficients) in self.coefficients.iter_mut().enumerate() {
            *coefficients = if params.equalizer_enabled {
                Coefficients::peaking(
                    self.sample_rate,
                    EQ_BAND_FREQUENCIES[band],
                    params.band_gain_db(band),
                    EQ_BAND_Q,
                )
            } else {
                Coefficients::IDENTITY
            };
        }
        self.replay_gain_factor = replay_gain_factor(params, self.tags);
    }

    pub fn replay_gain_factor(&self) -> f32 {
        self.replay_gain_factor
    }

    /// Clear filter history, after a seek
    pub fn reset(&mut self) {
        self.state = [[BiquadState::default(); 2]; EQ_BAND_COUNT];
    }

    /// Process interleaved stereo samples in place
    pub fn process(&mut self, samples: &mut [f32]) {
        let rg = self.replay_gain_factor;
        let limit = self.params.replay_gain.enabled && self.params.replay_gain.compression;
        let mono = self.params.mono;
        let eq = self.params.equalizer_enabled;
        let preamp = self.params.preamp_factor();
        let (left_gain, right_gain) = self.params.balance_factors();

        for frame in samples.chunks_exact_mut(2) {
            let mut l = frame[0] * rg;
            let mut r = frame[1] * rg;
            if limit {
                l = soft_clip(l);
                r = soft_clip(r);
            }
            if mono {
                let m = (l + r) * 0.5;
                l = m;
                r = m;
            }
            if eq {
                l *= preamp;
                r *= preamp;
                for (c, state) in self.coefficients.iter().zip(self.state.iter_mut()) {
                    if c.is_identity() {
                        continue;
                    }
                    l = state[0].process(c, l);
                    r = state[1].process(c, r);
                }
            }
            frame[0] = l * left_gain;
            frame[1] = r * right_gain;
        }
    }
}

/// Linear replay-gain factor for the configured mode; album mode falls back
/// to the track gain
pub fn replay_gain_factor(params: &PostProcessing, tags: ReplayGainTags) -> f32 {
    let rg = &params.replay_gain;
    if !rg.enabled {
        return 1.0;
    }
    let gain = match rg.mode {
        ReplayGainMode::Track => tags.track_gain_db,
        ReplayGainMode::Album => tags.album_gain_db.or(tags.track_gain_db),
    }
    .unwrap_or(0.0);
    10f32.powf((gain + rg.preamp_db) / 20.0)
}

/// Compress above the threshold so the output never exceeds 1.0
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    let magnitude = x.abs();
    if magnitude <= LIMITER_THRESHOLD {
        return x;
    }
    let over = (magnitude - LIMITER_THRESHOLD) / (1.0 - LIMITER_THRESHOLD);
    let compressed = LIMITER_THRESHOLD + over.tanh() * (1.0 - LIMITER_THRESHOLD);
    compressed.copysign(x)
}
