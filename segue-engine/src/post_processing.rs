//! Post-processing parameters
//!
//! The engine owns one [`PostProcessing`] value. Every change is pushed by
//! reference into each live pipeline, and every new pipeline receives the
//! current value at construction. Pipelines are never rebuilt for it.

use segue_common::config::{EngineSettings, ReplayGainSettings};
use serde::{Deserialize, Serialize};

/// Number of equalizer bands
pub const EQ_BAND_COUNT: usize = 10;

/// Centre frequency (Hz) of each equalizer band
pub const EQ_BAND_FREQUENCIES: [f32; EQ_BAND_COUNT] = [
    60.0, 170.0, 310.0, 600.0, 1000.0, 3000.0, 6000.0, 12000.0, 14000.0, 16000.0,
];

/// Equalizer, replay-gain, balance and mono settings shared by all pipelines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostProcessing {
    pub equalizer_enabled: bool,

    /// Equalizer preamp, -100..=100
    pub equalizer_preamp: i32,

    /// Per-band gain, -100..=100
    pub equalizer_gains: [i32; EQ_BAND_COUNT],

    /// -1.0 (left only) ..= 1.0 (right only)
    pub stereo_balance: f32,

    pub replay_gain: ReplayGainSettings,

    /// Downmix to mono
    pub mono: bool,
}

impl Default for PostProcessing {
    fn default() -> Self {
        Self {
            equalizer_enabled: false,
            equalizer_preamp: 0,
            equalizer_gains: [0; EQ_BAND_COUNT],
            stereo_balance: 0.0,
            replay_gain: ReplayGainSettings::default(),
            mono: false,
        }
    }
}

impl PostProcessing {
    /// Parameters seeded from the settings file
    pub fn from_settings(settings: &EngineSettings) -> Self {
        let mut params = Self::default();
        params.apply_settings(settings);
        params
    }

    /// Take over the live-applicable values from reloaded settings
    pub fn apply_settings(&mut self, settings: &EngineSettings) {
        self.replay_gain = settings.replay_gain.clone();
        self.mono = settings.mono_playback;
    }

    pub fn set_equalizer(&mut self, preamp: i32, gains: [i32; EQ_BAND_COUNT]) {
        self.equalizer_preamp = preamp.clamp(-100, 100);
        self.equalizer_gains = gains.map(|g| g.clamp(-100, 100));
    }

    pub fn set_stereo_balance(&mut self, balance: f32) {
        self.stereo_balance = if balance.is_finite() {
            balance.clamp(-1.0, 1.0)
        } else {
            0.0
        };
    }

    /// Linear factor applied before the equalizer bands
    pub fn preamp_factor(&self) -> f32 {
        (self.equalizer_preamp + 100) as f32 / 100.0
    }

    /// Gain in dB for one band. Cuts reach -24 dB, boosts +12 dB.
    pub fn band_gain_db(&self, band: usize) -> f32 {
        let value = self.equalizer_gains.get(band).copied().unwrap_or(0) as f32;
        if value < 0.0 {
            value * 0.24
        } else {
            value * 0.12
        }
    }

    /// Left and right channel factors for the current balance
    pub fn balance_factors(&self) -> (f32, f32) {
        let b = self.stereo_balance;
        let left = if b > 0.0 { 1.0 - b } else { 1.0 };
        let right = if b < 0.0 { 1.0 + b } else { 1.0 };
        (left, right)
    }
}
