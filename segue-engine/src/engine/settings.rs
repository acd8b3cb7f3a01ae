//! Volume, post-processing and settings reload
//!
//! Every change is applied to each live pipeline in place; pipelines are
//! never rebuilt for it.

use super::consumers::BufferConsumer;
use super::{log_volume, PlaybackEngine};
use crate::error::Result;
use crate::pipeline::OutputDetails;
use crate::post_processing::EQ_BAND_COUNT;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl PlaybackEngine {
    pub fn set_volume(&mut self, percent: u8) {
        self.volume = percent.min(100);
        let mapped = log_volume(self.volume);
        debug!(volume = self.volume, mapped, "Set volume");
        for pipeline in self.live_pipelines() {
            pipeline.set_volume(mapped);
        }
    }

    pub fn set_equalizer_enabled(&mut self, enabled: bool) {
        self.post_processing.equalizer_enabled = enabled;
        self.apply_post_processing();
    }

    pub fn set_equalizer_parameters(&mut self, preamp: i32, gains: [i32; EQ_BAND_COUNT]) {
        self.post_processing.set_equalizer(preamp, gains);
        self.apply_post_processing();
    }

    pub fn set_stereo_balance(&mut self, balance: f32) {
        self.post_processing.set_stereo_balance(balance);
        self.apply_post_processing();
    }

    fn apply_post_processing(&self) {
        let live = self.live_pipelines();
        debug!(pipelines = live.len(), "Applying post-processing");
        for pipeline in live {
            pipeline.apply_post_processing(&self.post_processing);
        }
    }

    /// Re-read settings. Fade, replay-gain and mono values take effect
    /// immediately; output and buffer values on the next pipeline built.
    /// On failure the previous settings stay in force.
    pub fn reload_settings(&mut self) -> Result<()> {
        match self.settings_source.load() {
            Ok(settings) => {
                info!(source = %self.settings_source.describe(), "Settings reloaded");
                self.post_processing.apply_settings(&settings);
                self.settings = settings;
                self.apply_post_processing();
                Ok(())
            }
            Err(e) => {
                warn!(source = %self.settings_source.describe(), error = %e, "Settings reload failed, keeping previous settings");
                Err(e)
            }
        }
    }

    /// Register a decoded-buffer consumer; it sees only future buffers
    pub fn add_buffer_consumer(&mut self, consumer: Arc<dyn BufferConsumer>) -> bool {
        self.consumers.add(consumer)
    }

    pub fn remove_buffer_consumer(&mut self, consumer: &Arc<dyn BufferConsumer>) -> bool {
        self.consumers.remove(consumer)
    }

    pub fn buffer_consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn outputs(&self) -> Vec<OutputDetails> {
        self.backend.outputs()
    }
}
