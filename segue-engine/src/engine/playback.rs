//! Playback control methods for PlaybackEngine
//!
//! **Responsibilities:**
//! - Play / Pause / Unpause / Stop transitions
//! - Debounced seeking

use super::PlaybackEngine;
use super::SEEK_DELAY;
use crate::error::{Error, Result};
use crate::pipeline::PipelineState;
use chrono::Utc;
use segue_common::events::{EngineEvent, EngineState};
use segue_common::FadeCurve;
use tokio::time::Instant;
use tracing::{debug, info, warn};

impl PlaybackEngine {
    /// Start the current pipeline, seeking to `offset_nanosec` within the
    /// track bounds
    pub fn play(&mut self, offset_nanosec: u64) -> Result<()> {
        let current = self
            .current
            .clone()
            .ok_or_else(|| Error::InvalidState("nothing loaded".to_string()))?;
        if current.is_buffering() {
            return Err(Error::InvalidState("pipeline is buffering".to_string()));
        }

        info!(pipeline_id = %current.id(), offset_nanosec, "Play");
        if let Err(e) = current.set_state(PipelineState::Playing) {
            warn!(pipeline_id = %current.id(), error = %e, "Failed to start pipeline");
            let url = current.url().to_string();
            self.teardown_pipeline(current);
            self.scope.set_pipeline(None);
            self.finish_buffering();
            let state = self.state();
            self.emit_state(state);
            self.broadcast(EngineEvent::InvalidSongRequested {
                url,
                timestamp: Utc::now(),
            });
            return Err(e);
        }

        // Paused while the start was in flight
        if self.fading_to_pause.is_some() {
            if let Err(e) = current.set_state(PipelineState::Paused) {
                warn!(pipeline_id = %current.id(), error = %e, "Failed to re-pause pipeline");
            }
            return Ok(());
        }

        self.start_position_timer();
        if offset_nanosec != 0 || current.bounds().begin_nanosec != 0 {
            self.seek(offset_nanosec);
        }

        self.emit_state(EngineState::Playing);
        self.broadcast(EngineEvent::ValidSongRequested {
            url: current.url().to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub fn pause(&mut self) {
        let Some(current) = self.current.clone() else {
            return;
        };
        if current.is_buffering() {
            return;
        }

        if self.fading_to_pause.is_some() {
            info!(pipeline_id = %current.id(), "Pause during pause fade, fading back in");
            self.reverse_pause_fade();
            self.emit_state(EngineState::Playing);
            return;
        }

        if current.state() != PipelineState::Playing {
            return;
        }

        info!(pipeline_id = %current.id(), "Pause");
        if self.settings.fade.fadeout_pause_enabled {
            self.start_pause_fade(current);
        } else {
            if let Err(e) = current.set_state(PipelineState::Paused) {
                warn!(pipeline_id = %current.id(), error = %e, "Failed to pause pipeline");
                return;
            }
            self.emit_state(EngineState::Paused);
            self.stop_position_timer();
        }
    }

    pub fn unpause(&mut self) {
        let Some(current) = self.current.clone() else {
            return;
        };
        if current.state() != PipelineState::Paused || current.is_buffering() {
            return;
        }

        info!(pipeline_id = %current.id(), faded = self.has_faded_out, "Unpause");
        if self.has_faded_out {
            // Resume from silence
            current.set_volume_modifier(0.0);
        }
        if let Err(e) = current.set_state(PipelineState::Playing) {
            warn!(pipeline_id = %current.id(), error = %e, "Failed to unpause pipeline");
            return;
        }
        if self.has_faded_out {
            self.start_fade_in(&current, FadeCurve::InOutQuad, self.pause_fade_duration());
            self.has_faded_out = false;
        }

        self.emit_state(EngineState::Playing);
        self.start_position_timer();
    }

    /// Stop playback. With `stop_after` (end of a "stop after this track")
    /// the current pipeline is torn down without a fade.
    pub fn stop(&mut self, stop_after: bool) {
        info!(stop_after, "Stop");
        self.stop_position_timer();
        self.pending_seek = None;
        self.seek_deadline = None;

        if self.fading_to_pause.take().is_some() {
            debug!("Cancelling pause fade");
            if let Some(stop) = self.fading_to_stop.take() {
                self.teardown_pipeline(stop.pipeline);
            }
            self.has_faded_out = true;
        }

        if let Some(current) = self.current.take() {
            self.fade_in = None;
            if self.settings.fade.fadeout_enabled && !stop_after {
                self.start_fadeout(current);
            } else {
                self.teardown_pipeline(current);
            }
        }
        if let Some(preload) = self.preload.take() {
            self.teardown_pipeline(preload.pipeline);
        }

        self.scope.set_pipeline(None);
        self.about_to_end_emitted = false;
        self.finish_buffering();
        self.emit_state(EngineState::Empty);
    }

    /// Request a seek to `offset_nanosec` within the track bounds. Only the
    /// last request within [`SEEK_DELAY`] reaches the pipeline.
    pub fn seek(&mut self, offset_nanosec: u64) {
        let Some(current) = &self.current else {
            return;
        };
        let target = current.bounds().begin_nanosec.saturating_add(offset_nanosec);
        debug!(target, "Seek requested");
        self.pending_seek = Some(target);
        self.seek_deadline = Some(Instant::now() + SEEK_DELAY);
    }

    /// Perform the pending seek now
    pub fn seek_now(&mut self) {
        self.seek_deadline = None;
        let Some(target) = self.pending_seek.take() else {
            return;
        };
        let Some(current) = self.current.clone() else {
            return;
        };

        debug!(pipeline_id = %current.id(), target, "Seeking");
        match current.seek(target) {
            Ok(()) => {
                self.scope.clear();
                self.about_to_end_emitted = false;
            }
            Err(e) => warn!(pipeline_id = %current.id(), error = %e, "Seek failed"),
        }
    }
}
