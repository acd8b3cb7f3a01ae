//! Volume ramps
//!
//! **Responsibilities:**
//! - Crossfade: outgoing pipeline ramps down in the fade-to-stop slot while
//!   the incoming one ramps up as current
//! - Stop fade: current pipeline ramps down in the fade-to-stop slot, then
//!   is torn down
//! - Pause fade: current pipeline ramps down (in-out-quad) and is paused;
//!   a second Pause during the ramp reverses it
//!
//! Ramps are wall-clock based. The runtime calls `tick_fades` every
//! [`FADE_TICK`](super::FADE_TICK) while any ramp is active.

use super::PlaybackEngine;
use crate::pipeline::{Pipeline, PipelineState};
use chrono::Utc;
use segue_common::events::{EngineEvent, EngineState};
use segue_common::FadeCurve;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One volume ramp from `from` to `to` over `duration`
#[derive(Debug, Clone, Copy)]
pub(super) struct VolumeRamp {
    curve: FadeCurve,
    from: f64,
    to: f64,
    started: Instant,
    duration: Duration,
}

impl VolumeRamp {
    pub(super) fn new(curve: FadeCurve, from: f64, to: f64, duration: Duration, now: Instant) -> Self {
        Self {
            curve,
            from,
            to,
            started: now,
            duration,
        }
    }

    fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }

    pub(super) fn value_at(&self, now: Instant) -> f64 {
        self.curve.interpolate(self.from, self.to, self.progress(now))
    }

    pub(super) fn is_finished(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }
}

/// A pipeline ramping down in one of the fade slots
pub(super) struct FadeSlot {
    pub(super) pipeline: Arc<dyn Pipeline>,
    pub(super) ramp: VolumeRamp,
}

impl PlaybackEngine {
    /// Move `pipeline` into the fade-to-stop slot and ramp it to silence.
    ///
    /// An older stop fade still in flight is completed first, which bounds
    /// the number of live pipelines.
    pub(super) fn start_fadeout(&mut self, pipeline: Arc<dyn Pipeline>) {
        if let Some(older) = self.fading_to_stop.take() {
            debug!(pipeline_id = %older.pipeline.id(), "Completing previous fade-out early");
            self.teardown_pipeline(older.pipeline);
            self.broadcast(EngineEvent::FadeoutFinished { timestamp: Utc::now() });
        }

        let now = Instant::now();
        let duration = Duration::from_nanos(self.settings.fade.fadeout_duration_nanos());
        let ramp = VolumeRamp::new(
            FadeCurve::Linear,
            pipeline.volume_modifier(),
            0.0,
            duration,
            now,
        );
        debug!(pipeline_id = %pipeline.id(), ?duration, "Starting fade-out");
        self.fading_to_stop = Some(FadeSlot { pipeline, ramp });
        self.schedule_fade_tick(now);
    }

    /// Begin fading the current pipeline out for a pause
    pub(super) fn start_pause_fade(&mut self, current: Arc<dyn Pipeline>) {
        let now = Instant::now();
        let duration = Duration::from_nanos(self.settings.fade.fadeout_pause_duration_nanos());

        self.fade_in = None;
        let ramp = VolumeRamp::new(
            FadeCurve::InOutQuad,
            current.volume_modifier(),
            0.0,
            duration,
            now,
        );
        debug!(pipeline_id = %current.id(), ?duration, "Starting pause fade");
        self.fading_to_pause = Some(FadeSlot { pipeline: current, ramp });

        // A crossfade tail still playing goes silent by the time we pause
        if let Some(stop) = self.fading_to_stop.as_mut() {
            if stop.pipeline.state() == PipelineState::Playing {
                stop.ramp = VolumeRamp::new(
                    FadeCurve::Linear,
                    stop.pipeline.volume_modifier(),
                    0.0,
                    duration,
                    now,
                );
            }
        }
        self.schedule_fade_tick(now);
    }

    /// Reverse an in-flight pause fade; the current pipeline ramps back up
    /// from wherever it had got to.
    pub(super) fn reverse_pause_fade(&mut self) {
        if self.fading_to_pause.take().is_none() {
            return;
        }
        if let Some(current) = self.current.clone() {
            self.start_fade_in(&current, FadeCurve::InOutQuad, self.pause_fade_duration());
        }
        self.has_faded_out = false;
    }

    /// Ramp `pipeline` (the current one) up to full volume
    pub(super) fn start_fade_in(&mut self, pipeline: &Arc<dyn Pipeline>, curve: FadeCurve, duration: Duration) {
        let now = Instant::now();
        let from = pipeline.volume_modifier();
        self.fade_in = Some(VolumeRamp::new(curve, from, 1.0, duration, now));
        self.schedule_fade_tick(now);
    }

    pub(super) fn pause_fade_duration(&self) -> Duration {
        Duration::from_nanos(self.settings.fade.fadeout_pause_duration_nanos())
    }

    pub(super) fn has_active_fades(&self) -> bool {
        self.fade_in.is_some() || self.fading_to_stop.is_some() || self.fading_to_pause.is_some()
    }

    fn schedule_fade_tick(&mut self, now: Instant) {
        if self.fade_deadline.is_none() {
            self.fade_deadline = Some(now + super::FADE_TICK);
        }
    }

    /// Apply every active ramp at `now` and finish the ones that are done
    pub fn tick_fades(&mut self, now: Instant) {
        if let Some(ramp) = self.fade_in {
            if let Some(current) = &self.current {
                current.set_volume_modifier(ramp.value_at(now));
            }
            if ramp.is_finished(now) || self.current.is_none() {
                self.fade_in = None;
            }
        }

        if Self::step_slot(self.fading_to_stop.as_ref(), now) {
            self.finish_stop_fade();
        }
        if Self::step_slot(self.fading_to_pause.as_ref(), now) {
            self.finish_pause_fade();
        }

        self.fade_deadline = if self.has_active_fades() {
            Some(now + super::FADE_TICK)
        } else {
            None
        };
    }

    /// Apply a slot's ramp; true once it has finished
    fn step_slot(slot: Option<&FadeSlot>, now: Instant) -> bool {
        match slot {
            Some(slot) => {
                slot.pipeline.set_volume_modifier(slot.ramp.value_at(now));
                slot.ramp.is_finished(now)
            }
            None => false,
        }
    }

    /// The fade-to-stop pipeline reached silence (or its end of stream)
    pub(super) fn finish_stop_fade(&mut self) {
        if let Some(slot) = self.fading_to_stop.take() {
            debug!(pipeline_id = %slot.pipeline.id(), "Fade-out finished");
            self.teardown_pipeline(slot.pipeline);
            self.broadcast(EngineEvent::FadeoutFinished { timestamp: Utc::now() });
        }
    }

    fn finish_pause_fade(&mut self) {
        let Some(slot) = self.fading_to_pause.take() else {
            return;
        };
        debug!(pipeline_id = %slot.pipeline.id(), "Pause fade finished");

        if let Err(e) = slot.pipeline.set_state(PipelineState::Paused) {
            warn!(pipeline_id = %slot.pipeline.id(), error = %e, "Failed to pause after fade");
        }
        if let Some(current) = &self.current {
            if current.id() != slot.pipeline.id() {
                if let Err(e) = current.set_state(PipelineState::Paused) {
                    warn!(pipeline_id = %current.id(), error = %e, "Failed to pause current pipeline");
                }
            }
        }
        self.settle_faded_pause();
    }

    /// Shared end of a pause fade once the current pipeline is paused:
    /// drop the crossfade tail and announce the pause
    pub(super) fn settle_faded_pause(&mut self) {
        // The crossfade tail is silent now and would never resume
        if let Some(stop) = self.fading_to_stop.take() {
            if let Err(e) = stop.pipeline.set_state(PipelineState::Paused) {
                debug!(pipeline_id = %stop.pipeline.id(), error = %e, "Fading pipeline did not pause");
            }
            self.teardown_pipeline(stop.pipeline);
        }

        self.has_faded_out = true;
        self.stop_position_timer();
        self.emit_state(EngineState::Paused);
        self.broadcast(EngineEvent::FadeoutFinished { timestamp: Utc::now() });
    }
}
