//! Engine timers
//!
//! Three deadlines: the seek debounce, the 1 s position poll (only while
//! playing) and the fade tick (only while a ramp is active). The owner
//! sleeps until `next_deadline` and then calls `on_timers`.

use super::{PlaybackEngine, PRELOAD_GAP_NANOSEC, TIMER_FUDGE_NANOSEC, TIMER_INTERVAL};
use chrono::Utc;
use segue_common::events::EngineEvent;
use tokio::time::Instant;
use tracing::{debug, trace};

impl PlaybackEngine {
    /// Earliest pending deadline, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.seek_deadline, self.position_deadline, self.fade_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    /// Fire every deadline that has passed at `now`
    pub fn on_timers(&mut self, now: Instant) {
        if self.seek_deadline.is_some_and(|d| d <= now) {
            self.seek_now();
        }
        if self.fade_deadline.is_some_and(|d| d <= now) {
            self.tick_fades(now);
        }
        if self.position_deadline.is_some_and(|d| d <= now) {
            self.position_deadline = Some(now + TIMER_INTERVAL);
            self.position_tick();
        }
    }

    pub(super) fn start_position_timer(&mut self) {
        if self.position_deadline.is_none() {
            self.position_deadline = Some(Instant::now() + TIMER_INTERVAL);
        }
    }

    pub(super) fn stop_position_timer(&mut self) {
        self.position_deadline = None;
    }

    pub fn is_position_timer_running(&self) -> bool {
        self.position_deadline.is_some()
    }

    /// Lead time before the end of a track at which TrackAboutToEnd fires
    pub fn about_to_end_window_nanosec(&self) -> u64 {
        let fade = &self.settings.fade;
        let gap = self.settings.buffer.duration_nanos()
            + if fade.autocrossfade_enabled {
                fade.fadeout_duration_nanos()
            } else {
                PRELOAD_GAP_NANOSEC
            };
        gap + TIMER_FUDGE_NANOSEC
    }

    /// Position poll: ask for the next track once inside the window
    pub fn position_tick(&mut self) {
        let length = self.length_nanosec();
        if length == 0 {
            return;
        }
        let position = self.position_nanosec();
        let remaining = length.saturating_sub(position);
        trace!(position, length, remaining, "Position tick");

        if remaining < self.about_to_end_window_nanosec() && !self.about_to_end_emitted {
            debug!(remaining, "Track about to end");
            self.about_to_end_emitted = true;
            self.broadcast(EngineEvent::TrackAboutToEnd { timestamp: Utc::now() });
        }
    }
}
