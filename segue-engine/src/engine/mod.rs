//! Playback engine
//!
//! Orchestrates up to four live pipelines (current, fading-to-stop,
//! fading-to-pause, preloaded) to produce gapless and crossfaded track
//! transitions, and turns their asynchronous events into engine events.
//!
//! **Module Structure:**
//! - `core.rs`: engine state, slot bookkeeping, Load and StartPreloading
//! - `playback.rs`: Play, Pause, Unpause, Stop, Seek
//! - `fade.rs`: volume ramps for crossfades, stop fades and pause fades
//! - `timers.rs`: seek debounce, position polling, fade ticks
//! - `pipeline_events.rs`: end-of-stream, errors, metadata, buffering, buffers
//! - `settings.rs`: volume, equalizer, balance, settings reload
//! - `consumers.rs`: decoded-buffer fan-out
//! - `runtime.rs`: the tokio task that owns the engine, and its handle
//!
//! `PlaybackEngine` itself is synchronous: every method runs to completion on
//! the runtime task and records timer deadlines instead of sleeping.

mod consumers;
mod core;
mod fade;
mod pipeline_events;
mod playback;
mod runtime;
mod settings;
mod timers;

pub use consumers::{BufferConsumer, BufferConsumers};
pub use core::{EngineStatus, PlaybackEngine};
pub use runtime::EngineHandle;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::BitOr;
use std::time::Duration;

/// Interval of the position poll while playing
pub const TIMER_INTERVAL: Duration = Duration::from_secs(1);

/// Lead time before the end of a track at which the next one is requested,
/// when not auto-crossfading
pub const PRELOAD_GAP_NANOSEC: u64 = 3_000_000_000;

/// Trailing debounce for user seeks
pub const SEEK_DELAY: Duration = Duration::from_millis(100);

/// Volume ramp update interval
pub const FADE_TICK: Duration = Duration::from_millis(25);

/// Slack added to the about-to-end window so a 1 s poll never misses it
pub const TIMER_FUDGE_NANOSEC: u64 = 1_100_000_000;

/// Why the track is changing, passed to Load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackChangeFlags(u8);

impl TrackChangeFlags {
    /// The user picked the track
    pub const MANUAL: Self = Self(1);
    /// Playlist advanced on its own
    pub const AUTO: Self = Self(1 << 1);
    /// Intro (preview) playback
    pub const INTRO: Self = Self(1 << 2);
    /// Next track is from the same album
    pub const SAME_ALBUM: Self = Self(1 << 3);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parse flag names ("manual", "auto", "intro", "same_album")
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        names.iter().try_fold(Self::empty(), |flags, name| {
            let flag = match name.as_ref().to_lowercase().as_str() {
                "manual" => Self::MANUAL,
                "auto" => Self::AUTO,
                "intro" => Self::INTRO,
                "same_album" | "samealbum" => Self::SAME_ALBUM,
                other => {
                    return Err(Error::BadRequest(format!("unknown track change flag: {}", other)))
                }
            };
            Ok(flags | flag)
        })
    }
}

impl BitOr for TrackChangeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Map a 0..=100 user volume onto the logarithmic output scale
pub fn log_volume(percent: u8) -> u8 {
    let v = f64::from(percent.min(100));
    let mapped = 100.0 - 100.0 * ((100.0 - v) * 0.09 + 1.0).log10();
    mapped.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let flags = TrackChangeFlags::AUTO | TrackChangeFlags::SAME_ALBUM;
        assert!(flags.contains(TrackChangeFlags::AUTO));
        assert!(flags.contains(TrackChangeFlags::SAME_ALBUM));
        assert!(!flags.contains(TrackChangeFlags::MANUAL));
        assert!(flags.contains(TrackChangeFlags::empty()));
    }

    #[test]
    fn test_flags_from_names() {
        let flags = TrackChangeFlags::from_names(&["Manual", "intro"]).unwrap();
        assert_eq!(flags, TrackChangeFlags::MANUAL | TrackChangeFlags::INTRO);
        assert_eq!(
            TrackChangeFlags::from_names::<&str>(&[]).unwrap(),
            TrackChangeFlags::empty()
        );
        assert!(matches!(
            TrackChangeFlags::from_names(&["sideways"]),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn test_log_volume_endpoints() {
        assert_eq!(log_volume(100), 100);
        assert_eq!(log_volume(0), 0);
        assert_eq!(log_volume(250), 100);
        assert_eq!(log_volume(50), 26);
        assert_eq!(log_volume(90), 72);
        assert!(log_volume(30) < log_volume(60));
    }
}
