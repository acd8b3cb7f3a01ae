//! Engine event types
//!
//! Events produced by the playback engine toward the player/UI layer.
//! Serialized as JSON with a `type` tag for the SSE stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one pipeline instance.
///
/// Assigned by the engine from a monotonically increasing counter and never
/// reused within a process, so late events for a torn-down pipeline can be
/// recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub u64);

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline#{}", self.0)
    }
}

/// Engine-level playback state
///
/// Derived from which pipelines exist and their individual states:
/// - Playing: current pipeline exists and is playing
/// - Paused: current pipeline exists and is paused
/// - Empty: no current pipeline and nothing preloaded
/// - Idle: anything else (loaded but not started, or only a preload)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Empty,
    Idle,
    Playing,
    Paused,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Empty => write!(f, "empty"),
            EngineState::Idle => write!(f, "idle"),
            EngineState::Playing => write!(f, "playing"),
            EngineState::Paused => write!(f, "paused"),
        }
    }
}

/// Error domain reported by a pipeline, paired with a numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorDomain {
    /// Engine-internal failure (state changes, clocks)
    Core,
    /// Missing or broken plugin/codec library
    Library,
    /// Source could not be opened, read or reached
    Resource,
    /// Stream contents could not be typed, demuxed or decoded
    Stream,
}

/// Well-known codes within [`ErrorDomain::Resource`]
pub mod resource_codes {
    pub const FAILED: i32 = 1;
    pub const NOT_FOUND: i32 = 3;
    pub const OPEN_READ: i32 = 5;
    pub const READ: i32 = 9;
    pub const SEEK: i32 = 11;
    pub const NOT_AUTHORIZED: i32 = 15;
}

/// Well-known codes within [`ErrorDomain::Stream`]
pub mod stream_codes {
    pub const FAILED: i32 = 1;
    pub const TYPE_NOT_FOUND: i32 = 4;
    pub const CODEC_NOT_FOUND: i32 = 6;
    pub const DECODE: i32 = 7;
}

/// Well-known codes within [`ErrorDomain::Core`]
pub mod core_codes {
    pub const FAILED: i32 = 1;
    pub const STATE_CHANGE: i32 = 4;
}

impl ErrorDomain {
    /// Whether an error should be shown to the user.
    ///
    /// Unreadable or untyped sources are expected during normal library
    /// playback; the player logs them and skips the track instead.
    pub fn is_user_visible(&self, code: i32) -> bool {
        match self {
            ErrorDomain::Resource => !matches!(
                code,
                resource_codes::NOT_FOUND | resource_codes::OPEN_READ | resource_codes::NOT_AUTHORIZED
            ),
            ErrorDomain::Stream => {
                !matches!(code, stream_codes::TYPE_NOT_FOUND | stream_codes::FAILED)
            }
            ErrorDomain::Core | ErrorDomain::Library => true,
        }
    }
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDomain::Core => write!(f, "core"),
            ErrorDomain::Library => write!(f, "library"),
            ErrorDomain::Resource => write!(f, "resource"),
            ErrorDomain::Stream => write!(f, "stream"),
        }
    }
}

/// Track metadata discovered by a pipeline while decoding.
///
/// Every field is optional; pipelines fill in what their source exposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaBundle {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub comment: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub track: Option<u32>,
    pub length_nanosec: Option<u64>,
    pub samplerate: Option<u32>,
    pub bitdepth: Option<u32>,
    pub bitrate: Option<u32>,
    pub lyrics: Option<String>,
    /// Replay-gain values in dB, when tagged
    pub track_gain_db: Option<f32>,
    pub album_gain_db: Option<f32>,
}

/// Events emitted by the playback engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Engine state changed
    StateChanged {
        old_state: EngineState,
        new_state: EngineState,
        timestamp: DateTime<Utc>,
    },

    /// Current track is within the preload window of its end.
    ///
    /// Emitted once per track; the player answers with StartPreloading.
    TrackAboutToEnd { timestamp: DateTime<Utc> },

    /// Current track reached its end
    TrackEnded {
        /// True when a preloaded track was swapped in
        has_next: bool,
        timestamp: DateTime<Utc>,
    },

    /// A fade-to-stop or fade-to-pause reached silence
    FadeoutFinished { timestamp: DateTime<Utc> },

    /// A pipeline failed
    Error {
        pipeline_id: PipelineId,
        message: String,
        domain: ErrorDomain,
        code: i32,
        user_visible: bool,
        timestamp: DateTime<Utc>,
    },

    /// Metadata changed on a live pipeline
    MetadataChanged {
        pipeline_id: PipelineId,
        bundle: MetaBundle,
        timestamp: DateTime<Utc>,
    },

    /// Current pipeline started buffering
    BufferingStarted { timestamp: DateTime<Utc> },

    /// Buffering progress for the current pipeline (0-100)
    BufferingProgress { percent: u8, timestamp: DateTime<Utc> },

    /// Buffering episode finished
    BufferingFinished { timestamp: DateTime<Utc> },

    /// Playback of this url started successfully
    ValidSongRequested { url: String, timestamp: DateTime<Utc> },

    /// This url could not be played
    InvalidSongRequested { url: String, timestamp: DateTime<Utc> },
}

impl EngineEvent {
    /// Event type name, used as the SSE event field
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::StateChanged { .. } => "StateChanged",
            EngineEvent::TrackAboutToEnd { .. } => "TrackAboutToEnd",
            EngineEvent::TrackEnded { .. } => "TrackEnded",
            EngineEvent::FadeoutFinished { .. } => "FadeoutFinished",
            EngineEvent::Error { .. } => "Error",
            EngineEvent::MetadataChanged { .. } => "MetadataChanged",
            EngineEvent::BufferingStarted { .. } => "BufferingStarted",
            EngineEvent::BufferingProgress { .. } => "BufferingProgress",
            EngineEvent::BufferingFinished { .. } => "BufferingFinished",
            EngineEvent::ValidSongRequested { .. } => "ValidSongRequested",
            EngineEvent::InvalidSongRequested { .. } => "InvalidSongRequested",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_resource_errors_are_silent() {
        assert!(!ErrorDomain::Resource.is_user_visible(resource_codes::NOT_FOUND));
        assert!(!ErrorDomain::Resource.is_user_visible(resource_codes::OPEN_READ));
        assert!(!ErrorDomain::Resource.is_user_visible(resource_codes::NOT_AUTHORIZED));
        assert!(ErrorDomain::Resource.is_user_visible(resource_codes::SEEK));
    }

    #[test]
    fn test_expected_stream_errors_are_silent() {
        assert!(!ErrorDomain::Stream.is_user_visible(stream_codes::TYPE_NOT_FOUND));
        assert!(!ErrorDomain::Stream.is_user_visible(stream_codes::FAILED));
        assert!(ErrorDomain::Stream.is_user_visible(stream_codes::DECODE));
        assert!(ErrorDomain::Core.is_user_visible(core_codes::FAILED));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::TrackEnded {
            has_next: true,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TrackEnded");
        assert_eq!(json["has_next"], true);
        assert_eq!(event.event_type(), "TrackEnded");
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let event = EngineEvent::StateChanged {
            old_state: EngineState::Idle,
            new_state: EngineState::Playing,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["old_state"], "idle");
        assert_eq!(json["new_state"], "playing");
    }

    #[test]
    fn test_pipeline_id_is_transparent() {
        let json = serde_json::to_value(PipelineId(7)).unwrap();
        assert_eq!(json, serde_json::json!(7));
        assert_eq!(PipelineId(7).to_string(), "pipeline#7");
    }
}
