//! # Segue playback engine
//!
//! Gapless and crossfading audio playback built from per-track pipelines.
//!
//! **Architecture:** a [`PlaybackEngine`] state machine owned by one tokio
//! task ([`EngineHandle`]) drives up to four live pipelines (current,
//! fading-to-stop, fading-to-pause, preloaded). Pipelines come from a
//! [`pipeline::PipelineBackend`]: the native one decodes with symphonia,
//! resamples with rubato and plays through cpal; the fake one is used in
//! tests. An axum server exposes the engine over HTTP and SSE.

pub mod api;
pub mod audio;
pub mod broadcaster;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod post_processing;
pub mod scope;
pub mod source;

pub use engine::{EngineHandle, PlaybackEngine, TrackChangeFlags};
pub use error::{Error, Result};
