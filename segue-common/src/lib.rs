//! # Segue Common Library
//!
//! Shared code for the segue playback engine and its clients:
//! - Engine event types (EngineEvent enum) and engine states
//! - Settings model and settings file resolution
//! - Fade curve definitions and calculations
//! - Nanosecond time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod time;

pub use error::{Error, Result};
pub use events::{EngineEvent, EngineState, PipelineId};
pub use fade_curves::FadeCurve;
