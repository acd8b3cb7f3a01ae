//! Audio processing for the native pipeline
//!
//! **Module Structure:**
//! - `types.rs`: [`AudioChunk`], the unit of decoded audio shared with consumers
//! - `decoder.rs`: symphonia packet-at-a-time decoding to stereo f32
//! - `resampler.rs`: rubato conversion to the output device rate
//! - `reader.rs`: decoder + track bounds + resampler as one chunk source
//! - `dsp.rs`: replay gain, mono, equalizer, balance
//! - `output.rs`: cpal device selection, streams, output enumeration

pub mod decoder;
pub mod dsp;
pub mod output;
pub mod reader;
pub mod resampler;
pub mod types;

pub use types::AudioChunk;
