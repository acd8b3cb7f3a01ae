//! Pipeline abstraction
//!
//! A pipeline is one decode-to-output chain for a single audio source. The
//! engine treats it as a black box that can be constructed, started,
//! paused, sought and torn down, and that reports what happens to it as
//! [`PipelineEvent`]s on a channel.
//!
//! **Responsibilities:**
//! - [`Pipeline`]: per-source primitives (state, seek, volume, post-processing)
//! - [`PipelineBackend`]: builds pipelines and enumerates outputs
//! - [`PipelineEventSender`]: tags events with the pipeline id and stops
//!   delivering them once the pipeline is torn down
//!
//! Two backends exist: [`fake::FakeBackend`] (in-memory, deterministic) and
//! [`native::NativeBackend`] (symphonia decode, rubato resample, cpal output).

pub mod fake;
pub mod native;

use crate::audio::types::AudioChunk;
use crate::error::Result;
use crate::post_processing::PostProcessing;
use segue_common::config::{BufferSettings, OutputSettings};
use segue_common::events::{ErrorDomain, MetaBundle, PipelineId};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Playable window within a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TrackBounds {
    /// Stop at `end_nanosec` even if a gapless successor is available
    pub force_stop_at_end: bool,

    /// Start offset within the file
    pub begin_nanosec: u64,

    /// End offset within the file; 0 means "to the end of the file"
    pub end_nanosec: u64,
}

impl TrackBounds {
    pub fn new(force_stop_at_end: bool, begin_nanosec: u64, end_nanosec: u64) -> Self {
        Self {
            force_stop_at_end,
            begin_nanosec,
            end_nanosec,
        }
    }

    /// Whether an explicit end offset is set
    pub fn has_end(&self) -> bool {
        self.end_nanosec > self.begin_nanosec
    }
}

/// Lifecycle state of a single pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Constructed, not started
    Ready,
    Paused,
    Playing,
    /// Torn down
    Null,
}

/// Everything a backend needs to build one pipeline
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub id: PipelineId,

    /// Url after fixup
    pub url: String,

    pub bounds: TrackBounds,

    /// CD device split out of a `cdda://` url
    pub cdda_device: Option<String>,

    /// Output sink/device at construction time
    pub output: OutputSettings,

    /// Buffering at construction time
    pub buffer: BufferSettings,
}

/// Output sink reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputDetails {
    pub name: String,
    pub description: String,
    pub icon_name: String,
}

/// What happened to a pipeline
#[derive(Debug, Clone)]
pub enum PipelineEventKind {
    EndOfStream,
    Error {
        message: String,
        domain: ErrorDomain,
        code: i32,
    },
    MetadataChanged(MetaBundle),
    BufferingStarted,
    BufferingProgress(u8),
    BufferingFinished,
    NewBuffer(Arc<AudioChunk>),
}

/// Event tagged with the pipeline it came from
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub pipeline_id: PipelineId,
    pub kind: PipelineEventKind,
}

/// Per-pipeline event handle, cheap to clone into worker threads.
///
/// `silence` is called on teardown; anything emitted afterwards is dropped
/// here instead of reaching the engine.
#[derive(Debug, Clone)]
pub struct PipelineEventSender {
    pipeline_id: PipelineId,
    tx: mpsc::UnboundedSender<PipelineEvent>,
    silenced: Arc<AtomicBool>,
}

impl PipelineEventSender {
    pub fn new(pipeline_id: PipelineId, tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self {
            pipeline_id,
            tx,
            silenced: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pipeline_id(&self) -> PipelineId {
        self.pipeline_id
    }

    /// Deliver an event. Returns false once silenced or when the engine has
    /// gone away.
    pub fn emit(&self, kind: PipelineEventKind) -> bool {
        if self.silenced.load(Ordering::Acquire) {
            return false;
        }
        self.tx
            .send(PipelineEvent {
                pipeline_id: self.pipeline_id,
                kind,
            })
            .is_ok()
    }

    pub fn silence(&self) {
        self.silenced.store(true, Ordering::Release);
    }

    pub fn is_silenced(&self) -> bool {
        self.silenced.load(Ordering::Acquire)
    }
}

/// One decode-to-output chain.
///
/// All methods take `&self`; implementations use interior mutability so a
/// pipeline can be shared between engine slots as `Arc<dyn Pipeline>`.
pub trait Pipeline: Send + Sync {
    fn id(&self) -> PipelineId;

    fn url(&self) -> &str;

    fn bounds(&self) -> TrackBounds;

    fn state(&self) -> PipelineState;

    /// Move to `Playing` or `Paused`
    fn set_state(&self, state: PipelineState) -> Result<()>;

    /// Request a seek to an absolute stream position. Takes effect
    /// asynchronously.
    fn seek(&self, nanosec: u64) -> Result<()>;

    /// Absolute stream position
    fn position_nanosec(&self) -> u64;

    /// Stream length, 0 when unknown
    fn length_nanosec(&self) -> u64;

    /// Output volume 0..=100, already mapped by the engine
    fn set_volume(&self, percent: u8);

    fn volume(&self) -> u8;

    /// Fade multiplier 0.0..=1.0
    fn set_volume_modifier(&self, modifier: f64);

    fn volume_modifier(&self) -> f64;

    fn apply_post_processing(&self, params: &PostProcessing);

    fn is_buffering(&self) -> bool;

    /// Stop everything and stop delivering events. Idempotent.
    fn teardown(&self);
}

/// Factory for pipelines
pub trait PipelineBackend: Send + Sync {
    /// Device discovery. Blocking; run once on a worker thread.
    fn initialise(&self) -> Result<()>;

    /// Build (but do not start) a pipeline
    fn create(
        &self,
        request: PipelineRequest,
        events: PipelineEventSender,
        params: &PostProcessing,
    ) -> Result<Arc<dyn Pipeline>>;

    fn outputs(&self) -> Vec<OutputDetails>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_tags_and_silences() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = PipelineEventSender::new(PipelineId(4), tx);

        assert!(sender.emit(PipelineEventKind::BufferingStarted));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.pipeline_id, PipelineId(4));
        assert!(matches!(event.kind, PipelineEventKind::BufferingStarted));

        let clone = sender.clone();
        sender.silence();
        assert!(clone.is_silenced());
        assert!(!clone.emit(PipelineEventKind::EndOfStream));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sender_reports_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = PipelineEventSender::new(PipelineId(1), tx);
        drop(rx);
        assert!(!sender.emit(PipelineEventKind::EndOfStream));
    }

    #[test]
    fn test_bounds_has_end() {
        assert!(!TrackBounds::default().has_end());
        assert!(TrackBounds::new(false, 1_000, 5_000).has_end());
        assert!(!TrackBounds::new(false, 5_000, 5_000).has_end());
    }
}
