//! In-memory pipeline backend
//!
//! Deterministic stand-in for real decode/output. Pipelines never produce
//! audio or advance on their own: callers move the position, toggle
//! buffering and inject events explicitly. Every primitive the engine calls
//! is recorded so behaviour can be asserted afterwards.

use super::{
    OutputDetails, Pipeline, PipelineBackend, PipelineEventKind, PipelineEventSender,
    PipelineRequest, PipelineState, TrackBounds,
};
use crate::audio::types::AudioChunk;
use crate::error::{Error, Result};
use crate::post_processing::PostProcessing;
use segue_common::events::{core_codes, resource_codes, ErrorDomain, PipelineId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Length reported by fake pipelines unless configured otherwise (3 minutes)
pub const DEFAULT_FAKE_LENGTH_NANOSEC: u64 = 180_000_000_000;

#[derive(Default)]
struct BackendConfig {
    failing_urls: HashSet<String>,
    failing_play_urls: HashSet<String>,
    buffering_urls: HashSet<String>,
    length_nanosec: Option<u64>,
}

/// Backend producing [`FakePipeline`]s
#[derive(Default)]
pub struct FakeBackend {
    config: Mutex<BackendConfig>,
    created: Mutex<Vec<Arc<FakePipeline>>>,
    initialise_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construction for `url` fails with a not-found error
    pub fn fail_construction(&self, url: &str) {
        self.config.lock().unwrap().failing_urls.insert(url.to_string());
    }

    /// Pipelines for `url` refuse to start playing
    pub fn fail_play(&self, url: &str) {
        self.config.lock().unwrap().failing_play_urls.insert(url.to_string());
    }

    /// Pipelines for `url` start out buffering
    pub fn buffer_on_start(&self, url: &str) {
        self.config.lock().unwrap().buffering_urls.insert(url.to_string());
    }

    /// Length reported by pipelines created from now on
    pub fn set_length(&self, nanosec: u64) {
        self.config.lock().unwrap().length_nanosec = Some(nanosec);
    }

    /// Every pipeline created so far, oldest first
    pub fn pipelines(&self) -> Vec<Arc<FakePipeline>> {
        self.created.lock().unwrap().clone()
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<Arc<FakePipeline>> {
        self.created.lock().unwrap().iter().find(|p| p.id == id).cloned()
    }

    /// Most recently created pipeline
    pub fn last(&self) -> Option<Arc<FakePipeline>> {
        self.created.lock().unwrap().last().cloned()
    }

    /// Pipelines created for `url`, oldest first
    pub fn for_url(&self, url: &str) -> Vec<Arc<FakePipeline>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.url == url)
            .cloned()
            .collect()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn initialise_calls(&self) -> usize {
        self.initialise_calls.load(Ordering::SeqCst)
    }
}

impl PipelineBackend for FakeBackend {
    fn initialise(&self) -> Result<()> {
        self.initialise_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create(
        &self,
        request: PipelineRequest,
        events: PipelineEventSender,
        params: &PostProcessing,
    ) -> Result<Arc<dyn Pipeline>> {
        let (fails, fail_play, buffering, length) = {
            let config = self.config.lock().unwrap();
            (
                config.failing_urls.contains(&request.url),
                config.failing_play_urls.contains(&request.url),
                config.buffering_urls.contains(&request.url),
                config.length_nanosec.unwrap_or(DEFAULT_FAKE_LENGTH_NANOSEC),
            )
        };

        if fails {
            return Err(Error::Construction {
                url: request.url,
                reason: "no such resource".to_string(),
                domain: ErrorDomain::Resource,
                code: resource_codes::NOT_FOUND,
            });
        }

        debug!(pipeline_id = %request.id, url = %request.url, "Creating fake pipeline");
        let pipeline = Arc::new(FakePipeline {
            id: request.id,
            url: request.url,
            bounds: request.bounds,
            events,
            fail_play,
            inner: Mutex::new(FakeState {
                state: PipelineState::Ready,
                position_nanosec: request.bounds.begin_nanosec,
                length_nanosec: length,
                volume: 100,
                volume_modifier: 1.0,
                post_processing: params.clone(),
                post_processing_applied: 0,
                seeks: Vec::new(),
                modifier_history: Vec::new(),
                buffering,
                torn_down: false,
            }),
        });
        self.created.lock().unwrap().push(pipeline.clone());
        Ok(pipeline)
    }

    fn outputs(&self) -> Vec<OutputDetails> {
        vec![OutputDetails {
            name: "fake".to_string(),
            description: "In-memory output".to_string(),
            icon_name: "audio-card".to_string(),
        }]
    }
}

struct FakeState {
    state: PipelineState,
    position_nanosec: u64,
    length_nanosec: u64,
    volume: u8,
    volume_modifier: f64,
    post_processing: PostProcessing,
    post_processing_applied: usize,
    seeks: Vec<u64>,
    modifier_history: Vec<f64>,
    buffering: bool,
    torn_down: bool,
}

/// Pipeline that records what the engine asks of it
pub struct FakePipeline {
    id: PipelineId,
    url: String,
    bounds: TrackBounds,
    events: PipelineEventSender,
    fail_play: bool,
    inner: Mutex<FakeState>,
}

impl FakePipeline {
    /// Absolute seek targets in call order
    pub fn seeks(&self) -> Vec<u64> {
        self.inner.lock().unwrap().seeks.clone()
    }

    /// Parameters from the most recent `apply_post_processing` (or
    /// construction)
    pub fn post_processing(&self) -> PostProcessing {
        self.inner.lock().unwrap().post_processing.clone()
    }

    /// Number of `apply_post_processing` calls after construction
    pub fn post_processing_applied(&self) -> usize {
        self.inner.lock().unwrap().post_processing_applied
    }

    /// Every volume modifier the engine has set, in order
    pub fn modifier_history(&self) -> Vec<f64> {
        self.inner.lock().unwrap().modifier_history.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.lock().unwrap().torn_down
    }

    pub fn set_position(&self, nanosec: u64) {
        self.inner.lock().unwrap().position_nanosec = nanosec;
    }

    pub fn set_length(&self, nanosec: u64) {
        self.inner.lock().unwrap().length_nanosec = nanosec;
    }

    /// Toggle buffering and report the change the way a real pipeline does
    pub fn set_buffering(&self, buffering: bool) {
        self.inner.lock().unwrap().buffering = buffering;
        let kind = if buffering {
            PipelineEventKind::BufferingStarted
        } else {
            PipelineEventKind::BufferingFinished
        };
        self.events.emit(kind);
    }

    /// Inject an arbitrary event. Returns false after teardown.
    pub fn emit(&self, kind: PipelineEventKind) -> bool {
        self.events.emit(kind)
    }

    /// Inject a decoded chunk
    pub fn emit_samples(&self, samples: Vec<f32>) -> bool {
        let position = self.position_nanosec();
        let chunk = AudioChunk::new(samples, 44_100, 2, position);
        self.events.emit(PipelineEventKind::NewBuffer(Arc::new(chunk)))
    }

    pub fn emit_end_of_stream(&self) -> bool {
        self.events.emit(PipelineEventKind::EndOfStream)
    }

    pub fn emit_error(&self, domain: ErrorDomain, code: i32, message: &str) -> bool {
        self.events.emit(PipelineEventKind::Error {
            message: message.to_string(),
            domain,
            code,
        })
    }
}

impl Pipeline for FakePipeline {
    fn id(&self) -> PipelineId {
        self.id
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn bounds(&self) -> TrackBounds {
        self.bounds
    }

    fn state(&self) -> PipelineState {
        self.inner.lock().unwrap().state
    }

    fn set_state(&self, state: PipelineState) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.torn_down {
            return Err(Error::InvalidState(format!("{} is torn down", self.id)));
        }
        if state == PipelineState::Playing && self.fail_play {
            return Err(Error::Runtime {
                pipeline_id: self.id,
                domain: ErrorDomain::Core,
                code: core_codes::STATE_CHANGE,
                message: "state change refused".to_string(),
            });
        }
        inner.state = state;
        Ok(())
    }

    fn seek(&self, nanosec: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.torn_down {
            return Err(Error::InvalidState(format!("{} is torn down", self.id)));
        }
        inner.seeks.push(nanosec);
        inner.position_nanosec = nanosec;
        Ok(())
    }

    fn position_nanosec(&self) -> u64 {
        self.inner.lock().unwrap().position_nanosec
    }

    fn length_nanosec(&self) -> u64 {
        self.inner.lock().unwrap().length_nanosec
    }

    fn set_volume(&self, percent: u8) {
        self.inner.lock().unwrap().volume = percent.min(100);
    }

    fn volume(&self) -> u8 {
        self.inner.lock().unwrap().volume
    }

    fn set_volume_modifier(&self, modifier: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.volume_modifier = modifier.clamp(0.0, 1.0);
        let value = inner.volume_modifier;
        inner.modifier_history.push(value);
    }

    fn volume_modifier(&self) -> f64 {
        self.inner.lock().unwrap().volume_modifier
    }

    fn apply_post_processing(&self, params: &PostProcessing) {
        let mut inner = self.inner.lock().unwrap();
        inner.post_processing = params.clone();
        inner.post_processing_applied += 1;
    }

    fn is_buffering(&self) -> bool {
        self.inner.lock().unwrap().buffering
    }

    fn teardown(&self) {
        self.events.silence();
        let mut inner = self.inner.lock().unwrap();
        inner.torn_down = true;
        inner.state = PipelineState::Null;
        inner.buffering = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segue_common::config::{BufferSettings, OutputSettings};
    use tokio::sync::mpsc;

    fn request(id: u64, url: &str) -> PipelineRequest {
        PipelineRequest {
            id: PipelineId(id),
            url: url.to_string(),
            bounds: TrackBounds::default(),
            cdda_device: None,
            output: OutputSettings::default(),
            buffer: BufferSettings::default(),
        }
    }

    #[test]
    fn test_create_and_record() {
        let backend = FakeBackend::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let pipeline = backend
            .create(
                request(1, "file:///a.flac"),
                PipelineEventSender::new(PipelineId(1), tx),
                &PostProcessing::default(),
            )
            .unwrap();

        assert_eq!(pipeline.state(), PipelineState::Ready);
        pipeline.set_state(PipelineState::Playing).unwrap();
        pipeline.seek(5_000).unwrap();
        pipeline.set_volume_modifier(0.5);

        let fake = backend.last().unwrap();
        assert_eq!(fake.seeks(), vec![5_000]);
        assert_eq!(fake.position_nanosec(), 5_000);
        assert_eq!(fake.modifier_history(), vec![0.5]);
        assert_eq!(backend.created_count(), 1);
    }

    #[test]
    fn test_construction_failure() {
        let backend = FakeBackend::new();
        backend.fail_construction("file:///missing.flac");
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = backend.create(
            request(1, "file:///missing.flac"),
            PipelineEventSender::new(PipelineId(1), tx),
            &PostProcessing::default(),
        );
        assert!(matches!(result, Err(Error::Construction { .. })));
        assert_eq!(backend.created_count(), 0);
    }

    #[test]
    fn test_teardown_is_idempotent_and_silences() {
        let backend = FakeBackend::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline = backend
            .create(
                request(2, "file:///b.flac"),
                PipelineEventSender::new(PipelineId(2), tx),
                &PostProcessing::default(),
            )
            .unwrap();

        pipeline.teardown();
        pipeline.teardown();
        assert_eq!(pipeline.state(), PipelineState::Null);
        assert!(pipeline.set_state(PipelineState::Playing).is_err());

        let fake = backend.last().unwrap();
        assert!(fake.is_torn_down());
        assert!(!fake.emit_end_of_stream());
        assert!(rx.try_recv().is_err());
    }
}
