//! Shared harness for engine tests
//!
//! Drives a [`PlaybackEngine`] directly on the test task: pipeline events
//! are pumped by hand and timers fire only when the paused tokio clock is
//! advanced, so every transition is deterministic.

#![allow(dead_code)]

use segue_common::config::EngineSettings;
use segue_common::events::EngineEvent;
use segue_engine::broadcaster::EventBroadcaster;
use segue_engine::config::StaticSettings;
use segue_engine::pipeline::fake::{FakeBackend, FakePipeline};
use segue_engine::pipeline::PipelineEvent;
use segue_engine::{PlaybackEngine, TrackChangeFlags};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

pub const A: &str = "file:///music/a.flac";
pub const B: &str = "file:///music/b.flac";
pub const C: &str = "file:///music/c.flac";

pub struct Harness {
    pub engine: PlaybackEngine,
    pub backend: Arc<FakeBackend>,
    pub settings: Arc<StaticSettings>,
    events: broadcast::Receiver<EngineEvent>,
    pipeline_rx: mpsc::UnboundedReceiver<PipelineEvent>,
}

impl Harness {
    pub fn new(settings: EngineSettings) -> Self {
        let backend = Arc::new(FakeBackend::new());
        let settings = Arc::new(StaticSettings::new(settings));
        let broadcaster = EventBroadcaster::new(1024);
        let events = broadcaster.subscribe();
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
        let engine = PlaybackEngine::new(
            backend.clone(),
            settings.clone(),
            broadcaster,
            pipeline_tx,
            8,
        );
        Self {
            engine,
            backend,
            settings,
            events,
            pipeline_rx,
        }
    }

    /// Defaults with every fade switched off
    pub fn without_fades() -> Self {
        Self::new(no_fades())
    }

    /// Deliver every queued pipeline event to the engine
    pub fn pump(&mut self) {
        while let Ok(event) = self.pipeline_rx.try_recv() {
            self.engine.handle_pipeline_event(event);
        }
    }

    /// Advance the paused clock by `total`, firing each engine deadline as
    /// it comes due
    pub async fn run_for(&mut self, total: Duration) {
        let end = Instant::now() + total;
        loop {
            self.pump();
            match self.engine.next_deadline() {
                Some(deadline) if deadline <= end => {
                    tokio::time::advance(deadline.saturating_duration_since(Instant::now())).await;
                    self.engine.on_timers(Instant::now());
                }
                _ => {
                    tokio::time::advance(end.saturating_duration_since(Instant::now())).await;
                    break;
                }
            }
        }
        self.pump();
    }

    /// Engine events broadcast since the last call
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn current(&self) -> Arc<FakePipeline> {
        let id = self.engine.current_pipeline_id().expect("no current pipeline");
        self.backend.pipeline(id).expect("current pipeline not created by backend")
    }

    pub fn load(&mut self, url: &str) {
        self.engine
            .load(url, TrackChangeFlags::MANUAL, false, 0, 0)
            .expect("load failed");
    }

    pub fn load_and_play(&mut self, url: &str) {
        self.load(url);
        self.engine.play(0).expect("play failed");
    }
}

pub fn no_fades() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.fade.fadeout_enabled = false;
    settings.fade.crossfade_enabled = false;
    settings.fade.autocrossfade_enabled = false;
    settings.fade.fadeout_pause_enabled = false;
    settings
}

pub fn event_types(events: &[EngineEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type()).collect()
}

pub fn count(events: &[EngineEvent], event_type: &str) -> usize {
    events.iter().filter(|e| e.event_type() == event_type).count()
}
