//! Engine state and pipeline slots
//!
//! **Responsibilities:**
//! - Own the pipeline slots (current, fade-to-stop, fade-to-pause, preload)
//! - Derive the engine state from them
//! - Build pipelines through the backend (Load, StartPreloading)
//! - Tear pipelines down so that no slot keeps a dead reference

use super::consumers::BufferConsumers;
use super::fade::{FadeSlot, VolumeRamp};
use super::{log_volume, TrackChangeFlags};
use crate::broadcaster::EventBroadcaster;
use crate::config::SettingsSource;
use crate::error::{Error, Result};
use crate::pipeline::{
    Pipeline, PipelineBackend, PipelineEvent, PipelineEventSender, PipelineRequest, PipelineState,
    TrackBounds,
};
use crate::post_processing::PostProcessing;
use crate::scope::ScopeBuffer;
use crate::source::{fixup_url, FixedUrl};
use chrono::Utc;
use segue_common::config::EngineSettings;
use segue_common::events::{EngineEvent, EngineState, PipelineId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// The next track, constructed but not playing
pub(super) struct PreloadSlot {
    pub(super) url: String,
    pub(super) bounds: TrackBounds,
    pub(super) pipeline: Arc<dyn Pipeline>,
}

/// Snapshot of engine state for status queries
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub url: Option<String>,
    pub pipeline_id: Option<PipelineId>,
    pub position_nanosec: u64,
    pub length_nanosec: u64,
    pub volume: u8,
    pub buffering: bool,
    pub preloaded_url: Option<String>,
    pub fading_out: bool,
    pub fading_to_pause: bool,
    pub live_pipelines: usize,
}

/// Gapless/crossfading playback engine
///
/// Synchronous state machine owned by the runtime task. Timers are recorded
/// as deadlines (see `next_deadline`) and fired by the owner.
pub struct PlaybackEngine {
    /// Pipeline factory
    pub(super) backend: Arc<dyn PipelineBackend>,

    /// Settings file (or stand-in), re-read on reload
    pub(super) settings_source: Arc<dyn SettingsSource>,

    /// Settings in effect
    pub(super) settings: EngineSettings,

    /// Engine events out
    pub(super) events: EventBroadcaster,

    /// Handed (tagged) to every pipeline for its events
    pub(super) pipeline_tx: mpsc::UnboundedSender<PipelineEvent>,

    /// Next pipeline id; ids are never reused
    pub(super) next_pipeline_id: u64,

    /// The pipeline being played
    pub(super) current: Option<Arc<dyn Pipeline>>,

    /// Ramp up on the current pipeline (crossfade, unpause, pause reversal)
    pub(super) fade_in: Option<VolumeRamp>,

    /// Outgoing pipeline fading to silence, then torn down
    pub(super) fading_to_stop: Option<FadeSlot>,

    /// Current pipeline fading to silence, then paused
    pub(super) fading_to_pause: Option<FadeSlot>,

    /// The last pause faded out, so Unpause fades back in
    pub(super) has_faded_out: bool,

    pub(super) preload: Option<PreloadSlot>,

    pub(super) post_processing: PostProcessing,

    /// User volume 0..=100 (before the logarithmic mapping)
    pub(super) volume: u8,

    /// Absolute seek target waiting for the debounce timer
    pub(super) pending_seek: Option<u64>,
    pub(super) seek_deadline: Option<Instant>,

    /// Next position poll, only while playing
    pub(super) position_deadline: Option<Instant>,

    /// Next fade ramp update, while any ramp is active
    pub(super) fade_deadline: Option<Instant>,

    /// TrackAboutToEnd already sent for the current track
    pub(super) about_to_end_emitted: bool,

    /// A buffering episode is being reported
    pub(super) buffering: bool,

    /// State last announced through StateChanged
    pub(super) reported_state: EngineState,

    pub(super) scope: ScopeBuffer,

    pub(super) consumers: BufferConsumers,
}

impl PlaybackEngine {
    pub fn new(
        backend: Arc<dyn PipelineBackend>,
        settings_source: Arc<dyn SettingsSource>,
        events: EventBroadcaster,
        pipeline_tx: mpsc::UnboundedSender<PipelineEvent>,
        scope_chunks: usize,
    ) -> Self {
        let settings = match settings_source.load() {
            Ok(settings) => {
                info!(source = %settings_source.describe(), "Engine settings loaded");
                settings
            }
            Err(e) => {
                warn!(source = %settings_source.describe(), error = %e, "Failed to load settings, using defaults");
                EngineSettings::default()
            }
        };
        let post_processing = PostProcessing::from_settings(&settings);
        let volume = settings.volume_percent.min(100);

        Self {
            backend,
            settings_source,
            settings,
            events,
            pipeline_tx,
            next_pipeline_id: 1,
            current: None,
            fade_in: None,
            fading_to_stop: None,
            fading_to_pause: None,
            has_faded_out: false,
            preload: None,
            post_processing,
            volume,
            pending_seek: None,
            seek_deadline: None,
            position_deadline: None,
            fade_deadline: None,
            about_to_end_emitted: false,
            buffering: false,
            reported_state: EngineState::Empty,
            scope: ScopeBuffer::new(scope_chunks),
            consumers: BufferConsumers::new(),
        }
    }

    /// Engine state derived from the pipeline slots
    pub fn state(&self) -> EngineState {
        match &self.current {
            Some(current) => match current.state() {
                PipelineState::Playing => EngineState::Playing,
                PipelineState::Paused => EngineState::Paused,
                PipelineState::Ready | PipelineState::Null => EngineState::Idle,
            },
            None if self.preload.is_none() => EngineState::Empty,
            None => EngineState::Idle,
        }
    }

    /// Position within the track bounds
    pub fn position_nanosec(&self) -> u64 {
        match &self.current {
            Some(current) => current
                .position_nanosec()
                .saturating_sub(current.bounds().begin_nanosec),
            None => 0,
        }
    }

    /// Length of the track bounds, or the stream length when unbounded
    pub fn length_nanosec(&self) -> u64 {
        match &self.current {
            Some(current) => {
                let bounds = current.bounds();
                if bounds.has_end() {
                    bounds.end_nanosec - bounds.begin_nanosec
                } else {
                    current.length_nanosec()
                }
            }
            None => 0,
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn post_processing(&self) -> &PostProcessing {
        &self.post_processing
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn current_pipeline_id(&self) -> Option<PipelineId> {
        self.current.as_ref().map(|p| p.id())
    }

    pub fn preloaded_pipeline_id(&self) -> Option<PipelineId> {
        self.preload.as_ref().map(|p| p.pipeline.id())
    }

    pub fn fading_pipeline_id(&self) -> Option<PipelineId> {
        self.fading_to_stop.as_ref().map(|slot| slot.pipeline.id())
    }

    pub fn is_fading_to_pause(&self) -> bool {
        self.fading_to_pause.is_some()
    }

    /// Up to `chunk_length` of the most recent decoded samples
    pub fn scope(&self, chunk_length: usize) -> Vec<f32> {
        self.scope.scope(chunk_length)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state(),
            url: self.current.as_ref().map(|p| p.url().to_string()),
            pipeline_id: self.current_pipeline_id(),
            position_nanosec: self.position_nanosec(),
            length_nanosec: self.length_nanosec(),
            volume: self.volume,
            buffering: self.buffering,
            preloaded_url: self.preload.as_ref().map(|p| p.url.clone()),
            fading_out: self.fading_to_stop.is_some(),
            fading_to_pause: self.fading_to_pause.is_some(),
            live_pipelines: self.live_pipelines().len(),
        }
    }

    /// Every distinct live pipeline, current first
    pub(super) fn live_pipelines(&self) -> Vec<Arc<dyn Pipeline>> {
        let candidates = self
            .current
            .iter()
            .chain(self.fading_to_stop.iter().map(|s| &s.pipeline))
            .chain(self.fading_to_pause.iter().map(|s| &s.pipeline))
            .chain(self.preload.iter().map(|p| &p.pipeline));

        let mut live: Vec<Arc<dyn Pipeline>> = Vec::new();
        for pipeline in candidates {
            if !live.iter().any(|p| p.id() == pipeline.id()) {
                live.push(Arc::clone(pipeline));
            }
        }
        live
    }

    /// Find a live pipeline by id
    pub(super) fn live_pipeline(&self, id: PipelineId) -> Option<Arc<dyn Pipeline>> {
        self.live_pipelines().into_iter().find(|p| p.id() == id)
    }

    pub(super) fn broadcast(&self, event: EngineEvent) {
        self.events.broadcast_event(event);
    }

    /// Announce a state change
    pub(super) fn emit_state(&mut self, new_state: EngineState) {
        let old_state = self.reported_state;
        self.reported_state = new_state;
        info!(%old_state, %new_state, "Engine state changed");
        self.broadcast(EngineEvent::StateChanged {
            old_state,
            new_state,
            timestamp: Utc::now(),
        });
    }

    /// Remove a pipeline from every slot, then tear it down
    pub(super) fn teardown_pipeline(&mut self, pipeline: Arc<dyn Pipeline>) {
        let id = pipeline.id();
        if self.current.as_ref().is_some_and(|p| p.id() == id) {
            self.current = None;
            self.fade_in = None;
        }
        if self.fading_to_stop.as_ref().is_some_and(|s| s.pipeline.id() == id) {
            self.fading_to_stop = None;
        }
        if self.fading_to_pause.as_ref().is_some_and(|s| s.pipeline.id() == id) {
            self.fading_to_pause = None;
        }
        if self.preload.as_ref().is_some_and(|p| p.pipeline.id() == id) {
            self.preload = None;
        }
        debug!(pipeline_id = %id, url = %pipeline.url(), "Tearing down pipeline");
        pipeline.teardown();
    }

    /// Make `pipeline` the current one: follow it in the scope, reset the
    /// per-track flags, push volume and post-processing into it.
    ///
    /// A debounced seek targets the track it was requested for and is
    /// dropped here.
    pub(super) fn install_current(&mut self, pipeline: Arc<dyn Pipeline>) {
        if self.pending_seek.take().is_some() {
            debug!("Dropping pending seek of the previous track");
        }
        self.seek_deadline = None;
        self.scope.set_pipeline(Some(pipeline.id()));
        self.about_to_end_emitted = false;
        self.has_faded_out = false;
        self.fade_in = None;
        pipeline.set_volume(log_volume(self.volume));
        pipeline.apply_post_processing(&self.post_processing);
        debug!(pipeline_id = %pipeline.id(), url = %pipeline.url(), "Pipeline is now current");
        self.current = Some(pipeline);
    }

    /// Build (not start) a pipeline. On failure an Error event is broadcast.
    pub(super) fn create_pipeline(
        &mut self,
        fixed: &FixedUrl,
        bounds: TrackBounds,
    ) -> Result<Arc<dyn Pipeline>> {
        let id = PipelineId(self.next_pipeline_id);
        self.next_pipeline_id += 1;

        let request = PipelineRequest {
            id,
            url: fixed.url.clone(),
            bounds,
            cdda_device: fixed.cdda_device.clone(),
            output: self.settings.output.clone(),
            buffer: self.settings.buffer.clone(),
        };
        let sender = PipelineEventSender::new(id, self.pipeline_tx.clone());

        match self.backend.create(request, sender, &self.post_processing) {
            Ok(pipeline) => {
                pipeline.set_volume(log_volume(self.volume));
                debug!(pipeline_id = %id, url = %fixed.url, "Pipeline created");
                Ok(pipeline)
            }
            Err(e) => {
                let (domain, code) = e.domain_and_code();
                warn!(pipeline_id = %id, url = %fixed.url, error = %e, "Pipeline construction failed");
                self.broadcast(EngineEvent::Error {
                    pipeline_id: id,
                    message: e.to_string(),
                    domain,
                    code,
                    user_visible: domain.is_user_visible(code),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Whether this Load should crossfade from the current pipeline
    fn should_crossfade(&self, change: TrackChangeFlags) -> bool {
        if self.current.is_none() {
            return false;
        }
        let fade = &self.settings.fade;
        let wanted = (fade.crossfade_enabled && change.contains(TrackChangeFlags::MANUAL))
            || (fade.autocrossfade_enabled && change.contains(TrackChangeFlags::AUTO))
            || (fade.crossfade_enabled && change.contains(TrackChangeFlags::INTRO));

        let same_album_auto = change.contains(TrackChangeFlags::AUTO | TrackChangeFlags::SAME_ALBUM);
        wanted && !(same_album_auto && !fade.crossfade_same_album)
    }

    /// Load a track, replacing (or crossfading from) the current one.
    ///
    /// The new pipeline is current but not started; Play starts it.
    pub fn load(
        &mut self,
        url: &str,
        change: TrackChangeFlags,
        force_stop_at_end: bool,
        begin_nanosec: u64,
        end_nanosec: u64,
    ) -> Result<()> {
        let fixed = fixup_url(url);
        let bounds = TrackBounds::new(force_stop_at_end, begin_nanosec, end_nanosec);
        let crossfade = self.should_crossfade(change);
        info!(url = %fixed.url, change = change.bits(), crossfade, "Load");

        if !crossfade && change.contains(TrackChangeFlags::AUTO) {
            if let Some(current) = &self.current {
                if current.url() == fixed.url {
                    debug!(url = %fixed.url, "Track already current after gapless advance");
                    return Ok(());
                }
            }
        }

        let pipeline = match self.take_matching_preload(&fixed.url, bounds) {
            Some(pipeline) => pipeline,
            None => match self.create_pipeline(&fixed, bounds) {
                Ok(pipeline) => {
                    self.discard_stale_preload(&fixed.url);
                    pipeline
                }
                Err(e) => {
                    self.broadcast(EngineEvent::InvalidSongRequested {
                        url: fixed.url.clone(),
                        timestamp: Utc::now(),
                    });
                    return Err(e);
                }
            },
        };

        // Any pause fade belongs to the outgoing pipeline
        self.fading_to_pause = None;
        if let Some(old) = self.current.take() {
            self.fade_in = None;
            if crossfade {
                self.start_fadeout(old);
            } else {
                self.teardown_pipeline(old);
            }
        }
        self.finish_buffering();

        self.install_current(pipeline.clone());
        if crossfade {
            pipeline.set_volume_modifier(0.0);
            let duration = std::time::Duration::from_nanos(self.settings.fade.fadeout_duration_nanos());
            self.start_fade_in(&pipeline, segue_common::FadeCurve::Linear, duration);
        } else {
            pipeline.set_volume_modifier(1.0);
        }
        Ok(())
    }

    fn take_matching_preload(&mut self, url: &str, bounds: TrackBounds) -> Option<Arc<dyn Pipeline>> {
        match &self.preload {
            Some(slot) if slot.url == url && slot.bounds == bounds => {
                debug!(pipeline_id = %slot.pipeline.id(), url, "Adopting preloaded pipeline");
                self.preload.take().map(|slot| slot.pipeline)
            }
            _ => None,
        }
    }

    fn discard_stale_preload(&mut self, requested: &str) {
        if let Some(slot) = self.preload.take() {
            let mismatch = Error::PreloadMismatch {
                preloaded: slot.url.clone(),
                requested: requested.to_string(),
            };
            debug!(reason = %mismatch, "Discarding preloaded pipeline");
            self.teardown_pipeline(slot.pipeline);
        }
    }

    /// Construct the next track ahead of time so end-of-stream can switch
    /// to it without a gap
    pub fn start_preloading(
        &mut self,
        url: &str,
        force_stop_at_end: bool,
        begin_nanosec: u64,
        end_nanosec: u64,
    ) -> Result<()> {
        let fixed = fixup_url(url);
        let bounds = TrackBounds::new(force_stop_at_end, begin_nanosec, end_nanosec);

        if let Some(slot) = &self.preload {
            if slot.url == fixed.url && slot.bounds == bounds {
                debug!(url = %fixed.url, "Already preloaded");
                return Ok(());
            }
        }
        if let Some(old) = self.preload.take() {
            self.teardown_pipeline(old.pipeline);
        }

        info!(url = %fixed.url, "Preloading next track");
        let pipeline = self.create_pipeline(&fixed, bounds)?;
        self.preload = Some(PreloadSlot {
            url: fixed.url,
            bounds,
            pipeline,
        });
        Ok(())
    }

    /// Tear every pipeline down and forget all timers
    pub fn shutdown(&mut self) {
        info!("Shutting down playback engine");
        self.pending_seek = None;
        self.seek_deadline = None;
        self.position_deadline = None;
        self.fade_deadline = None;
        for pipeline in self.live_pipelines() {
            self.teardown_pipeline(pipeline);
        }
        self.scope.set_pipeline(None);
    }
}
