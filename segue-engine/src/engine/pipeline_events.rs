//! Pipeline event handling
//!
//! Events arrive tagged with a pipeline id. Ids that no longer belong to a
//! live pipeline are dropped without touching engine state.

use super::PlaybackEngine;
use crate::audio::types::AudioChunk;
use crate::pipeline::{PipelineEvent, PipelineEventKind, PipelineState};
use chrono::Utc;
use segue_common::events::{EngineEvent, ErrorDomain, PipelineId};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

impl PlaybackEngine {
    pub fn handle_pipeline_event(&mut self, event: PipelineEvent) {
        let id = event.pipeline_id;
        if self.live_pipeline(id).is_none() {
            trace!(pipeline_id = %id, "Dropping event from dead pipeline");
            return;
        }
        let is_current = self.current_pipeline_id() == Some(id);

        match event.kind {
            PipelineEventKind::EndOfStream => {
                if is_current {
                    self.end_of_stream();
                } else if self.fading_pipeline_id() == Some(id) {
                    debug!(pipeline_id = %id, "Fading pipeline ended before its fade");
                    self.finish_stop_fade();
                }
            }
            PipelineEventKind::Error {
                message,
                domain,
                code,
            } => self.pipeline_error(id, message, domain, code),
            PipelineEventKind::MetadataChanged(bundle) => {
                self.broadcast(EngineEvent::MetadataChanged {
                    pipeline_id: id,
                    bundle,
                    timestamp: Utc::now(),
                });
            }
            PipelineEventKind::BufferingStarted if is_current => self.start_buffering(),
            PipelineEventKind::BufferingProgress(percent) if is_current => {
                self.start_buffering();
                self.broadcast(EngineEvent::BufferingProgress {
                    percent: percent.min(100),
                    timestamp: Utc::now(),
                });
            }
            PipelineEventKind::BufferingFinished if is_current => self.finish_buffering(),
            PipelineEventKind::NewBuffer(chunk) if is_current => self.new_buffer(chunk, id),
            _ => {}
        }
    }

    fn new_buffer(&mut self, chunk: Arc<AudioChunk>, id: PipelineId) {
        self.consumers.deliver(&chunk, id);
        self.scope.push(chunk, id);
    }

    /// Current pipeline reached its end: switch to the preloaded track
    /// without a gap, or go empty.
    ///
    /// A pause fade in flight is honoured: the next track is swapped in
    /// paused.
    fn end_of_stream(&mut self) {
        let Some(current) = self.current.clone() else {
            return;
        };
        let next = if current.bounds().force_stop_at_end {
            None
        } else {
            self.preload.take()
        };
        let pausing = self.fading_to_pause.is_some();
        self.teardown_pipeline(current);

        if let Some(next) = next {
            let pipeline = next.pipeline;
            info!(pipeline_id = %pipeline.id(), url = %next.url, pausing, "Gapless switch to preloaded track");
            self.finish_buffering();
            self.install_current(pipeline.clone());
            pipeline.set_volume_modifier(1.0);

            let target = if pausing {
                PipelineState::Paused
            } else {
                PipelineState::Playing
            };
            match pipeline.set_state(target) {
                Ok(()) => {
                    self.broadcast(EngineEvent::TrackEnded {
                        has_next: true,
                        timestamp: Utc::now(),
                    });
                    if pausing {
                        self.settle_faded_pause();
                    } else {
                        self.start_position_timer();
                    }
                    return;
                }
                Err(e) => {
                    warn!(pipeline_id = %pipeline.id(), error = %e, "Preloaded pipeline failed to start");
                    self.teardown_pipeline(pipeline);
                    self.broadcast(EngineEvent::InvalidSongRequested {
                        url: next.url,
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        info!("End of stream, nothing queued");
        self.scope.set_pipeline(None);
        self.stop_position_timer();
        self.finish_buffering();
        self.broadcast(EngineEvent::TrackEnded {
            has_next: false,
            timestamp: Utc::now(),
        });
        let state = self.state();
        self.emit_state(state);
    }

    fn pipeline_error(&mut self, id: PipelineId, message: String, domain: ErrorDomain, code: i32) {
        let Some(pipeline) = self.live_pipeline(id) else {
            return;
        };
        let was_current = self.current_pipeline_id() == Some(id);
        let url = pipeline.url().to_string();
        let user_visible = domain.is_user_visible(code);

        let was_fading_out = self.fading_pipeline_id() == Some(id);

        error!(pipeline_id = %id, %domain, code, user_visible, %message, "Pipeline error");
        if !was_fading_out {
            self.teardown_pipeline(pipeline);
        }

        self.broadcast(EngineEvent::Error {
            pipeline_id: id,
            message,
            domain,
            code,
            user_visible,
            timestamp: Utc::now(),
        });

        // Whoever waits on the stop fade still sees it end
        if was_fading_out {
            self.finish_stop_fade();
            return;
        }

        if was_current {
            self.fading_to_pause = None;
            self.pending_seek = None;
            self.seek_deadline = None;
            self.scope.set_pipeline(None);
            self.stop_position_timer();
            self.finish_buffering();
            let state = self.state();
            self.emit_state(state);
            self.broadcast(EngineEvent::InvalidSongRequested {
                url,
                timestamp: Utc::now(),
            });
        }
    }

    /// Start reporting a buffering episode; repeated starts are absorbed
    pub(super) fn start_buffering(&mut self) {
        if self.buffering {
            return;
        }
        self.buffering = true;
        debug!("Buffering started");
        self.broadcast(EngineEvent::BufferingStarted { timestamp: Utc::now() });
    }

    /// End the buffering episode, if one is being reported
    pub(super) fn finish_buffering(&mut self) {
        if !self.buffering {
            return;
        }
        self.buffering = false;
        debug!("Buffering finished");
        self.broadcast(EngineEvent::BufferingFinished { timestamp: Utc::now() });
    }
}
