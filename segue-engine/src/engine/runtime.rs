//! Engine runtime
//!
//! One tokio task owns the [`PlaybackEngine`]. Commands (with oneshot
//! replies), pipeline events and timer deadlines are all handled on it, so
//! engine state is never touched from two places at once.
//!
//! Backend initialisation (device discovery) runs on a blocking worker at
//! spawn time; Load, Play and StartPreloading wait for it to finish.

use super::consumers::BufferConsumer;
use super::core::{EngineStatus, PlaybackEngine};
use super::TrackChangeFlags;
use crate::broadcaster::EventBroadcaster;
use crate::config::SettingsSource;
use crate::error::{Error, Result};
use crate::pipeline::{OutputDetails, PipelineBackend, PipelineEvent};
use crate::post_processing::EQ_BAND_COUNT;
use segue_common::events::{EngineEvent, EngineState};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Load {
        url: String,
        change: TrackChangeFlags,
        force_stop_at_end: bool,
        begin_nanosec: u64,
        end_nanosec: u64,
        reply: Reply<Result<()>>,
    },
    StartPreloading {
        url: String,
        force_stop_at_end: bool,
        begin_nanosec: u64,
        end_nanosec: u64,
        reply: Reply<Result<()>>,
    },
    Play {
        offset_nanosec: u64,
        reply: Reply<Result<()>>,
    },
    Pause(Reply<()>),
    Unpause(Reply<()>),
    Stop {
        stop_after: bool,
        reply: Reply<()>,
    },
    Seek {
        offset_nanosec: u64,
        reply: Reply<()>,
    },
    SetVolume {
        percent: u8,
        reply: Reply<()>,
    },
    SetEqualizerEnabled {
        enabled: bool,
        reply: Reply<()>,
    },
    SetEqualizerParameters {
        preamp: i32,
        gains: [i32; EQ_BAND_COUNT],
        reply: Reply<()>,
    },
    SetStereoBalance {
        balance: f32,
        reply: Reply<()>,
    },
    ReloadSettings(Reply<Result<()>>),
    AddBufferConsumer {
        consumer: Arc<dyn BufferConsumer>,
        reply: Reply<bool>,
    },
    RemoveBufferConsumer {
        consumer: Arc<dyn BufferConsumer>,
        reply: Reply<bool>,
    },
    Scope {
        chunk_length: usize,
        reply: Reply<Vec<f32>>,
    },
    Status(Reply<EngineStatus>),
    Shutdown(Reply<()>),
}

/// Cloneable async handle to the engine task
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: EventBroadcaster,
    backend: Arc<dyn PipelineBackend>,
    initialised: watch::Receiver<bool>,
}

impl EngineHandle {
    /// Start the engine task and backend initialisation. Must be called
    /// within a tokio runtime.
    pub fn spawn(
        backend: Arc<dyn PipelineBackend>,
        settings_source: Arc<dyn SettingsSource>,
        scope_chunks: usize,
    ) -> Self {
        let events = EventBroadcaster::default();
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (init_tx, init_rx) = watch::channel(false);

        let engine = PlaybackEngine::new(
            backend.clone(),
            settings_source,
            events.clone(),
            pipeline_tx,
            scope_chunks,
        );

        let init_backend = backend.clone();
        tokio::task::spawn_blocking(move || {
            match init_backend.initialise() {
                Ok(()) => debug!("Pipeline backend initialised"),
                Err(e) => error!(error = %e, "Pipeline backend initialisation failed"),
            }
            let _ = init_tx.send(true);
        });

        tokio::spawn(run(engine, command_rx, pipeline_rx));
        info!("Playback engine started");

        Self {
            commands: command_tx,
            events,
            backend,
            initialised: init_rx,
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::EngineGone)?;
        rx.await.map_err(|_| Error::EngineGone)
    }

    /// Wait until backend initialisation has finished (successfully or not)
    pub async fn ensure_initialised(&self) {
        let mut rx = self.initialised.clone();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn load(
        &self,
        url: &str,
        change: TrackChangeFlags,
        force_stop_at_end: bool,
        begin_nanosec: u64,
        end_nanosec: u64,
    ) -> Result<()> {
        self.ensure_initialised().await;
        let url = url.to_string();
        self.request(|reply| Command::Load {
            url,
            change,
            force_stop_at_end,
            begin_nanosec,
            end_nanosec,
            reply,
        })
        .await?
    }

    pub async fn start_preloading(
        &self,
        url: &str,
        force_stop_at_end: bool,
        begin_nanosec: u64,
        end_nanosec: u64,
    ) -> Result<()> {
        self.ensure_initialised().await;
        let url = url.to_string();
        self.request(|reply| Command::StartPreloading {
            url,
            force_stop_at_end,
            begin_nanosec,
            end_nanosec,
            reply,
        })
        .await?
    }

    pub async fn play(&self, offset_nanosec: u64) -> Result<()> {
        self.ensure_initialised().await;
        self.request(|reply| Command::Play {
            offset_nanosec,
            reply,
        })
        .await?
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await
    }

    pub async fn unpause(&self) -> Result<()> {
        self.request(Command::Unpause).await
    }

    pub async fn stop(&self, stop_after: bool) -> Result<()> {
        self.request(|reply| Command::Stop { stop_after, reply }).await
    }

    pub async fn seek(&self, offset_nanosec: u64) -> Result<()> {
        self.request(|reply| Command::Seek {
            offset_nanosec,
            reply,
        })
        .await
    }

    pub async fn set_volume(&self, percent: u8) -> Result<()> {
        self.request(|reply| Command::SetVolume { percent, reply }).await
    }

    pub async fn set_equalizer_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetEqualizerEnabled { enabled, reply })
            .await
    }

    pub async fn set_equalizer_parameters(
        &self,
        preamp: i32,
        gains: [i32; EQ_BAND_COUNT],
    ) -> Result<()> {
        self.request(|reply| Command::SetEqualizerParameters {
            preamp,
            gains,
            reply,
        })
        .await
    }

    pub async fn set_stereo_balance(&self, balance: f32) -> Result<()> {
        self.request(|reply| Command::SetStereoBalance { balance, reply })
            .await
    }

    pub async fn reload_settings(&self) -> Result<()> {
        self.request(Command::ReloadSettings).await?
    }

    pub async fn add_buffer_consumer(&self, consumer: Arc<dyn BufferConsumer>) -> Result<bool> {
        self.request(|reply| Command::AddBufferConsumer { consumer, reply })
            .await
    }

    pub async fn remove_buffer_consumer(&self, consumer: Arc<dyn BufferConsumer>) -> Result<bool> {
        self.request(|reply| Command::RemoveBufferConsumer { consumer, reply })
            .await
    }

    pub async fn scope(&self, chunk_length: usize) -> Result<Vec<f32>> {
        self.request(|reply| Command::Scope {
            chunk_length,
            reply,
        })
        .await
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        self.request(Command::Status).await
    }

    pub async fn state(&self) -> Result<EngineState> {
        Ok(self.status().await?.state)
    }

    pub async fn position_nanosec(&self) -> Result<u64> {
        Ok(self.status().await?.position_nanosec)
    }

    pub async fn length_nanosec(&self) -> Result<u64> {
        Ok(self.status().await?.length_nanosec)
    }

    /// Outputs reported by the backend. Enumeration may block, so it runs
    /// on a blocking worker.
    pub async fn outputs(&self) -> Result<Vec<OutputDetails>> {
        self.ensure_initialised().await;
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || backend.outputs())
            .await
            .map_err(|e| Error::AudioOutput(format!("output enumeration failed: {}", e)))
    }

    /// Tear down all pipelines and end the engine task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut engine: PlaybackEngine,
    mut commands: mpsc::Receiver<Command>,
    mut pipeline_events: mpsc::UnboundedReceiver<PipelineEvent>,
) {
    loop {
        let deadline = engine.next_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => {
                    if dispatch(&mut engine, command).is_break() {
                        break;
                    }
                }
                None => {
                    engine.shutdown();
                    break;
                }
            },
            Some(event) = pipeline_events.recv() => engine.handle_pipeline_event(event),
            _ = sleep_until_deadline(deadline) => engine.on_timers(Instant::now()),
        }
    }
    debug!("Engine task finished");
}

/// Run one command. `Break` once the engine has shut down.
fn dispatch(engine: &mut PlaybackEngine, command: Command) -> ControlFlow<()> {
    // Reply send errors mean the caller stopped waiting; nothing to do
    match command {
        Command::Load {
            url,
            change,
            force_stop_at_end,
            begin_nanosec,
            end_nanosec,
            reply,
        } => {
            let _ = reply.send(engine.load(&url, change, force_stop_at_end, begin_nanosec, end_nanosec));
        }
        Command::StartPreloading {
            url,
            force_stop_at_end,
            begin_nanosec,
            end_nanosec,
            reply,
        } => {
            let _ = reply.send(engine.start_preloading(&url, force_stop_at_end, begin_nanosec, end_nanosec));
        }
        Command::Play {
            offset_nanosec,
            reply,
        } => {
            let _ = reply.send(engine.play(offset_nanosec));
        }
        Command::Pause(reply) => {
            engine.pause();
            let _ = reply.send(());
        }
        Command::Unpause(reply) => {
            engine.unpause();
            let _ = reply.send(());
        }
        Command::Stop { stop_after, reply } => {
            engine.stop(stop_after);
            let _ = reply.send(());
        }
        Command::Seek {
            offset_nanosec,
            reply,
        } => {
            engine.seek(offset_nanosec);
            let _ = reply.send(());
        }
        Command::SetVolume { percent, reply } => {
            engine.set_volume(percent);
            let _ = reply.send(());
        }
        Command::SetEqualizerEnabled { enabled, reply } => {
            engine.set_equalizer_enabled(enabled);
            let _ = reply.send(());
        }
        Command::SetEqualizerParameters {
            preamp,
            gains,
            reply,
        } => {
            engine.set_equalizer_parameters(preamp, gains);
            let _ = reply.send(());
        }
        Command::SetStereoBalance { balance, reply } => {
            engine.set_stereo_balance(balance);
            let _ = reply.send(());
        }
        Command::ReloadSettings(reply) => {
            let _ = reply.send(engine.reload_settings());
        }
        Command::AddBufferConsumer { consumer, reply } => {
            let _ = reply.send(engine.add_buffer_consumer(consumer));
        }
        Command::RemoveBufferConsumer { consumer, reply } => {
            let _ = reply.send(engine.remove_buffer_consumer(&consumer));
        }
        Command::Scope {
            chunk_length,
            reply,
        } => {
            let _ = reply.send(engine.scope(chunk_length));
        }
        Command::Status(reply) => {
            let _ = reply.send(engine.status());
        }
        Command::Shutdown(reply) => {
            engine.shutdown();
            let _ = reply.send(());
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticSettings;
    use crate::pipeline::fake::FakeBackend;

    #[tokio::test]
    async fn test_dispatch_stops_the_loop_only_on_shutdown() {
        let (pipeline_tx, _pipeline_rx) = mpsc::unbounded_channel();
        let mut engine = PlaybackEngine::new(
            Arc::new(FakeBackend::new()),
            Arc::new(StaticSettings::default()),
            EventBroadcaster::new(16),
            pipeline_tx,
            4,
        );

        let (reply, rx) = oneshot::channel();
        let flow = dispatch(
            &mut engine,
            Command::Load {
                url: "file:///music/a.flac".to_string(),
                change: TrackChangeFlags::MANUAL,
                force_stop_at_end: false,
                begin_nanosec: 0,
                end_nanosec: 0,
                reply,
            },
        );
        assert!(flow.is_continue());
        rx.await.unwrap().unwrap();
        assert_eq!(engine.state(), EngineState::Idle);

        let (reply, rx) = oneshot::channel();
        assert!(dispatch(&mut engine, Command::Pause(reply)).is_continue());
        rx.await.unwrap();

        let (reply, rx) = oneshot::channel();
        assert!(dispatch(&mut engine, Command::Shutdown(reply)).is_break());
        rx.await.unwrap();
        assert_eq!(engine.state(), EngineState::Empty);
        assert_eq!(engine.current_pipeline_id(), None);
    }
}
