//! EngineHandle: commands and pipeline events through the engine task

use segue_common::config::EngineSettings;
use segue_common::events::{EngineEvent, EngineState};
use segue_engine::audio::AudioChunk;
use segue_engine::config::StaticSettings;
use segue_engine::engine::BufferConsumer;
use segue_engine::pipeline::fake::FakeBackend;
use segue_engine::pipeline::Pipeline;
use segue_engine::{EngineHandle, Error, TrackChangeFlags};
use segue_common::events::PipelineId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

const A: &str = "file:///music/a.flac";
const B: &str = "file:///music/b.flac";

fn start() -> (EngineHandle, Arc<FakeBackend>) {
    let backend = Arc::new(FakeBackend::new());
    let mut settings = EngineSettings::default();
    settings.fade.fadeout_enabled = false;
    settings.fade.crossfade_enabled = false;
    let engine = EngineHandle::spawn(
        backend.clone(),
        Arc::new(StaticSettings::new(settings)),
        8,
    );
    (engine, backend)
}

async fn wait_for(rx: &mut broadcast::Receiver<EngineEvent>, event_type: &str) -> EngineEvent {
    timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if event.event_type() == event_type {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", event_type))
}

#[tokio::test]
async fn test_load_and_play_through_handle() {
    let (engine, backend) = start();
    let mut events = engine.subscribe();

    engine.load(A, TrackChangeFlags::MANUAL, false, 0, 0).await.unwrap();
    assert_eq!(engine.state().await.unwrap(), EngineState::Idle);
    assert_eq!(backend.initialise_calls(), 1);

    engine.play(0).await.unwrap();
    match wait_for(&mut events, "StateChanged").await {
        EngineEvent::StateChanged { new_state, .. } => assert_eq!(new_state, EngineState::Playing),
        other => panic!("unexpected event {:?}", other),
    }

    let status = engine.status().await.unwrap();
    assert_eq!(status.state, EngineState::Playing);
    assert_eq!(status.url.as_deref(), Some(A));
    assert_eq!(status.live_pipelines, 1);
}

#[tokio::test]
async fn test_errors_are_returned_to_caller() {
    let (engine, backend) = start();
    backend.fail_construction(A);

    let result = engine.load(A, TrackChangeFlags::MANUAL, false, 0, 0).await;
    assert!(matches!(result, Err(Error::Construction { .. })));
    assert!(matches!(engine.play(0).await, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_pipeline_events_reach_the_engine() {
    let (engine, backend) = start();
    let mut events = engine.subscribe();

    engine.load(A, TrackChangeFlags::MANUAL, false, 0, 0).await.unwrap();
    engine.play(0).await.unwrap();
    engine.start_preloading(B, false, 0, 0).await.unwrap();

    backend.for_url(A)[0].emit_end_of_stream();
    match wait_for(&mut events, "TrackEnded").await {
        EngineEvent::TrackEnded { has_next, .. } => assert!(has_next),
        other => panic!("unexpected event {:?}", other),
    }

    let status = engine.status().await.unwrap();
    assert_eq!(status.url.as_deref(), Some(B));
    assert_eq!(status.state, EngineState::Playing);
}

#[tokio::test]
async fn test_seek_debounce_through_handle() {
    let (engine, backend) = start();
    engine.load(A, TrackChangeFlags::MANUAL, false, 0, 0).await.unwrap();
    engine.play(0).await.unwrap();

    for offset in [1_000_000_000, 2_000_000_000, 4_000_000_000] {
        engine.seek(offset).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(backend.last().unwrap().seeks(), vec![4_000_000_000]);
    assert_eq!(engine.position_nanosec().await.unwrap(), 4_000_000_000);
}

#[tokio::test]
async fn test_volume_and_outputs() {
    let (engine, backend) = start();
    engine.load(A, TrackChangeFlags::MANUAL, false, 0, 0).await.unwrap();

    engine.set_volume(90).await.unwrap();
    assert_eq!(engine.status().await.unwrap().volume, 90);
    assert_eq!(backend.last().unwrap().volume(), 72);

    let outputs = engine.outputs().await.unwrap();
    assert_eq!(outputs[0].name, "fake");
}

#[tokio::test]
async fn test_buffer_consumer_registration() {
    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl BufferConsumer for Counter {
        fn consume_buffer(&self, _chunk: Arc<AudioChunk>, _pipeline_id: PipelineId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let (engine, backend) = start();
    let counter = Arc::new(Counter::default());
    let consumer: Arc<dyn BufferConsumer> = counter.clone();

    assert!(engine.add_buffer_consumer(consumer.clone()).await.unwrap());
    assert!(!engine.add_buffer_consumer(consumer.clone()).await.unwrap());

    engine.load(A, TrackChangeFlags::MANUAL, false, 0, 0).await.unwrap();
    engine.play(0).await.unwrap();
    backend.last().unwrap().emit_samples(vec![0.5; 4]);

    timeout(Duration::from_secs(2), async {
        while counter.0.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("buffer never delivered");
    assert_eq!(engine.scope(4).await.unwrap(), vec![0.5; 4]);

    assert!(engine.remove_buffer_consumer(consumer.clone()).await.unwrap());
    assert!(!engine.remove_buffer_consumer(consumer).await.unwrap());
}

#[tokio::test]
async fn test_shutdown_ends_the_engine() {
    let (engine, backend) = start();
    engine.load(A, TrackChangeFlags::MANUAL, false, 0, 0).await.unwrap();
    engine.play(0).await.unwrap();

    engine.shutdown().await.unwrap();
    assert!(backend.last().unwrap().is_torn_down());
    assert!(matches!(engine.status().await, Err(Error::EngineGone)));
}
