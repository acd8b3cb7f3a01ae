//! Crossfades, stop fades and pause fades

mod helpers;

use helpers::*;
use segue_common::config::EngineSettings;
use segue_common::events::{resource_codes, EngineEvent, EngineState, ErrorDomain};
use segue_engine::pipeline::{Pipeline, PipelineState};
use segue_engine::TrackChangeFlags;
use std::time::Duration;

fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 0.05
}

fn pause_fade_settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.fade.fadeout_pause_enabled = true;
    settings.fade.fadeout_pause_duration_ms = 250;
    settings
}

#[tokio::test(start_paused = true)]
async fn test_manual_change_crossfades() {
    let mut h = Harness::new(EngineSettings::default());
    h.load_and_play(A);
    let a = h.current();

    h.load(B);
    h.engine.play(0).unwrap();
    let b = h.current();

    let status = h.engine.status();
    assert!(status.fading_out);
    assert_eq!(status.live_pipelines, 2);
    assert_eq!(b.volume_modifier(), 0.0);

    h.run_for(Duration::from_millis(1000)).await;
    assert!(approx(a.volume_modifier(), 0.5), "outgoing at {}", a.volume_modifier());
    assert!(approx(b.volume_modifier(), 0.5), "incoming at {}", b.volume_modifier());
    assert!(!a.is_torn_down());

    h.run_for(Duration::from_millis(1100)).await;
    assert!(a.is_torn_down());
    assert_eq!(b.volume_modifier(), 1.0);
    assert_eq!(count(&h.take_events(), "FadeoutFinished"), 1);
    assert!(h.engine.is_position_timer_running());
}

#[tokio::test(start_paused = true)]
async fn test_second_crossfade_completes_the_first() {
    let mut h = Harness::new(EngineSettings::default());
    h.load_and_play(A);
    let a = h.current();
    h.load(B);
    h.engine.play(0).unwrap();
    h.run_for(Duration::from_millis(500)).await;
    h.take_events();

    h.load(C);
    h.engine.play(0).unwrap();
    assert!(a.is_torn_down());
    assert_eq!(h.engine.status().live_pipelines, 2);
    assert_eq!(count(&h.take_events(), "FadeoutFinished"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_same_album_auto_change_does_not_crossfade() {
    let mut settings = EngineSettings::default();
    settings.fade.autocrossfade_enabled = true;
    settings.fade.crossfade_same_album = false;
    let mut h = Harness::new(settings);
    h.load_and_play(A);
    let a = h.current();

    h.engine
        .load(B, TrackChangeFlags::AUTO | TrackChangeFlags::SAME_ALBUM, false, 0, 0)
        .unwrap();
    assert!(a.is_torn_down());
    assert!(!h.engine.status().fading_out);
    assert_eq!(h.current().volume_modifier(), 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_auto_change_crossfades_when_enabled() {
    let mut settings = EngineSettings::default();
    settings.fade.autocrossfade_enabled = true;
    let mut h = Harness::new(settings);
    h.load_and_play(A);

    h.engine.load(B, TrackChangeFlags::AUTO, false, 0, 0).unwrap();
    assert!(h.engine.status().fading_out);
}

#[tokio::test(start_paused = true)]
async fn test_stop_fades_out_then_tears_down() {
    let mut h = Harness::new(EngineSettings::default());
    h.load_and_play(A);
    let a = h.current();
    h.take_events();

    h.engine.stop(false);
    assert_eq!(h.engine.state(), EngineState::Empty);
    assert!(h.engine.status().fading_out);
    assert!(!a.is_torn_down());

    h.run_for(Duration::from_millis(2100)).await;
    assert!(a.is_torn_down());
    let events = h.take_events();
    assert_eq!(event_types(&events), vec!["StateChanged", "FadeoutFinished"]);
    assert!(h.engine.next_deadline().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_fading_pipeline_end_of_stream_finishes_fade() {
    let mut h = Harness::new(EngineSettings::default());
    h.load_and_play(A);
    let a = h.current();
    h.load(B);
    h.engine.play(0).unwrap();
    h.take_events();

    a.emit_end_of_stream();
    h.pump();
    assert!(a.is_torn_down());
    assert_eq!(event_types(&h.take_events()), vec!["FadeoutFinished"]);
    assert_eq!(h.current().url(), B);
}

#[tokio::test(start_paused = true)]
async fn test_fading_pipeline_error_finishes_fade() {
    let mut h = Harness::new(EngineSettings::default());
    h.load_and_play(A);
    let a = h.current();
    h.engine.stop(false);
    h.take_events();

    a.emit_error(ErrorDomain::Resource, resource_codes::READ, "disk went away");
    h.pump();

    assert!(a.is_torn_down());
    assert!(!h.engine.status().fading_out);
    assert_eq!(event_types(&h.take_events()), vec!["Error", "FadeoutFinished"]);
    assert_eq!(h.engine.state(), EngineState::Empty);
}

#[tokio::test(start_paused = true)]
async fn test_pause_fade_then_unpause_fades_in() {
    let mut h = Harness::new(pause_fade_settings());
    h.load_and_play(A);
    let a = h.current();
    h.take_events();

    h.engine.pause();
    assert!(h.engine.is_fading_to_pause());
    assert_eq!(h.engine.state(), EngineState::Playing);

    h.run_for(Duration::from_millis(300)).await;
    assert_eq!(a.state(), PipelineState::Paused);
    assert_eq!(h.engine.state(), EngineState::Paused);
    assert_eq!(a.volume_modifier(), 0.0);
    let events = h.take_events();
    assert_eq!(event_types(&events), vec!["StateChanged", "FadeoutFinished"]);

    h.engine.unpause();
    assert_eq!(h.engine.state(), EngineState::Playing);
    h.run_for(Duration::from_millis(300)).await;
    assert_eq!(a.volume_modifier(), 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_second_pause_reverses_pause_fade() {
    let mut h = Harness::new(pause_fade_settings());
    h.load_and_play(A);
    let a = h.current();
    h.take_events();

    h.engine.pause();
    h.run_for(Duration::from_millis(100)).await;
    let level = a.volume_modifier();
    assert!(level > 0.0 && level < 1.0, "mid-fade level {}", level);

    h.engine.pause();
    assert!(!h.engine.is_fading_to_pause());
    h.run_for(Duration::from_millis(300)).await;

    assert_eq!(a.volume_modifier(), 1.0);
    assert_eq!(a.state(), PipelineState::Playing);
    let events = h.take_events();
    assert!(events.iter().all(|e| !matches!(
        e,
        EngineEvent::StateChanged {
            new_state: EngineState::Paused,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_pause_fade_silences_crossfade_tail() {
    let mut settings = pause_fade_settings();
    settings.fade.fadeout_duration_ms = 2000;
    let mut h = Harness::new(settings);
    h.load_and_play(A);
    let a = h.current();
    h.load(B);
    h.engine.play(0).unwrap();

    h.engine.pause();
    h.run_for(Duration::from_millis(300)).await;
    assert!(a.is_torn_down());
    assert_eq!(h.current().state(), PipelineState::Paused);
    assert_eq!(h.engine.status().live_pipelines, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_pause_fade() {
    let mut h = Harness::new(pause_fade_settings());
    h.load_and_play(A);
    let a = h.current();

    h.engine.pause();
    h.engine.stop(false);
    assert!(!h.engine.is_fading_to_pause());
    assert_eq!(h.engine.state(), EngineState::Empty);

    h.run_for(Duration::from_millis(2100)).await;
    assert!(a.is_torn_down());
    assert_eq!(h.engine.status().live_pipelines, 0);
}

#[tokio::test(start_paused = true)]
async fn test_end_of_stream_during_pause_fade_keeps_the_pause() {
    let mut h = Harness::new(pause_fade_settings());
    h.load_and_play(A);
    h.engine.start_preloading(B, false, 0, 0).unwrap();
    let a = h.current();

    h.engine.pause();
    h.run_for(Duration::from_millis(100)).await;
    h.take_events();

    a.emit_end_of_stream();
    h.pump();

    let b = h.current();
    assert_eq!(b.url(), B);
    assert_eq!(b.state(), PipelineState::Paused);
    assert_eq!(h.engine.state(), EngineState::Paused);
    assert!(!h.engine.is_fading_to_pause());
    assert!(!h.engine.is_position_timer_running());
    let events = h.take_events();
    assert_eq!(
        event_types(&events),
        vec!["TrackEnded", "StateChanged", "FadeoutFinished"]
    );
    assert!(matches!(
        events[1],
        EngineEvent::StateChanged {
            new_state: EngineState::Paused,
            ..
        }
    ));

    h.run_for(Duration::from_secs(2)).await;
    assert_eq!(h.engine.state(), EngineState::Paused);

    h.engine.unpause();
    assert_eq!(b.state(), PipelineState::Playing);
    h.run_for(Duration::from_millis(300)).await;
    assert_eq!(b.volume_modifier(), 1.0);
}
