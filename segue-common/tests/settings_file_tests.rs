//! Settings file tests: complete files, written-back files, and broken files

use segue_common::config::{EngineSettings, ReplayGainMode};
use segue_common::Error;
use std::fs;

const FULL_SETTINGS: &str = r#"
mono_playback = false
volume_percent = 80

[output]
sink = "pulseaudio"
device = "Built-in Audio"

[fade]
fadeout_enabled = true
fadeout_duration_ms = 3000
crossfade_enabled = true
autocrossfade_enabled = true
crossfade_same_album = true
fadeout_pause_enabled = true
fadeout_pause_duration_ms = 400

[buffer]
duration_ms = 6000
min_fill_percent = 50

[replay_gain]
enabled = true
mode = "album"
preamp_db = -3.0
compression = false
"#;

#[test]
fn test_full_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    fs::write(&path, FULL_SETTINGS).unwrap();

    let settings = EngineSettings::load_or_default(Some(&path)).unwrap();
    assert_eq!(settings.volume_percent, 80);
    assert_eq!(settings.output.sink, "pulseaudio");
    assert_eq!(settings.output.device.as_deref(), Some("Built-in Audio"));
    assert!(settings.fade.autocrossfade_enabled);
    assert!(settings.fade.crossfade_same_album);
    assert_eq!(settings.fade.fadeout_pause_duration_nanos(), 400_000_000);
    assert_eq!(settings.buffer.duration_nanos(), 6_000_000_000);
    assert_eq!(settings.buffer.min_fill_percent, 50);
    assert_eq!(settings.replay_gain.mode, ReplayGainMode::Album);
    assert_eq!(settings.replay_gain.preamp_db, -3.0);
    assert!(!settings.replay_gain.compression);
}

#[test]
fn test_written_settings_read_back() {
    let mut settings = EngineSettings::default();
    settings.fade.fadeout_duration_ms = 1500;
    settings.output.device = Some("hw:0".to_string());
    settings.replay_gain.enabled = true;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    fs::write(&path, toml::to_string(&settings).unwrap()).unwrap();

    assert_eq!(EngineSettings::load(&path).unwrap(), settings);
}

#[test]
fn test_broken_file_is_not_replaced_by_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    fs::write(&path, "[fade]\nfadeout_duration_ms = \"long\"\n").unwrap();

    let result = EngineSettings::load_or_default(Some(&path));
    assert!(matches!(result, Err(Error::SettingsParse(_))));
}

#[test]
fn test_unreadable_path_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    // A directory exists but cannot be read as a file
    let result = EngineSettings::load_or_default(Some(dir.path()));
    assert!(matches!(result, Err(Error::Io(_))));
}
