//! Engine settings model and settings file resolution
//!
//! Settings live in a TOML file that the engine only ever reads. Every field
//! has a default, so a partial (or missing) file is valid.

use crate::time::ms_to_nanos;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the settings file
pub const SETTINGS_ENV_VAR: &str = "SEGUE_SETTINGS";

const SETTINGS_DIR: &str = "segue";
const SETTINGS_FILE: &str = "settings.toml";

/// Complete engine settings, as read from the settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub output: OutputSettings,
    pub fade: FadeSettings,
    pub buffer: BufferSettings,
    pub replay_gain: ReplayGainSettings,

    /// Downmix every pipeline to mono
    pub mono_playback: bool,

    /// Initial user volume (0-100)
    pub volume_percent: u8,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            output: OutputSettings::default(),
            fade: FadeSettings::default(),
            buffer: BufferSettings::default(),
            replay_gain: ReplayGainSettings::default(),
            mono_playback: false,
            volume_percent: 100,
        }
    }
}

/// Output sink selection. Applied when the next pipeline is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Sink name as reported by the backend's output list; "auto" picks the
    /// default host
    pub sink: String,

    /// Device name within the sink; `None` selects the default device
    pub device: Option<String>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            sink: "auto".to_string(),
            device: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FadeSettings {
    /// Fade out on Stop
    pub fadeout_enabled: bool,
    pub fadeout_duration_ms: u64,

    /// Crossfade on manual track changes
    pub crossfade_enabled: bool,

    /// Crossfade on automatic track changes
    pub autocrossfade_enabled: bool,

    /// Allow automatic crossfades between tracks of the same album
    pub crossfade_same_album: bool,

    /// Fade out on Pause, fade back in on Unpause
    pub fadeout_pause_enabled: bool,
    pub fadeout_pause_duration_ms: u64,
}

impl Default for FadeSettings {
    fn default() -> Self {
        Self {
            fadeout_enabled: true,
            fadeout_duration_ms: 2000,
            crossfade_enabled: true,
            autocrossfade_enabled: false,
            crossfade_same_album: false,
            fadeout_pause_enabled: false,
            fadeout_pause_duration_ms: 250,
        }
    }
}

impl FadeSettings {
    pub fn fadeout_duration_nanos(&self) -> u64 {
        ms_to_nanos(self.fadeout_duration_ms)
    }

    pub fn fadeout_pause_duration_nanos(&self) -> u64 {
        ms_to_nanos(self.fadeout_pause_duration_ms)
    }
}

/// Pipeline buffering. Applied when the next pipeline is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Decoded audio kept ahead of the output
    pub duration_ms: u64,

    /// Fill level (percent of `duration_ms`) a pipeline must reach before
    /// it stops reporting itself as buffering
    pub min_fill_percent: u8,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            duration_ms: 4000,
            min_fill_percent: 33,
        }
    }
}

impl BufferSettings {
    pub fn duration_nanos(&self) -> u64 {
        ms_to_nanos(self.duration_ms)
    }
}

/// Which replay-gain tag a pipeline honours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayGainMode {
    #[default]
    Track,
    Album,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayGainSettings {
    pub enabled: bool,
    pub mode: ReplayGainMode,
    pub preamp_db: f32,

    /// Soft-clip instead of letting positive gain clip hard
    pub compression: bool,
}

impl Default for ReplayGainSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: ReplayGainMode::Track,
            preamp_db: 0.0,
            compression: true,
        }
    }
}

impl EngineSettings {
    /// Parse settings from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut settings: EngineSettings = toml::from_str(text)?;
        settings.normalise();
        Ok(settings)
    }

    /// Read settings from a file. The file must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "Loaded engine settings");
        Ok(settings)
    }

    /// Read settings from `path`, falling back to defaults when there is no
    /// path or the file does not exist. A file that exists but fails to
    /// parse is still an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(p) => {
                debug!(path = %p.display(), "Settings file missing, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    fn normalise(&mut self) {
        self.volume_percent = self.volume_percent.min(100);
        self.buffer.min_fill_percent = self.buffer.min_fill_percent.min(100);
    }
}

/// Settings file resolution, highest priority first:
/// 1. Command-line argument
/// 2. `SEGUE_SETTINGS` environment variable
/// 3. User config dir (`~/.config/segue/settings.toml` on Linux)
/// 4. `/etc/segue/settings.toml`
///
/// Returns `None` when no candidate exists; the caller then runs on defaults.
pub fn resolve_settings_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    let env_value = std::env::var(SETTINGS_ENV_VAR).ok();
    let candidates = default_settings_candidates();
    resolve_from(cli_arg, env_value.as_deref(), &candidates)
}

fn default_settings_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(SETTINGS_DIR).join(SETTINGS_FILE));
    }
    if cfg!(unix) {
        candidates.push(PathBuf::from("/etc").join(SETTINGS_DIR).join(SETTINGS_FILE));
    }
    candidates
}

fn resolve_from(
    cli_arg: Option<&Path>,
    env_value: Option<&str>,
    candidates: &[PathBuf],
) -> Option<PathBuf> {
    // Explicit choices win even if the file is absent
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Some(value) = env_value.filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(value));
    }
    candidates.iter().find(|p| p.exists()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.output.sink, "auto");
        assert!(settings.fade.fadeout_enabled);
        assert_eq!(settings.fade.fadeout_duration_ms, 2000);
        assert!(settings.fade.crossfade_enabled);
        assert!(!settings.fade.autocrossfade_enabled);
        assert!(!settings.fade.fadeout_pause_enabled);
        assert_eq!(settings.fade.fadeout_pause_duration_ms, 250);
        assert_eq!(settings.buffer.duration_ms, 4000);
        assert_eq!(settings.buffer.min_fill_percent, 33);
        assert!(!settings.replay_gain.enabled);
        assert!(settings.replay_gain.compression);
        assert_eq!(settings.volume_percent, 100);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = EngineSettings::from_toml_str(
            r#"
            mono_playback = true

            [fade]
            autocrossfade_enabled = true
            fadeout_duration_ms = 5000

            [replay_gain]
            enabled = true
            mode = "album"
            "#,
        )
        .unwrap();

        assert!(settings.mono_playback);
        assert!(settings.fade.autocrossfade_enabled);
        assert_eq!(settings.fade.fadeout_duration_nanos(), 5_000_000_000);
        assert!(settings.fade.crossfade_enabled);
        assert_eq!(settings.replay_gain.mode, ReplayGainMode::Album);
        assert_eq!(settings.buffer, BufferSettings::default());
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let settings = EngineSettings::from_toml_str(
            "volume_percent = 150\n[buffer]\nmin_fill_percent = 250\n",
        )
        .unwrap();
        assert_eq!(settings.volume_percent, 100);
        assert_eq!(settings.buffer.min_fill_percent, 100);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let result = EngineSettings::from_toml_str("[fade\nfadeout_enabled = ");
        assert!(matches!(result, Err(Error::SettingsParse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[output]\nsink = \"alsa\"\ndevice = \"hw:1\"").unwrap();

        let settings = EngineSettings::load(file.path()).unwrap();
        assert_eq!(settings.output.sink, "alsa");
        assert_eq!(settings.output.device.as_deref(), Some("hw:1"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let settings = EngineSettings::load_or_default(Some(&missing)).unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(EngineSettings::load_or_default(None).unwrap(), EngineSettings::default());
    }

    #[test]
    fn test_resolution_priority() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        let system = dir.path().join("system.toml");
        std::fs::write(&system, "").unwrap();
        let candidates = vec![user.clone(), system.clone()];

        let cli = PathBuf::from("/from/cli.toml");
        assert_eq!(
            resolve_from(Some(&cli), Some("/from/env.toml"), &candidates),
            Some(cli)
        );
        assert_eq!(
            resolve_from(None, Some("/from/env.toml"), &candidates),
            Some(PathBuf::from("/from/env.toml"))
        );
        // Empty env value is ignored; first existing candidate wins
        assert_eq!(resolve_from(None, Some(""), &candidates), Some(system.clone()));

        std::fs::write(&user, "").unwrap();
        assert_eq!(resolve_from(None, None, &candidates), Some(user));
    }

    #[test]
    fn test_resolution_none_found() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = vec![dir.path().join("a.toml")];
        assert_eq!(resolve_from(None, None, &candidates), None);
    }
}
