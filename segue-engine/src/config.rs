//! segue-engine specific configuration
//!
//! The engine reads its settings through a [`SettingsSource`] at startup and
//! again on every ReloadSettings. The source is only ever read.

use crate::error::{Error, Result};
use segue_common::config::EngineSettings;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Where engine settings come from
pub trait SettingsSource: Send + Sync {
    fn load(&self) -> Result<EngineSettings>;

    /// Human-readable origin for log lines
    fn describe(&self) -> String;
}

/// Settings read from a TOML file. A missing file yields defaults.
pub struct FileSettings {
    path: Option<PathBuf>,
}

impl FileSettings {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl SettingsSource for FileSettings {
    fn load(&self) -> Result<EngineSettings> {
        Ok(EngineSettings::load_or_default(self.path.as_deref())?)
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(p) => p.display().to_string(),
            None => "built-in defaults".to_string(),
        }
    }
}

/// Settings held in memory; replaceable at runtime
pub struct StaticSettings {
    settings: Mutex<EngineSettings>,
    fail_next: AtomicBool,
}

impl StaticSettings {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Replace what the next `load` returns
    pub fn set(&self, settings: EngineSettings) {
        *self.settings.lock().unwrap() = settings;
    }

    /// Make the next `load` fail, as an unreadable file would
    pub fn fail_next_load(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl SettingsSource for StaticSettings {
    fn load(&self) -> Result<EngineSettings> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Config("settings unavailable".to_string()));
        }
        Ok(self.settings.lock().unwrap().clone())
    }

    fn describe(&self) -> String {
        "in-memory settings".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_settings_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSettings::new(Some(dir.path().join("absent.toml")));
        assert_eq!(source.load().unwrap(), EngineSettings::default());
        assert!(source.describe().ends_with("absent.toml"));
    }

    #[test]
    fn test_file_settings_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[fade\n").unwrap();
        let source = FileSettings::new(Some(path));
        assert!(matches!(source.load(), Err(Error::Config(_))));
    }

    #[test]
    fn test_static_settings_fail_once() {
        let source = StaticSettings::default();
        source.fail_next_load();
        assert!(source.load().is_err());
        assert!(source.load().is_ok());

        let mut changed = EngineSettings::default();
        changed.mono_playback = true;
        source.set(changed.clone());
        assert_eq!(source.load().unwrap(), changed);
    }
}
