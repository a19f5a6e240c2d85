use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::ConfigError;
use crate::live_config::ConfigPort;

/// Highest value `SPI_SETKEYBOARDSPEED` accepts (~30 repeats/s).
pub const MAX_REPEAT_SPEED: u32 = 31;
/// Milliseconds per native keyboard-delay step.
pub const DELAY_SCALE_MS: u32 = 250;
/// Highest value `SPI_SETKEYBOARDDELAY` accepts (~1 s).
pub const MAX_NATIVE_DELAY: u32 = 3;
/// Largest `repeatDelay` that still truncates to a valid native delay.
pub const MAX_REPEAT_DELAY_MS: u32 = (MAX_NATIVE_DELAY + 1) * DELAY_SCALE_MS - 1;

/// Root configuration structure. Deserialized from %APPDATA%\RepeatSwitch\appsettings.json.
///
/// Replaced as a whole on every reload; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub process_monitor: ProcessMonitorConfig,
    pub key_repeat: KeyRepeatSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMonitorConfig {
    /// Executable name of the watched process (e.g. "game.exe"). The extension
    /// is ignored when matching.
    pub process_name: String,
}

/// The two keyboard repeat presets the daemon switches between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRepeatSettings {
    pub default: KeyRepeatState,
    pub fast_mode: KeyRepeatState,
}

/// One keyboard repeat configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRepeatState {
    /// Native repeat speed, 0 (slowest) to [`MAX_REPEAT_SPEED`].
    pub repeat_speed: u32,
    /// Delay before repeating starts, in milliseconds. Truncated to multiples
    /// of [`DELAY_SCALE_MS`] when committed.
    pub repeat_delay: u32,
}

impl KeyRepeatState {
    fn validate(&self, preset: &'static str) -> Result<(), ConfigError> {
        if self.repeat_speed > MAX_REPEAT_SPEED {
            return Err(ConfigError::SpeedOutOfRange {
                preset,
                value: self.repeat_speed,
                max: MAX_REPEAT_SPEED,
            });
        }
        if self.repeat_delay > MAX_REPEAT_DELAY_MS {
            return Err(ConfigError::DelayOutOfRange {
                preset,
                value: self.repeat_delay,
                max: MAX_REPEAT_DELAY_MS,
            });
        }
        Ok(())
    }
}

impl AppSettings {
    /// Rejects settings that must never become active.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.process_monitor.process_name.trim().is_empty() {
            return Err(ConfigError::EmptyProcessName);
        }
        self.key_repeat.default.validate("default")?;
        self.key_repeat.fast_mode.validate("fastMode")?;
        Ok(())
    }
}

/// Reads and parses the config file at `path` without validating it.
pub fn read(path: &Path) -> Result<AppSettings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Reads, parses and validates the config file at `path`.
/// Used once at startup, where there is no last-known-good to fall back on.
pub fn load(path: &Path) -> Result<AppSettings> {
    let settings = read(path)?;
    settings
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(settings)
}

/// Spawns a file watcher on the parent directory of `path`. Whenever the config
/// file is created or modified, re-reads it and hands the candidate to `port`,
/// which validates it, swaps it in and re-applies the keyboard settings.
pub async fn watch_config(path: PathBuf, port: ConfigPort) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("failed to create config file watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        error!(dir = %watch_dir.display(), "failed to watch config directory: {e}");
        return;
    }
    info!(path = %path.display(), "watching config for changes");

    while let Some(event) = watch_rx.recv().await {
        if !affects_config(&event, &path) {
            continue;
        }
        debug!(kind = ?event.kind, "config file changed");

        match read(&path) {
            Ok(candidate) => {
                if let Err(e) = port.on_change(candidate) {
                    warn!("config reload rejected, keeping previous settings: {e}");
                }
            }
            Err(e) => warn!("config reload failed, keeping previous settings: {e:#}"),
        }
    }
}

fn affects_config(event: &notify::Event, path: &Path) -> bool {
    let is_write = matches!(
        event.kind,
        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
    );
    let file_name = path.file_name();
    is_write
        && event
            .paths
            .iter()
            .any(|p| p == path || (file_name.is_some() && p.file_name() == file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
{
  "processMonitor": { "processName": "game.exe" },
  "keyRepeat": {
    "default":  { "repeatSpeed": 20, "repeatDelay": 500 },
    "fastMode": { "repeatSpeed": 31, "repeatDelay": 250 }
  }
}
"#;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appsettings.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn load_parses_camel_case_schema() {
        let (_dir, path) = write_config(VALID);
        let settings = load(&path).unwrap();
        assert_eq!(settings.process_monitor.process_name, "game.exe");
        assert_eq!(
            settings.key_repeat.default,
            KeyRepeatState { repeat_speed: 20, repeat_delay: 500 }
        );
        assert_eq!(
            settings.key_repeat.fast_mode,
            KeyRepeatState { repeat_speed: 31, repeat_delay: 250 }
        );
    }

    #[test]
    fn shipped_example_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("appsettings.example.json");
        let settings = load(&path).unwrap();
        assert_eq!(settings.process_monitor.process_name, "game.exe");
    }

    #[test]
    fn load_ignores_unrelated_sections() {
        let (_dir, path) = write_config(
            r#"{
  "Logging": { "LogLevel": { "Default": "Information" } },
  "processMonitor": { "processName": "game.exe" },
  "keyRepeat": {
    "default":  { "repeatSpeed": 0, "repeatDelay": 0 },
    "fastMode": { "repeatSpeed": 31, "repeatDelay": 0 }
  }
}"#,
        );
        assert!(load(&path).is_ok());
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn load_invalid_json_is_an_error() {
        let (_dir, path) = write_config("{ not json");
        assert!(load(&path).is_err());
    }

    #[test]
    fn load_missing_preset_is_an_error() {
        let (_dir, path) = write_config(
            r#"{ "processMonitor": { "processName": "game.exe" },
                 "keyRepeat": { "default": { "repeatSpeed": 1, "repeatDelay": 250 } } }"#,
        );
        assert!(load(&path).is_err());
    }

    #[test]
    fn load_rejects_negative_values() {
        let (_dir, path) = write_config(&VALID.replace("\"repeatSpeed\": 20", "\"repeatSpeed\": -1"));
        assert!(load(&path).is_err());
    }

    #[test]
    fn read_does_not_validate() {
        let (_dir, path) = write_config(&VALID.replace("game.exe", ""));
        assert!(read(&path).is_ok());
        assert!(load(&path).is_err());
    }

    // ── validate ──────────────────────────────────────────────────────────────

    fn settings(speed: u32, delay: u32) -> AppSettings {
        AppSettings {
            process_monitor: ProcessMonitorConfig { process_name: "game.exe".into() },
            key_repeat: KeyRepeatSettings {
                default: KeyRepeatState { repeat_speed: 20, repeat_delay: 500 },
                fast_mode: KeyRepeatState { repeat_speed: speed, repeat_delay: delay },
            },
        }
    }

    #[test]
    fn validate_accepts_bounds() {
        assert!(settings(0, 0).validate().is_ok());
        assert!(settings(MAX_REPEAT_SPEED, MAX_REPEAT_DELAY_MS).validate().is_ok());
    }

    #[test]
    fn validate_rejects_speed_above_max() {
        assert_eq!(
            settings(32, 250).validate(),
            Err(ConfigError::SpeedOutOfRange { preset: "fastMode", value: 32, max: 31 })
        );
    }

    #[test]
    fn validate_rejects_delay_that_truncates_past_native_max() {
        assert_eq!(
            settings(31, 1000).validate(),
            Err(ConfigError::DelayOutOfRange { preset: "fastMode", value: 1000, max: 999 })
        );
    }

    #[test]
    fn validate_rejects_blank_process_name() {
        let mut s = settings(31, 250);
        s.process_monitor.process_name = "   ".into();
        assert_eq!(s.validate(), Err(ConfigError::EmptyProcessName));
    }

    // ── affects_config ────────────────────────────────────────────────────────

    #[test]
    fn affects_config_matches_writes_to_the_file_only() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};
        let path = PathBuf::from("/cfg/appsettings.json");

        let modify = notify::Event::new(notify::EventKind::Modify(ModifyKind::Any))
            .add_path(path.clone());
        assert!(affects_config(&modify, &path));

        let create = notify::Event::new(notify::EventKind::Create(CreateKind::File))
            .add_path(path.clone());
        assert!(affects_config(&create, &path));

        let other = notify::Event::new(notify::EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/cfg/status.toml"));
        assert!(!affects_config(&other, &path));

        let removed = notify::Event::new(notify::EventKind::Remove(RemoveKind::File))
            .add_path(path.clone());
        assert!(!affects_config(&removed, &path));
    }
}
