use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

use crate::applier::{Applied, Preset};
use crate::processor::LifecycleState;

/// Runtime status written by the daemon to %APPDATA%\RepeatSwitch\status.toml.
/// Overwritten in place; it is a current snapshot, not a history.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServiceStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: LifecycleState,
    pub process_name: String,
    /// Number of tracked instances of the watched process.
    pub tracked_instances: usize,
    /// Preset of the last successful commit, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_preset: Option<Preset>,
    /// Why the last commit failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// True when no event source could be subscribed.
    pub degraded: bool,
    /// RFC 3339 time of this snapshot.
    pub updated_at: String,
}

impl ServiceStatus {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: LifecycleState::NotStarted,
            process_name: process_name.into(),
            tracked_instances: 0,
            active_preset: None,
            last_error: None,
            degraded: false,
            updated_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// Copies the outcome of the applier's last commit.
    pub fn record_applied(&mut self, applied: &Applied) {
        self.active_preset = applied.preset;
        self.last_error = applied.last_error.clone();
    }
}

/// The status file plus the snapshot last written to it.
///
/// Shared by the processor (lifecycle and instance count) and the config
/// reload path (preset commits), so each writer only touches its own fields.
pub struct StatusBoard {
    path: PathBuf,
    current: Mutex<ServiceStatus>,
}

impl StatusBoard {
    pub fn new(path: PathBuf, process_name: impl Into<String>) -> Self {
        Self {
            path,
            current: Mutex::new(ServiceStatus::new(process_name)),
        }
    }

    /// Applies `update` to the current snapshot, stamps it and rewrites the file.
    pub fn publish(&self, update: impl FnOnce(&mut ServiceStatus)) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut current);
        current.updated_at = chrono::Local::now().to_rfc3339();
        write_status(&self.path, &current);
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// A status write failure is logged and never stops the daemon.
pub fn write_status(path: &Path, status: &ServiceStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), "failed to create status directory: {e}");
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!(path = %path.display(), "failed to write status file: {e}");
            }
        }
        Err(e) => warn!("failed to serialize status: {e}"),
    }
}
