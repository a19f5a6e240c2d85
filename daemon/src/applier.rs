/// Maps the running/not-running signal to a keyboard repeat preset and commits
/// it through a [`KeyRepeatPort`].
///
/// Commits can be triggered from two contexts: the processor task (process
/// presence changed) and the config watcher (presets changed). Both go through
/// one mutex that also holds the latest running state, so whichever commit
/// lands last was computed from the newest running state and the newest config
/// snapshot.
///
/// Once the processor has stopped, [`SettingsApplier::shut_down`] closes the
/// gate and every later commit request is refused without touching the OS.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::config::{KeyRepeatSettings, KeyRepeatState};
use crate::error::CommitError;
use crate::keyboard::KeyRepeatPort;
use crate::live_config::LiveConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Preset {
    Default,
    FastMode,
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Default => f.write_str("Default"),
            Preset::FastMode => f.write_str("FastMode"),
        }
    }
}

/// `FastMode` while the watched process runs, `Default` otherwise.
pub fn select(is_running: bool, settings: &KeyRepeatSettings) -> (Preset, KeyRepeatState) {
    if is_running {
        (Preset::FastMode, settings.fast_mode)
    } else {
        (Preset::Default, settings.default)
    }
}

/// What the applier last did, for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub is_running: bool,
    /// Preset of the last successful commit.
    pub preset: Option<Preset>,
    /// Error of the last commit, cleared by the next success.
    pub last_error: Option<String>,
    /// Set once the processor has stopped; no commit happens after this.
    pub stopped: bool,
}

pub struct SettingsApplier {
    port: Box<dyn KeyRepeatPort>,
    live: Arc<LiveConfig>,
    applied: Mutex<Applied>,
}

impl SettingsApplier {
    pub fn new(port: Box<dyn KeyRepeatPort>, live: Arc<LiveConfig>) -> Self {
        Self {
            port,
            live,
            applied: Mutex::new(Applied::default()),
        }
    }

    /// Records the new running state and commits the matching preset.
    ///
    /// The running state is kept even if the commit fails, so a later
    /// [`SettingsApplier::reapply`] retries with the right preset.
    pub fn set_running(&self, is_running: bool) -> Result<Preset, CommitError> {
        let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
        if applied.stopped {
            return Err(CommitError::ShutDown);
        }
        applied.is_running = is_running;
        self.commit_locked(&mut applied)
    }

    /// Re-commits the preset for the current running state against the current
    /// config snapshot.
    pub fn reapply(&self) -> Result<Preset, CommitError> {
        let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
        self.commit_locked(&mut applied)
    }

    /// Re-commits only if the last commit failed. Returns `None` when there
    /// was nothing to retry.
    pub fn retry_failed(&self) -> Option<Result<Preset, CommitError>> {
        let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
        applied.last_error.as_ref()?;
        Some(self.commit_locked(&mut applied))
    }

    /// Refuses every later commit. Called by the processor on its way to
    /// `Stopped`.
    pub fn shut_down(&self) {
        let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
        applied.stopped = true;
    }

    pub fn applied(&self) -> Applied {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn commit_locked(&self, applied: &mut Applied) -> Result<Preset, CommitError> {
        if applied.stopped {
            debug!("commit requested after shutdown, ignoring");
            return Err(CommitError::ShutDown);
        }
        let settings = self.live.snapshot();
        let (preset, state) = select(applied.is_running, &settings.key_repeat);

        match self.port.commit(&state) {
            Ok(()) => {
                info!(
                    %preset,
                    repeat_speed = state.repeat_speed,
                    repeat_delay = state.repeat_delay,
                    "keyboard repeat settings committed"
                );
                applied.preset = Some(preset);
                applied.last_error = None;
                Ok(preset)
            }
            Err(e) => {
                warn!(%preset, "{e}");
                applied.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}
