/// The active [`AppSettings`] snapshot and the reload path that replaces it.
///
/// Readers get an `Arc` to a fully-formed snapshot; a reload swaps the whole
/// pointer under a write lock, so nobody ever observes a half-updated config.
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use crate::applier::SettingsApplier;
use crate::config::AppSettings;
use crate::error::ConfigError;
use crate::status::StatusBoard;

#[derive(Debug)]
pub struct LiveConfig {
    current: RwLock<Arc<AppSettings>>,
}

impl LiveConfig {
    /// `initial` is expected to have passed [`AppSettings::validate`] already.
    pub fn new(initial: AppSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<AppSettings> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Validates `candidate` and makes it the active snapshot. On error the
    /// previous snapshot stays active.
    pub fn replace(&self, candidate: AppSettings) -> Result<Arc<AppSettings>, ConfigError> {
        candidate.validate()?;
        let next = Arc::new(candidate);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&next);
        Ok(next)
    }
}

/// Entry point for configuration changes. Cloned into the config watcher task.
#[derive(Clone)]
pub struct ConfigPort {
    live: Arc<LiveConfig>,
    applier: Arc<SettingsApplier>,
    board: Option<Arc<StatusBoard>>,
}

impl ConfigPort {
    pub fn new(live: Arc<LiveConfig>, applier: Arc<SettingsApplier>) -> Self {
        Self {
            live,
            applier,
            board: None,
        }
    }

    /// Publishes the outcome of every reload commit to `board`.
    pub fn with_status(mut self, board: Arc<StatusBoard>) -> Self {
        self.board = Some(board);
        self
    }

    /// Swaps in `candidate` and immediately re-commits the preset for the
    /// current running state. Process presence is not recomputed.
    ///
    /// A rejected candidate leaves the last valid settings in place. A failed
    /// commit is logged by the applier and retried on the next trigger; it does
    /// not undo the swap.
    pub fn on_change(&self, candidate: AppSettings) -> Result<(), ConfigError> {
        let previous = self.live.snapshot();
        let next = self.live.replace(candidate)?;
        if next.process_monitor.process_name != previous.process_monitor.process_name {
            info!(
                from = %previous.process_monitor.process_name,
                to = %next.process_monitor.process_name,
                "watched process name changed"
            );
        }
        info!("config reloaded");
        let _ = self.applier.reapply();
        if let Some(board) = &self.board {
            board.publish(|current| {
                current.process_name = next.process_monitor.process_name.clone();
                current.record_applied(&self.applier.applied());
            });
        }
        Ok(())
    }
}
