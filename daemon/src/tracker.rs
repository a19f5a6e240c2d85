/// Derives "is the watched process running" from an ordered stream of
/// start/stop notifications.
///
/// The tracker is owned by the processor task and is the only thing that
/// touches the set of live pids, so it needs no locking.
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::applier::{Preset, SettingsApplier};
use crate::error::CommitError;
use crate::event::{ProcessEvent, ProcessEventKind, ProcessFilter};
use crate::process_list::ProcessSnapshot;

/// What a single event did to the tracked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Unsupported notification kind; discarded before touching the set.
    Rejected(u32),
    /// Duplicate start or stop of an untracked pid.
    Unchanged,
    /// Instance count changed but the process was already running. A commit
    /// that failed earlier is retried here.
    CountChanged { count: usize },
    /// Crossed between zero and non-zero instances; settings were re-applied.
    Transition { count: usize, is_running: bool },
}

pub struct ProcessTracker {
    pids: HashSet<u32>,
    is_running: bool,
    applier: Arc<SettingsApplier>,
}

impl ProcessTracker {
    pub fn new(applier: Arc<SettingsApplier>) -> Self {
        Self {
            pids: HashSet::new(),
            is_running: false,
            applier,
        }
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Seeds the tracked set from a point-in-time process list, then commits the
    /// preset for the resulting state. Run once, before any channel event.
    pub fn bootstrap(
        &mut self,
        snapshot: &mut dyn ProcessSnapshot,
        filter: &ProcessFilter,
    ) -> Result<Preset, CommitError> {
        if self.pids.is_empty() {
            self.pids.extend(snapshot.running_pids(filter));
        }
        self.is_running = !self.pids.is_empty();
        info!(
            process = filter.stem(),
            instances = self.pids.len(),
            "initial process snapshot"
        );
        self.applier.set_running(self.is_running)
    }

    /// Applies one notification. Settings are committed when the process goes
    /// from not running to running or back, and on any other count change only
    /// if the previous commit failed.
    pub fn apply(&mut self, event: ProcessEvent) -> TrackOutcome {
        let before = self.pids.len();
        match event.kind {
            ProcessEventKind::Started => {
                self.pids.insert(event.process_id);
            }
            ProcessEventKind::Stopped => {
                self.pids.remove(&event.process_id);
            }
            ProcessEventKind::Unsupported(id) => {
                warn!(
                    event_id = id,
                    pid = event.process_id,
                    "unsupported process notification, ignoring"
                );
                return TrackOutcome::Rejected(id);
            }
        }

        let count = self.pids.len();
        if count == before {
            debug!(pid = event.process_id, kind = ?event.kind, count, "no change");
            return TrackOutcome::Unchanged;
        }

        let is_running = count > 0;
        debug!(
            pid = event.process_id,
            name = %event.process_name,
            kind = ?event.kind,
            count,
            "tracked instances changed"
        );
        if is_running == self.is_running {
            if let Some(Ok(preset)) = self.applier.retry_failed() {
                info!(%preset, count, "failed commit retried");
            }
            return TrackOutcome::CountChanged { count };
        }

        self.is_running = is_running;
        info!(count, is_running, "watched process running state changed");
        // Failures are logged by the applier; the next transition or config
        // reload retries.
        let _ = self.applier.set_running(is_running);
        TrackOutcome::Transition { count, is_running }
    }
}
