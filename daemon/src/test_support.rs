/// Fakes shared by the unit tests.
use std::sync::{Arc, Mutex};

use crate::channel::EventSender;
use crate::config::{AppSettings, KeyRepeatSettings, KeyRepeatState, ProcessMonitorConfig};
use crate::error::{CommitError, SourceError};
use crate::event::{ProcessEvent, ProcessFilter};
use crate::process_list::ProcessSnapshot;
use crate::source::{EventSource, Subscription};

pub const DEFAULT_STATE: KeyRepeatState = KeyRepeatState {
    repeat_speed: 20,
    repeat_delay: 500,
};
pub const FAST_STATE: KeyRepeatState = KeyRepeatState {
    repeat_speed: 31,
    repeat_delay: 250,
};

pub fn app_settings(process_name: &str) -> AppSettings {
    AppSettings {
        process_monitor: ProcessMonitorConfig {
            process_name: process_name.to_string(),
        },
        key_repeat: KeyRepeatSettings {
            default: DEFAULT_STATE,
            fast_mode: FAST_STATE,
        },
    }
}

#[derive(Default)]
struct PortState {
    commits: Vec<KeyRepeatState>,
    attempts: usize,
    fail_code: Option<i32>,
}

/// Records every successful commit; can be switched into a failing mode.
#[derive(Clone, Default)]
pub struct RecordingPort {
    state: Arc<Mutex<PortState>>,
}

impl RecordingPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> Vec<KeyRepeatState> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn fail_with(&self, code: i32) {
        self.state.lock().unwrap().fail_code = Some(code);
    }

    pub fn succeed(&self) {
        self.state.lock().unwrap().fail_code = None;
    }
}

impl crate::keyboard::KeyRepeatPort for RecordingPort {
    fn commit(&self, state: &KeyRepeatState) -> Result<(), CommitError> {
        let mut inner = self.state.lock().unwrap();
        inner.attempts += 1;
        if let Some(code) = inner.fail_code {
            return Err(CommitError::Rejected {
                setting: "SPI_SETKEYBOARDSPEED",
                value: state.repeat_speed,
                code,
            });
        }
        inner.commits.push(*state);
        Ok(())
    }
}

/// Point-in-time process list with fixed content.
pub struct FixedSnapshot {
    pub processes: Vec<(u32, String)>,
}

impl FixedSnapshot {
    pub fn empty() -> Self {
        Self { processes: Vec::new() }
    }

    pub fn with(processes: &[(u32, &str)]) -> Self {
        Self {
            processes: processes
                .iter()
                .map(|(pid, name)| (*pid, name.to_string()))
                .collect(),
        }
    }
}

impl ProcessSnapshot for FixedSnapshot {
    fn running_pids(&mut self, filter: &ProcessFilter) -> Vec<u32> {
        self.processes
            .iter()
            .filter(|(_, name)| filter.matches(name))
            .map(|(pid, _)| *pid)
            .collect()
    }
}

/// Source that replays a fixed list of events on subscribe and records whether
/// it was released.
#[derive(Default)]
pub struct ScriptedSource {
    pub events: Vec<ProcessEvent>,
    pub released: Arc<Mutex<bool>>,
}

impl ScriptedSource {
    pub fn new(events: Vec<ProcessEvent>) -> Self {
        Self {
            events,
            released: Arc::default(),
        }
    }
}

impl EventSource for ScriptedSource {
    fn subscribe(&mut self, sink: EventSender) -> Result<Subscription, SourceError> {
        for event in self.events.drain(..) {
            sink.push(event);
        }
        let released = Arc::clone(&self.released);
        Ok(Subscription::new(move || *released.lock().unwrap() = true))
    }
}

/// Source whose subscription always fails.
pub struct FailingSource;

impl EventSource for FailingSource {
    fn subscribe(&mut self, _sink: EventSender) -> Result<Subscription, SourceError> {
        Err(SourceError::Subscribe {
            code: 0x80070005u32 as i32,
            message: "access denied".into(),
        })
    }
}
