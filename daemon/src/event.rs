/// Security-log event id for "A new process has been created".
pub const PROCESS_START_EVENT_ID: u32 = 4688;
/// Security-log event id for "A process has exited".
pub const PROCESS_STOP_EVENT_ID: u32 = 4689;

/// Lifecycle transition reported by an event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEventKind {
    Started,
    Stopped,
    /// A notification the tracker does not understand, carrying its raw id.
    Unsupported(u32),
}

impl ProcessEventKind {
    pub fn from_event_id(id: u32) -> Self {
        match id {
            PROCESS_START_EVENT_ID => Self::Started,
            PROCESS_STOP_EVENT_ID => Self::Stopped,
            other => Self::Unsupported(other),
        }
    }
}

/// A single process notification, consumed exactly once by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub kind: ProcessEventKind,
    pub process_id: u32,
    pub process_name: String,
}

impl ProcessEvent {
    pub fn started(process_id: u32, process_name: impl Into<String>) -> Self {
        Self {
            kind: ProcessEventKind::Started,
            process_id,
            process_name: process_name.into(),
        }
    }

    pub fn stopped(process_id: u32, process_name: impl Into<String>) -> Self {
        Self {
            kind: ProcessEventKind::Stopped,
            process_id,
            process_name: process_name.into(),
        }
    }
}

/// Case-insensitive name matcher for the watched process.
///
/// The configured name has its extension stripped ("Game.exe" -> "game") and is
/// then matched as a substring of a process name or full image path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFilter {
    stem: String,
}

impl ProcessFilter {
    pub fn new(process_name: &str) -> Self {
        let name = process_name.trim();
        let stem = match name.rsplit_once('.') {
            Some((stem, _ext)) if !stem.is_empty() => stem,
            _ => name,
        };
        Self {
            stem: stem.to_lowercase(),
        }
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Returns true if `name_or_path` refers to the watched process.
    /// An empty filter matches nothing.
    pub fn matches(&self, name_or_path: &str) -> bool {
        !self.stem.is_empty() && name_or_path.to_lowercase().contains(&self.stem)
    }
}
