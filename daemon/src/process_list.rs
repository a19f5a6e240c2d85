use std::collections::BTreeSet;
use sysinfo::{ProcessesToUpdate, System};

use crate::event::ProcessFilter;

/// Point-in-time enumeration of running processes.
pub trait ProcessSnapshot: Send {
    /// Returns the pids of every running process matching `filter`.
    fn running_pids(&mut self, filter: &ProcessFilter) -> Vec<u32>;
}

/// [`ProcessSnapshot`] backed by the OS process list.
pub struct SystemSnapshot {
    sys: System,
}

impl SystemSnapshot {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }

    /// Like [`ProcessSnapshot::running_pids`] but sorted and de-duplicated, for
    /// diffing between polls.
    pub fn matching(&mut self, filter: &ProcessFilter) -> BTreeSet<u32> {
        self.sys.refresh_processes(ProcessesToUpdate::All, true);
        self.sys
            .processes()
            .iter()
            .filter(|(_, p)| filter.matches(&p.name().to_string_lossy()))
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSnapshot for SystemSnapshot {
    fn running_pids(&mut self, filter: &ProcessFilter) -> Vec<u32> {
        self.matching(filter).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_finds_nothing() {
        let pids = SystemSnapshot::new().running_pids(&ProcessFilter::new(""));
        assert!(pids.is_empty());
    }
}
