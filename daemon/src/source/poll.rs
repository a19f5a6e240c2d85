use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use super::{EventSource, Subscription};
use crate::channel::EventSender;
use crate::error::SourceError;
use crate::event::{ProcessEvent, ProcessFilter};
use crate::live_config::LiveConfig;
use crate::process_list::SystemSnapshot;

/// Poll period used when `--poll-interval-ms` is not given.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Polls the OS process list and emits a Started / Stopped event for every
/// matching pid that appeared or disappeared since the previous tick.
///
/// Works without elevation and on every platform, at the cost of missing
/// processes that live shorter than one interval.
pub struct PollingSource {
    live: Arc<LiveConfig>,
    period: Duration,
}

impl PollingSource {
    pub fn new(live: Arc<LiveConfig>, period: Duration) -> Self {
        Self { live, period }
    }
}

impl EventSource for PollingSource {
    fn subscribe(&mut self, sink: EventSender) -> Result<Subscription, SourceError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(Arc::clone(&self.live), self.period, sink, stop_rx));
        info!(period_ms = self.period.as_millis() as u64, "polling process list");
        Ok(Subscription::new(move || {
            let _ = stop_tx.send(true);
            handle.abort();
        }))
    }
}

async fn run(
    live: Arc<LiveConfig>,
    period: Duration,
    sink: EventSender,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut snapshot = SystemSnapshot::new();
    let mut known = BTreeSet::new();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_rx.changed() => break,
        }

        let settings = live.snapshot();
        let name = &settings.process_monitor.process_name;
        let current = snapshot.matching(&ProcessFilter::new(name));

        for event in diff(&known, &current, name) {
            if !sink.push(event) {
                debug!("event channel closed, stopping poller");
                return;
            }
        }
        known = current;
    }
}

/// Events that turn `previous` into `current`: exits first, then starts, each
/// in ascending pid order.
fn diff(previous: &BTreeSet<u32>, current: &BTreeSet<u32>, name: &str) -> Vec<ProcessEvent> {
    let stopped = previous
        .difference(current)
        .map(|pid| ProcessEvent::stopped(*pid, name));
    let started = current
        .difference(previous)
        .map(|pid| ProcessEvent::started(*pid, name));
    stopped.chain(started).collect()
}
