/// The event loop: bootstrap, subscribe, consume notifications, drain, stop.
///
/// ```text
/// NotStarted -> Starting -> Running -> Draining -> Stopped
/// ```
///
/// The processor task is the only owner of the [`ProcessTracker`]. Event
/// sources feed it through the channel; config reloads bypass it and go
/// straight to the shared [`SettingsApplier`].
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::applier::SettingsApplier;
use crate::channel::{event_channel, EventReceiver, EventSender, Next};
use crate::event::{ProcessEvent, ProcessFilter};
use crate::live_config::LiveConfig;
use crate::process_list::ProcessSnapshot;
use crate::source::{EventSource, Subscription};
use crate::status::StatusBoard;
use crate::tracker::{ProcessTracker, TrackOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Starting,
    Running,
    Draining,
    Stopped,
}

/// What a finished run did, mostly for tests and the shutdown log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Events taken off the channel, including those handled while draining.
    pub processed: usize,
    pub drained: usize,
    pub final_count: usize,
    /// No event source could be subscribed.
    pub degraded: bool,
}

pub struct Processor {
    tracker: ProcessTracker,
    applier: Arc<SettingsApplier>,
    live: Arc<LiveConfig>,
    sink: EventSender,
    events: EventReceiver,
    snapshot: Box<dyn ProcessSnapshot>,
    source: Box<dyn EventSource>,
    state_tx: watch::Sender<LifecycleState>,
    board: Option<Arc<StatusBoard>>,
    processed: usize,
    degraded: bool,
}

impl Processor {
    pub fn new(
        live: Arc<LiveConfig>,
        applier: Arc<SettingsApplier>,
        snapshot: Box<dyn ProcessSnapshot>,
        source: Box<dyn EventSource>,
    ) -> Self {
        let (sink, events) = event_channel();
        let (state_tx, _) = watch::channel(LifecycleState::NotStarted);
        Self {
            tracker: ProcessTracker::new(Arc::clone(&applier)),
            applier,
            live,
            sink,
            events,
            snapshot,
            source,
            state_tx,
            board: None,
            processed: 0,
            degraded: false,
        }
    }

    /// Publishes lifecycle and instance-count changes to `board`.
    pub fn with_status(mut self, board: Arc<StatusBoard>) -> Self {
        self.board = Some(board);
        self
    }

    /// A sender into this processor's channel, in addition to the one handed
    /// to the event source.
    #[cfg(test)]
    pub fn sender(&self) -> EventSender {
        self.sink.clone()
    }

    #[cfg(test)]
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Runs until `stop` becomes `true`, then handles every event already
    /// queued before returning.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> RunSummary {
        self.transition(LifecycleState::Starting);
        let subscription = self.start();
        self.transition(LifecycleState::Running);

        loop {
            match self.events.next(&mut stop).await {
                Next::Event(event) => self.handle(event),
                Next::Cancelled => break,
                Next::Closed => {
                    warn!("event channel closed; waiting for shutdown");
                    let _ = stop.wait_for(|stopped| *stopped).await;
                    break;
                }
            }
        }

        self.transition(LifecycleState::Draining);
        let pending = self.events.drain();
        let drained = pending.len();
        for event in pending {
            self.handle(event);
        }
        if drained > 0 {
            info!(drained, "handled queued events before stopping");
        }

        if let Some(subscription) = subscription {
            subscription.release();
        }
        self.applier.shut_down();
        self.transition(LifecycleState::Stopped);

        RunSummary {
            processed: self.processed,
            drained,
            final_count: self.tracker.count(),
            degraded: self.degraded,
        }
    }

    /// Seeds the tracker, commits the initial preset and subscribes the event
    /// source. A failed subscription leaves the processor in degraded mode:
    /// no live notifications, but config reloads still apply.
    fn start(&mut self) -> Option<Subscription> {
        let settings = self.live.snapshot();
        let filter = ProcessFilter::new(&settings.process_monitor.process_name);
        // Commit failures are logged by the applier and retried on the next
        // transition or reload.
        let _ = self.tracker.bootstrap(self.snapshot.as_mut(), &filter);

        match self.source.subscribe(self.sink.clone()) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                error!("{e}; continuing without live process notifications");
                self.degraded = true;
                None
            }
        }
    }

    fn handle(&mut self, event: ProcessEvent) {
        self.processed += 1;
        match self.tracker.apply(event) {
            TrackOutcome::Transition { .. } | TrackOutcome::CountChanged { .. } => self.write_status(),
            TrackOutcome::Rejected(_) | TrackOutcome::Unchanged => {}
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        self.state_tx.send_replace(next);
        info!(state = ?next, "processor state");
        self.write_status();
    }

    fn write_status(&self) {
        let Some(board) = &self.board else { return };
        let state = *self.state_tx.borrow();
        let process_name = self.live.snapshot().process_monitor.process_name.clone();
        board.publish(|current| {
            current.state = state;
            current.process_name = process_name;
            current.tracked_instances = self.tracker.count();
            current.record_applied(&self.applier.applied());
            current.degraded = self.degraded;
        });
    }
}
