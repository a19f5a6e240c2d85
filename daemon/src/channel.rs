/// Ordered hand-off queue between event sources and the processor.
///
/// Unbounded so a burst of process notifications is never dropped or blocks the
/// source's callback thread. There is exactly one [`EventReceiver`]; senders are
/// cheap to clone and may live on any thread.
use tokio::sync::{mpsc, watch};

use crate::event::ProcessEvent;

pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ProcessEvent>,
}

impl EventSender {
    /// Queues `event` without blocking. Returns `false` once the receiver has
    /// started draining or has been dropped; the event is discarded.
    pub fn push(&self, event: ProcessEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Outcome of waiting on the channel.
#[derive(Debug, PartialEq, Eq)]
pub enum Next {
    Event(ProcessEvent),
    /// The stop signal was raised (or its sender dropped).
    Cancelled,
    /// Every sender is gone; nothing more can arrive.
    Closed,
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<ProcessEvent>,
}

impl EventReceiver {
    /// Waits for the next event or for `stop` to become `true`.
    ///
    /// Cancellation wins over a ready event; anything still queued is picked up
    /// by [`EventReceiver::drain`].
    pub async fn next(&mut self, stop: &mut watch::Receiver<bool>) -> Next {
        loop {
            if *stop.borrow_and_update() {
                return Next::Cancelled;
            }
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        return Next::Cancelled;
                    }
                }
                event = self.rx.recv() => {
                    return match event {
                        Some(event) => Next::Event(event),
                        None => Next::Closed,
                    };
                }
            }
        }
    }

    /// Closes the channel to new pushes and returns everything already queued,
    /// in arrival order.
    pub fn drain(&mut self) -> Vec<ProcessEvent> {
        self.rx.close();
        let mut pending = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            pending.push(event);
        }
        pending
    }
}
