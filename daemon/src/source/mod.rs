/// Producers of [`ProcessEvent`](crate::event::ProcessEvent)s.
///
/// A source pushes notifications into the processor's channel from its own
/// thread or task. It never blocks on the consumer.
pub mod poll;
pub mod security_log;

use crate::channel::EventSender;
use crate::error::SourceError;

pub use poll::{PollingSource, DEFAULT_POLL_INTERVAL_MS};
pub use security_log::SecurityLogSource;

pub trait EventSource: Send {
    /// Starts delivering notifications to `sink` until the returned
    /// [`Subscription`] is released or dropped.
    fn subscribe(&mut self, sink: EventSender) -> Result<Subscription, SourceError>;
}

/// A live subscription. Releasing it stops delivery; dropping it does the same.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn release_runs_once_even_when_dropped_after() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = {
            let calls = Arc::clone(&calls);
            Subscription::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        sub.release();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases() {
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            let _sub = Subscription::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
