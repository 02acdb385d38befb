//! Join barrier between the coordinator and the tasks it launches.
//!
//! Work is registered up front with [`CompletionSignal::register`], which hands
//! out one [`CompletionToken`] per expected unit. A token notifies exactly once,
//! either through [`CompletionToken::complete`] or when it is dropped, so a task
//! that fails or panics still releases the waiter.
//!
//! [`CompletionSignal::wait`] has no timeout: a token that is never completed
//! nor dropped stalls the waiter forever.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

#[derive(Debug)]
struct Shared {
    pending: watch::Sender<usize>,
    notifications: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct CompletionSignal {
    shared: Arc<Shared>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                pending,
                notifications: AtomicUsize::new(0),
            }),
        }
    }

    /// Registers one unit of expected work.
    #[must_use = "dropping the token immediately completes the unit"]
    pub fn register(&self) -> CompletionToken {
        self.shared.pending.send_modify(|n| *n += 1);
        trace!(pending = self.pending(), "registered completion unit");
        CompletionToken {
            shared: self.shared.clone(),
        }
    }

    /// Number of registered units that have not notified yet.
    pub fn pending(&self) -> usize {
        *self.shared.pending.borrow()
    }

    /// Total notifications received since creation.
    pub fn notifications(&self) -> usize {
        self.shared.notifications.load(Ordering::SeqCst)
    }

    /// Resolves once every registered unit has notified. Returns immediately
    /// when nothing is pending.
    pub async fn wait(&self) {
        let mut rx = self.shared.pending.subscribe();
        // the sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }
}

/// One registered unit of work. Notifies its signal exactly once.
#[derive(Debug)]
pub struct CompletionToken {
    shared: Arc<Shared>,
}

impl CompletionToken {
    pub fn complete(self) {
        // notification happens in drop
    }
}

impl Drop for CompletionToken {
    fn drop(&mut self) {
        self.shared.notifications.fetch_add(1, Ordering::SeqCst);
        self.shared
            .pending
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}
