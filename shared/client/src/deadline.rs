use std::future::Future;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::OffloadError;

/// Budget of the synchronous session offload request.
pub const SESSION_OFFLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Scope of a single deadline-bound operation.
///
/// The clock starts when the context is created, not when the guarded future
/// is first polled, so any work done in between is charged against the budget.
/// Dropping the context cancels it.
#[derive(Debug)]
pub struct DeadlineContext {
    timeout: Duration,
    deadline: Instant,
    cancel: CancellationToken,
}

impl DeadlineContext {
    pub fn new(timeout: Duration) -> Self {
        Self::with_parent(timeout, &CancellationToken::new())
    }

    /// Cancelling `parent` cancels this context too, never the other way round.
    pub fn with_parent(timeout: Duration, parent: &CancellationToken) -> Self {
        Self {
            timeout,
            deadline: Instant::now() + timeout,
            cancel: parent.child_token(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fails if the context can no longer be used.
    pub fn check(&self) -> Result<(), OffloadError> {
        if self.is_cancelled() {
            Err(OffloadError::Cancelled)
        } else if self.is_expired() {
            Err(OffloadError::DeadlineExceeded(self.timeout))
        } else {
            Ok(())
        }
    }

    /// Drives `fut` until it resolves, the deadline passes or the context is cancelled.
    ///
    /// `fut` is never polled if the context is already unusable.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, OffloadError>
    where
        F: Future<Output = Result<T, OffloadError>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OffloadError::Cancelled),
            res = timeout_at(self.deadline, fut) => match res {
                Ok(res) => res,
                Err(_) => Err(OffloadError::DeadlineExceeded(self.timeout)),
            },
        }
    }
}

impl Drop for DeadlineContext {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
