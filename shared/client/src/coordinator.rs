use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use offload_proto::AddSessionResponse;
use rand_chacha::ChaCha8Rng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::background::spawn_background;
use crate::{
    CompletionSignal, Connection, DeadlineContext, GrpcSessionTable, OffloadError, SessionOffload,
    SESSION_OFFLOAD_TIMEOUT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoordinatorState {
    Start,
    ChannelOpen,
    RequestIssued,
    BackgroundLaunched,
    AwaitingCompletion,
    Done,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoordinatorState::Start => "start",
            CoordinatorState::ChannelOpen => "channel open",
            CoordinatorState::RequestIssued => "request issued",
            CoordinatorState::BackgroundLaunched => "background launched",
            CoordinatorState::AwaitingCompletion => "awaiting completion",
            CoordinatorState::Done => "done",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
pub struct RunReport {
    /// Outcome of the synchronous call. Reported, never acted upon.
    pub offload: Result<AddSessionResponse, OffloadError>,
    pub background_notifications: usize,
}

/// Main flow of a client run.
///
/// Issues the deadline-bound call, then launches the background unit and
/// waits for it before releasing the connection. The wait has no timeout: if
/// the background unit never finishes, neither does [`Coordinator::run`].
pub struct Coordinator<S> {
    session_table: Arc<S>,
    rng: ChaCha8Rng,
    request_timeout: Duration,
    cancel: CancellationToken,
    state: watch::Sender<CoordinatorState>,
}

impl<S: SessionOffload> Coordinator<S> {
    pub fn new(session_table: S, rng: ChaCha8Rng) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Start);
        Self {
            session_table: Arc::new(session_table),
            rng,
            request_timeout: SESSION_OFFLOAD_TIMEOUT,
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Cancelling `cancel` aborts the synchronous call. The background unit is unaffected.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Runs the flow to completion and releases `connection`.
    ///
    /// `connection` is released on every exit path: explicitly once the
    /// background unit has notified, or by its drop guard if this future is
    /// dropped or panics earlier.
    pub async fn run(self, connection: Connection) -> RunReport {
        let Self {
            session_table,
            rng,
            request_timeout,
            cancel,
            state,
        } = self;
        let transition = |next: CoordinatorState| {
            debug!(state = %next, "Coordinator transition");
            state.send_replace(next);
        };

        transition(CoordinatorState::ChannelOpen);

        let ctx = DeadlineContext::with_parent(request_timeout, &cancel);
        let offload = session_table.offload_session(&ctx).await;
        drop(ctx);
        log_offload(&offload);
        transition(CoordinatorState::RequestIssued);

        let completion = CompletionSignal::new();
        let token = completion.register();
        // detached: the completion signal is the only join
        let _ = spawn_background(session_table.clone(), rng, token);
        transition(CoordinatorState::BackgroundLaunched);

        transition(CoordinatorState::AwaitingCompletion);
        completion.wait().await;

        drop(session_table);
        connection.close();
        transition(CoordinatorState::Done);

        RunReport {
            offload,
            background_notifications: completion.notifications(),
        }
    }
}

fn log_offload(offload: &Result<AddSessionResponse, OffloadError>) {
    match offload {
        Ok(response) if response.is_accepted() => {
            info!(session_id = response.session_id, "Session offloaded")
        }
        Ok(response) => warn!(
            session_id = response.session_id,
            status = response.request_status().as_str_name(),
            "Session offload rejected"
        ),
        Err(err @ (OffloadError::DeadlineExceeded(_) | OffloadError::Cancelled)) => {
            warn!("Session offload did not complete: {err}")
        }
        Err(err) => error!(code = ?err.code(), "Session offload failed: {err}"),
    }
}

/// Opens `addr` eagerly and runs the gRPC client flow against it.
///
/// Only a connection failure is returned as an error; it happens before
/// anything else is started.
pub async fn run_session_offload(
    addr: &str,
    rng: ChaCha8Rng,
    cancel: CancellationToken,
) -> Result<RunReport, OffloadError> {
    let connection = Connection::open(addr).await?;
    let session_table = GrpcSessionTable::new(connection.channel());
    let report = Coordinator::new(session_table, rng)
        .with_cancellation(cancel)
        .run(connection)
        .await;
    Ok(report)
}
