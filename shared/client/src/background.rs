use std::sync::Arc;
use std::time::Duration;

use offload_proto::{SessionRequestArgs, SessionTableClient};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinHandle;
use tonic::transport::Channel;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{CompletionToken, OffloadError, SessionOffload};

pub const MAX_JITTER: Duration = Duration::from_millis(250);
pub const MAX_PAGE_SIZE: u32 = 64;

/// Randomized shape of one background run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundPlan {
    pub jitter: Duration,
    pub page_size: u32,
}

impl BackgroundPlan {
    pub fn sample<R: Rng>(rng: &mut R) -> Self {
        let max_jitter_ms = MAX_JITTER.as_millis() as u64;
        Self {
            jitter: Duration::from_millis(rng.random_range(0..=max_jitter_ms)),
            page_size: rng.random_range(1..=MAX_PAGE_SIZE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundSummary {
    pub plan: BackgroundPlan,
    pub sessions: usize,
    pub closed: usize,
}

/// Reads one page of the session table after a random delay.
///
/// Runs in its own scope: no deadline, no cancellation.
pub async fn do_client_background(
    client: &mut SessionTableClient<Channel>,
    rng: &mut ChaCha8Rng,
) -> Result<BackgroundSummary, OffloadError> {
    let plan = BackgroundPlan::sample(rng);
    debug!(jitter = ?plan.jitter, page_size = plan.page_size, "Background plan");
    tokio::time::sleep(plan.jitter).await;

    let page = client
        .get_all_sessions(SessionRequestArgs {
            page_size: plan.page_size,
            page: 0,
            start_session: 0,
        })
        .await?
        .into_inner();

    Ok(BackgroundSummary {
        plan,
        sessions: page.session_info.len(),
        closed: page.closed_count(),
    })
}

/// Launches the background unit of `session_table` on the runtime.
///
/// `token` is released when the task ends, whatever the outcome, and only after
/// the task has let go of `session_table`. Failures are logged here and go no
/// further.
pub fn spawn_background<S>(
    session_table: Arc<S>,
    rng: ChaCha8Rng,
    token: CompletionToken,
) -> JoinHandle<()>
where
    S: SessionOffload + ?Sized,
{
    tokio::spawn(
        async move {
            match session_table.background(rng).await {
                Ok(summary) => info!(
                    sessions = summary.sessions,
                    closed = summary.closed,
                    page_size = summary.plan.page_size,
                    "Background run finished"
                ),
                Err(err) => warn!("Background run failed: {err}"),
            }
            drop(session_table);
            token.complete();
        }
        .instrument(info_span!("background")),
    )
}
