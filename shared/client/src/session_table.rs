use async_trait::async_trait;
use offload_proto::{AddSessionResponse, SessionRequest, SessionTableClient};
use rand_chacha::ChaCha8Rng;
use tonic::transport::Channel;

use crate::background::{do_client_background, BackgroundSummary};
use crate::invoker::{do_sessionoffload, example_session};
use crate::{DeadlineContext, OffloadError};

/// The two calls a client run makes against the session table.
#[async_trait]
pub trait SessionOffload: Send + Sync + 'static {
    /// The synchronous, deadline-bound call.
    async fn offload_session(
        &self,
        ctx: &DeadlineContext,
    ) -> Result<AddSessionResponse, OffloadError>;

    /// The background unit. Not bound by any deadline.
    async fn background(&self, rng: ChaCha8Rng) -> Result<BackgroundSummary, OffloadError>;
}

/// [`SessionOffload`] over a tonic channel.
#[derive(Debug, Clone)]
pub struct GrpcSessionTable {
    client: SessionTableClient<Channel>,
    session: SessionRequest,
}

impl GrpcSessionTable {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: SessionTableClient::new(channel),
            session: example_session(1),
        }
    }

    /// Replaces the flow sent by [`SessionOffload::offload_session`].
    pub fn with_session(mut self, session: SessionRequest) -> Self {
        self.session = session;
        self
    }
}

#[async_trait]
impl SessionOffload for GrpcSessionTable {
    async fn offload_session(
        &self,
        ctx: &DeadlineContext,
    ) -> Result<AddSessionResponse, OffloadError> {
        let mut client = self.client.clone();
        do_sessionoffload(&mut client, ctx, self.session.clone()).await
    }

    async fn background(&self, mut rng: ChaCha8Rng) -> Result<BackgroundSummary, OffloadError> {
        let mut client = self.client.clone();
        do_client_background(&mut client, &mut rng).await
    }
}
