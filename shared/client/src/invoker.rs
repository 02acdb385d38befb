use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use offload_proto::{
    ActionType, AddSessionResponse, ProtocolId, SessionRequest, SessionTableClient,
};
use tonic::transport::Channel;
use tonic::Code;
use tracing::debug;

use crate::{DeadlineContext, OffloadError};

const EXAMPLE_CACHE_TIMEOUT_SECS: u32 = 30;

/// The flow offloaded by the example client: a TCP connection from
/// 10.0.0.1:4430 to 10.0.0.2:80, forwarded in the fast path.
pub fn example_session(session_id: u64) -> SessionRequest {
    SessionRequest::new(
        session_id,
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 4430)),
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 80)),
        ProtocolId::Tcp,
        ActionType::Forward,
    )
    .with_cache_timeout(EXAMPLE_CACHE_TIMEOUT_SECS)
}

/// Sends one `AddSession` and waits for its answer within `ctx`.
///
/// The remaining budget travels with the request as `grpc-timeout`, so the
/// server can give up at the same time we do. Nothing is sent when `ctx` is
/// already expired or cancelled.
pub async fn do_sessionoffload(
    client: &mut SessionTableClient<Channel>,
    ctx: &DeadlineContext,
    session: SessionRequest,
) -> Result<AddSessionResponse, OffloadError> {
    ctx.run(async {
        let mut request = tonic::Request::new(session);
        request.set_timeout(ctx.remaining());
        debug!(
            session_id = request.get_ref().session_id,
            budget = ?ctx.remaining(),
            "Sending AddSession"
        );
        let response = client
            .add_session(request)
            .await
            .map_err(|status| classify(status, ctx))?;
        Ok(response.into_inner())
    })
    .await
}

// the transport can beat our own timer to reporting an expired budget
fn classify(status: tonic::Status, ctx: &DeadlineContext) -> OffloadError {
    if status.code() == Code::DeadlineExceeded || ctx.is_expired() {
        OffloadError::DeadlineExceeded(ctx.timeout())
    } else {
        OffloadError::Rpc(status)
    }
}
