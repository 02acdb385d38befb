use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use offload_client::proto::{
    AddSessionResponse, RequestStatus, SessionRequest, SessionRequestArgs, SessionResponse,
    SessionResponses, SessionState, SessionTable, SessionTableServer,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Code, Request, Response, Status};
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// How the stub answers one RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubBehavior {
    Immediate,
    Delay(Duration),
    /// Never answers.
    Never,
    Fail(Code),
}

impl StubBehavior {
    async fn apply(self) -> Result<(), Status> {
        match self {
            StubBehavior::Immediate => Ok(()),
            StubBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            StubBehavior::Never => std::future::pending().await,
            StubBehavior::Fail(code) => Err(Status::new(code, "scripted failure")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StubConfig {
    pub add_session: StubBehavior,
    pub get_all_sessions: StubBehavior,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            add_session: StubBehavior::Immediate,
            get_all_sessions: StubBehavior::Immediate,
        }
    }
}

impl StubConfig {
    pub fn with_add_session(mut self, behavior: StubBehavior) -> Self {
        self.add_session = behavior;
        self
    }

    pub fn with_get_all_sessions(mut self, behavior: StubBehavior) -> Self {
        self.get_all_sessions = behavior;
        self
    }
}

#[derive(Debug, Default)]
pub struct CallCounts {
    add_session: AtomicUsize,
    get_all_sessions: AtomicUsize,
}

impl CallCounts {
    pub fn add_session(&self) -> usize {
        self.add_session.load(Ordering::SeqCst)
    }

    pub fn get_all_sessions(&self) -> usize {
        self.get_all_sessions.load(Ordering::SeqCst)
    }
}

struct StubSessionTable {
    config: StubConfig,
    calls: Arc<CallCounts>,
    sessions: Mutex<Vec<SessionRequest>>,
}

#[tonic::async_trait]
impl SessionTable for StubSessionTable {
    async fn add_session(
        &self,
        request: Request<SessionRequest>,
    ) -> Result<Response<AddSessionResponse>, Status> {
        self.calls.add_session.fetch_add(1, Ordering::SeqCst);
        let session = request.into_inner();
        debug!(session_id = session.session_id, "stub: AddSession");
        self.config.add_session.apply().await?;

        let mut sessions = self.sessions.lock().await;
        let status = if sessions.iter().any(|s| s.session_id == session.session_id) {
            RequestStatus::RejectedSessionAlreadyExists
        } else {
            sessions.push(session.clone());
            RequestStatus::Accepted
        };

        let mut response = AddSessionResponse {
            session_id: session.session_id,
            start_time_ms: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        };
        response.set_request_status(status);
        Ok(Response::new(response))
    }

    async fn get_all_sessions(
        &self,
        request: Request<SessionRequestArgs>,
    ) -> Result<Response<SessionResponses>, Status> {
        self.calls.get_all_sessions.fetch_add(1, Ordering::SeqCst);
        let args = request.into_inner();
        debug!(page_size = args.page_size, "stub: GetAllSessions");
        self.config.get_all_sessions.apply().await?;

        if args.page_size == 0 {
            return Err(Status::invalid_argument("page_size must be positive"));
        }
        let page_size = args.page_size as usize;
        let sessions = self.sessions.lock().await;
        let page: Vec<_> = sessions
            .iter()
            .filter(|s| s.session_id >= args.start_session)
            .skip(args.page as usize * page_size)
            .take(page_size + 1)
            .collect();

        let next_key = if page.len() > page_size {
            page[page_size].session_id
        } else {
            0
        };
        let session_info = page
            .iter()
            .take(page_size)
            .map(|s| {
                let mut info = SessionResponse {
                    session_id: s.session_id,
                    ..Default::default()
                };
                info.set_session_state(SessionState::Established);
                info
            })
            .collect();

        Ok(Response::new(SessionResponses {
            session_info,
            next_key,
        }))
    }
}

/// A scripted session table served on an ephemeral local port.
pub struct StubServerHandle {
    addr: SocketAddr,
    calls: Arc<CallCounts>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl StubServerHandle {
    pub async fn spawn(config: StubConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind stub server")?;
        let addr = listener.local_addr()?;
        let calls = Arc::new(CallCounts::default());
        let cancel = CancellationToken::new();

        let service = SessionTableServer::new(StubSessionTable {
            config,
            calls: calls.clone(),
            sessions: Mutex::new(Vec::new()),
        });
        let shutdown = cancel.clone();
        let handle = tokio::spawn(
            Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    shutdown.cancelled().await
                }),
        );

        info!("Stub session table listening on {addr}");
        Ok(Self {
            addr,
            calls,
            cancel,
            handle,
        })
    }

    pub async fn default() -> Result<Self> {
        Self::spawn(StubConfig::default()).await
    }

    /// `host:port`, the way the CLI takes it.
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn calls(&self) -> Arc<CallCounts> {
        self.calls.clone()
    }

    /// Stops serving. Requests that never finish are cut off after a short grace period.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut self.handle).await {
            Ok(res) => res?.context("stub server failed")?,
            Err(_) => {
                warn!("Stub server still busy after {SHUTDOWN_GRACE:?}, aborting");
                self.handle.abort();
            }
        }
        Ok(())
    }
}
