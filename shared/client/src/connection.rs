use std::fmt;
use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::OffloadError;

pub const DEFAULT_ADDR: &str = "localhost:50151";

/// Upper bound on dialing the endpoint in [`Connection::open`].
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type CloseHook = Box<dyn FnOnce(&str) + Send + 'static>;

/// The single outbound channel of a client run.
///
/// Users get cheap clones through [`Connection::channel`]. The connection is
/// released exactly once: on [`Connection::close`] or, on any other exit path,
/// when it is dropped.
///
/// Releasing drops the owned [`Channel`] handle and runs the close hook. The
/// transport itself shuts down once the last clone is gone, so clones still
/// held elsewhere keep working. Callers close only after every user of the
/// channel has finished.
pub struct Connection {
    target: String,
    channel: Channel,
    closed: bool,
    on_close: Option<CloseHook>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Dials `addr` over plaintext HTTP/2 and waits for the transport to be up.
    ///
    /// Fails fast with [`OffloadError::Connection`] for malformed addresses and
    /// for endpoints nobody listens on.
    pub async fn open(addr: &str) -> Result<Self, OffloadError> {
        let target = normalize_target(addr);
        debug!("Dialing {target}");
        let channel = endpoint(addr, &target)?
            .connect()
            .await
            .map_err(|source| OffloadError::Connection {
                addr: addr.to_string(),
                source,
            })?;
        info!("Connected to {target}");
        Ok(Self::from_channel(target, channel))
    }

    /// Like [`Connection::open`] but without dialing: an unreachable endpoint
    /// only shows up as an `Unavailable` status on the first request.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open_lazy(addr: &str) -> Result<Self, OffloadError> {
        let target = normalize_target(addr);
        let channel = endpoint(addr, &target)?.connect_lazy();
        info!("Lazily connecting to {target}");
        Ok(Self::from_channel(target, channel))
    }

    fn from_channel(target: String, channel: Channel) -> Self {
        Self {
            target,
            channel,
            closed: false,
            on_close: None,
        }
    }

    /// Registers a callback that runs once, when the connection is released.
    pub fn on_close(mut self, hook: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!("Closing connection to {}", self.target);
        if let Some(hook) = self.on_close.take() {
            hook(&self.target);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}

/// `host:port` without a scheme is taken as plaintext `http://host:port`.
pub fn normalize_target(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

fn endpoint(addr: &str, target: &str) -> Result<Endpoint, OffloadError> {
    Endpoint::from_shared(target.to_string())
        .map(|e| e.connect_timeout(CONNECT_TIMEOUT))
        .map_err(|source| OffloadError::Connection {
            addr: addr.to_string(),
            source,
        })
}
