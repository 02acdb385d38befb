use std::time::Duration;
use thiserror::Error;
use tonic::Code;

#[derive(Error, Debug)]
pub enum OffloadError {
    #[error("did not connect to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),
}

impl OffloadError {
    /// Only connection failures end the process, everything else is reported and survived.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OffloadError::Connection { .. })
    }

    /// gRPC status code equivalent, used when logging.
    pub fn code(&self) -> Code {
        match self {
            OffloadError::Connection { .. } => Code::Unavailable,
            OffloadError::DeadlineExceeded(_) => Code::DeadlineExceeded,
            OffloadError::Cancelled => Code::Cancelled,
            OffloadError::Rpc(status) => status.code(),
        }
    }
}
