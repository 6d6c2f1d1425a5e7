use thiserror::Error;

use crate::protocol::ServiceId;

/// Failures local to the node transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no bindable port on {host} (tried {count} candidates, {first}..={last})")]
    PortBindExhausted {
        host: String,
        first: u16,
        last: u16,
        count: usize,
    },

    #[error("invalid node address: {0}")]
    InvalidAddress(String),

    #[error("frame of {0} bytes exceeds the transport limit")]
    FrameTooLarge(usize),

    #[error("connection closed by peer")]
    Closed,

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What went wrong with a remote dispatch, as seen from the master.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteErrorKind {
    #[error("async task failed: {0}")]
    AsyncFailed(String),

    #[error("link to worker failed: {0}")]
    AsyncLinkFailed(String),

    #[error("async task cancelled")]
    AsyncCancelled,

    #[error("async task still pending")]
    AsyncPending,

    #[error("remote exception: {0}")]
    Exception(String),

    #[error("worker never connected within the configured timeout")]
    WorkerConnectionTimeout,
}

/// A failure on a specific service scope. Carries the service id so the
/// hold coordinator can park the scope for operator inspection.
#[derive(Error, Debug)]
#[error("service {service_id}: {kind}")]
pub struct RemoteError {
    pub service_id: ServiceId,
    pub kind: RemoteErrorKind,
}

impl RemoteError {
    pub fn new(service_id: ServiceId, kind: RemoteErrorKind) -> Self {
        Self { service_id, kind }
    }
}

/// Failures raised by worker launchers (process spawn, batch submission).
#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(std::io::Error),

    #[error("batch submission failed: {0}")]
    Submission(String),
}

/// Failures on the worker side of the protocol.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("no acknowledgement from master after {attempts} handshake attempts")]
    HandshakeExhausted { attempts: u32 },

    #[error("no handshake reply within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("database format: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum RemoraError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("launcher error: {0}")]
    Launcher(#[from] LauncherError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("closure error: {0}")]
    Closure(#[from] crate::closure::ClosureError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RemoraError>;
