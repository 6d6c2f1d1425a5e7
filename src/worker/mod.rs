//! The worker process: dial home, execute closures, shut down on command.
//!
//! A worker is launched with the master's address and a service id on its
//! command line. It binds its own node, announces itself to the master,
//! and then serves closure invocations until the master delivers
//! `ShutDown` on the control channel. Closure execution and the control
//! channel share the node but never a connection.

use std::sync::Arc;
use std::time::Duration;

use crate::closure::ClosureRegistry;
use crate::config::WorkerConfig;
use crate::error::{TransportError, WorkerError};
use crate::protocol::{Register, TaskReply, TaskRequest, WorkerMessage};
use crate::transport::{self, Connection, NodeId, NodeTransport};

pub const HANDSHAKE_ATTEMPTS: u32 = 5;
pub const HANDSHAKE_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

const HANDSHAKE_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Run the worker protocol to completion.
///
/// Returns `Ok(())` only for a graceful `ShutDown`; every other outcome
/// is an error and the process should exit non-zero.
pub async fn run(config: WorkerConfig, registry: Arc<ClosureRegistry>) -> crate::Result<()> {
    log_environment();

    let transport = NodeTransport::bind(&config.bind_host, config.candidate_ports()).await?;
    let node_id = transport.local_node();
    tracing::info!(
        node = %node_id,
        service_id = %config.service_id,
        master = %config.master,
        "worker node bound"
    );

    // Serve closure invocations concurrently with the control channel.
    let tasks = tokio::spawn(serve_tasks(transport, registry));

    let result = async {
        let mut control = handshake(&config, &node_id).await?;
        tracing::info!(service_id = %config.service_id, "registered with master");

        match control.recv::<WorkerMessage>().await {
            Ok(WorkerMessage::ShutDown) => {
                tracing::info!(service_id = %config.service_id, "shutdown received, exiting");
                Ok(())
            }
            Ok(WorkerMessage::Connected) => Err(WorkerError::Protocol(
                "received a second handshake acknowledgement".to_string(),
            )),
            Err(e) => Err(WorkerError::Transport(e)),
        }
    }
    .await;

    tasks.abort();
    Ok(result?)
}

/// Announce this worker to the master: up to [`HANDSHAKE_ATTEMPTS`]
/// attempts, each waiting [`HANDSHAKE_REPLY_TIMEOUT`] for the
/// acknowledgement. The connection that receives `Connected` becomes the
/// control channel.
async fn handshake(config: &WorkerConfig, node_id: &NodeId) -> Result<Connection, WorkerError> {
    for attempt in 1..=HANDSHAKE_ATTEMPTS {
        match announce(config, node_id).await {
            Ok(control) => return Ok(control),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "handshake attempt failed");
            }
        }
        if attempt < HANDSHAKE_ATTEMPTS {
            tokio::time::sleep(HANDSHAKE_RETRY_PAUSE).await;
        }
    }
    Err(WorkerError::HandshakeExhausted {
        attempts: HANDSHAKE_ATTEMPTS,
    })
}

async fn announce(config: &WorkerConfig, node_id: &NodeId) -> Result<Connection, WorkerError> {
    let mut conn = transport::connect(&config.master).await?;
    conn.send(&Register {
        service_id: config.service_id.clone(),
        node_id: node_id.clone(),
    })
    .await?;

    match tokio::time::timeout(HANDSHAKE_REPLY_TIMEOUT, conn.recv::<WorkerMessage>()).await {
        Ok(Ok(WorkerMessage::Connected)) => Ok(conn),
        Ok(Ok(WorkerMessage::ShutDown)) => Err(WorkerError::Protocol(
            "shutdown before handshake acknowledgement".to_string(),
        )),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(WorkerError::HandshakeTimeout(HANDSHAKE_REPLY_TIMEOUT)),
    }
}

/// Accept task connections from the master and execute closures on them.
/// A connection serves dispatches sequentially; connections run
/// concurrently.
async fn serve_tasks(transport: NodeTransport, registry: Arc<ClosureRegistry>) {
    loop {
        match transport.accept().await {
            Ok((conn, peer)) => {
                tracing::debug!(peer = %peer, "task connection accepted");
                tokio::spawn(serve_connection(conn, registry.clone()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed on worker endpoint");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn serve_connection(mut conn: Connection, registry: Arc<ClosureRegistry>) {
    loop {
        let request: TaskRequest = match conn.recv().await {
            Ok(request) => request,
            Err(TransportError::Closed) => break,
            Err(e) => {
                tracing::debug!(error = %e, "task connection failed");
                break;
            }
        };
        tracing::debug!(
            task_id = request.task_id,
            closure = %request.closure.id,
            "executing closure"
        );
        let outcome = registry.invoke(request.closure).await;
        let reply = TaskReply {
            task_id: request.task_id,
            outcome,
        };
        if let Err(e) = conn.send(&reply).await {
            tracing::warn!(task_id = reply.task_id, error = %e, "failed to deliver task reply");
            break;
        }
    }
}

/// Workers dump their environment at startup so operators can reconstruct
/// what the launcher materialised.
fn log_environment() {
    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.sort();
    tracing::info!(count = vars.len(), "worker environment follows");
    for (key, value) in vars {
        tracing::debug!(target: "remora::env", "{key}={value}");
    }
}
