use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::closure::ClosureProcess;
use crate::error::{RemoteError, RemoteErrorKind, Result};
use crate::launcher::WorkerLauncher;
use crate::protocol::{ServiceId, TaskReply, TaskRequest, WorkerMessage};
use crate::runner::{MasterNode, Registration};
use crate::transport::{self, Connection, NodeId};

impl MasterNode {
    /// Bracket one worker's lifetime.
    ///
    /// Allocates a service id, launches a worker, awaits its registration
    /// (within the launcher's timeout, if any), acknowledges it, and runs
    /// `body` with the worker's node id. On every exit path the worker is
    /// sent exactly one `ShutDown`, the job handle is reclaimed, and the
    /// service id is unregistered.
    pub async fn with_service<L, F, Fut, T>(self: &Arc<Self>, launcher: &L, body: F) -> Result<T>
    where
        L: WorkerLauncher,
        F: FnOnce(NodeId, ServiceId) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (guard, rx) = self.services().register();
        let service_id = guard.id().clone();

        let job = launcher.launch(self.local_node(), &service_id).await?;
        let result = serve_scope(launcher.connection_timeout(), &service_id, rx, body).await;
        launcher.reclaim(job).await;
        drop(guard);
        result
    }

    /// Run remote closures on a freshly provisioned worker.
    ///
    /// `body` receives a [`RemoteRun`] whose `run` dispatches a closure
    /// and awaits its result. If the launcher carries a hold map, any
    /// remote failure parks the service id there and the whole scope is
    /// retried (fresh service id, fresh worker) after operator release;
    /// otherwise the failure propagates.
    pub async fn with_remote_run<L, F, Fut, T>(self: &Arc<Self>, launcher: &L, body: F) -> Result<T>
    where
        L: WorkerLauncher,
        F: Fn(RemoteRun) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            let attempt = self
                .with_service(launcher, |worker, service_id| {
                    body(RemoteRun {
                        node: Arc::clone(self),
                        worker,
                        service_id,
                        task_seq: AtomicU64::new(0),
                    })
                })
                .await;

            let err = match attempt {
                Ok(value) => return Ok(value),
                Err(crate::RemoraError::Remote(err)) => err,
                Err(other) => return Err(other),
            };

            let holds = match launcher.hold_map() {
                Some(holds) if !self.cancellation().is_cancelled() => holds,
                _ => return Err(err.into()),
            };

            tracing::error!(
                service_id = %err.service_id,
                error = %err,
                "remote failure, holding for operator release"
            );
            tokio::select! {
                _ = self.cancellation().cancelled() => {
                    return Err(RemoteError::new(err.service_id, RemoteErrorKind::AsyncCancelled).into());
                }
                _ = holds.block_until_released(&err.service_id) => {}
            }
            tracing::info!(service_id = %err.service_id, "hold released, retrying scope");
        }
    }
}

async fn serve_scope<F, Fut, T>(
    connection_timeout: Option<Duration>,
    service_id: &ServiceId,
    rx: mpsc::Receiver<Registration>,
    body: F,
) -> Result<T>
where
    F: FnOnce(NodeId, ServiceId) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let registration = await_worker(connection_timeout, service_id, rx).await?;
    let worker = registration.worker.clone();
    let mut control = WorkerControl::new(registration.control, service_id.clone());

    if let Err(e) = control.confirm().await {
        control.shutdown().await;
        return Err(RemoteError::new(
            service_id.clone(),
            RemoteErrorKind::AsyncLinkFailed(format!("handshake acknowledgement failed: {e}")),
        )
        .into());
    }
    tracing::info!(service_id = %service_id, worker = %worker, "worker connected");

    let result = body(worker, service_id.clone()).await;
    control.shutdown().await;
    result
}

/// Wait for the worker registered under `service_id`.
///
/// The deadline covers the whole wait: a stale registration carrying a
/// different id is logged and ignored without resetting the budget.
async fn await_worker(
    connection_timeout: Option<Duration>,
    service_id: &ServiceId,
    mut rx: mpsc::Receiver<Registration>,
) -> std::result::Result<Registration, RemoteError> {
    let deadline = connection_timeout.map(|t| Instant::now() + t);
    loop {
        let received = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(RemoteError::new(
                        service_id.clone(),
                        RemoteErrorKind::WorkerConnectionTimeout,
                    ))
                }
            },
            None => rx.recv().await,
        };
        let registration = received.ok_or_else(|| {
            RemoteError::new(
                service_id.clone(),
                RemoteErrorKind::AsyncLinkFailed("registration channel closed".to_string()),
            )
        })?;
        if registration.service_id != *service_id {
            tracing::warn!(
                expected = %service_id,
                received = %registration.service_id,
                "ignoring registration from stale worker"
            );
            continue;
        }
        return Ok(registration);
    }
}

/// The worker's control channel, guarded so that exactly one `ShutDown`
/// is delivered per scope.
///
/// Normal and error paths deliver it via [`shutdown`](Self::shutdown); if
/// the scope's future is dropped instead, the guard spawns the send so
/// the worker is still torn down. Send failures are logged, never raised.
struct WorkerControl {
    conn: Option<Connection>,
    service_id: ServiceId,
}

impl WorkerControl {
    fn new(conn: Connection, service_id: ServiceId) -> Self {
        Self {
            conn: Some(conn),
            service_id,
        }
    }

    async fn confirm(&mut self) -> std::result::Result<(), crate::error::TransportError> {
        match self.conn.as_mut() {
            Some(conn) => conn.send(&WorkerMessage::Connected).await,
            None => Ok(()),
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            match conn.send(&WorkerMessage::ShutDown).await {
                Ok(()) => tracing::debug!(service_id = %self.service_id, "shutdown delivered"),
                Err(e) => {
                    tracing::warn!(service_id = %self.service_id, error = %e, "failed to deliver shutdown");
                }
            }
        }
    }
}

impl Drop for WorkerControl {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let service_id = self.service_id.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    match conn.send(&WorkerMessage::ShutDown).await {
                        Ok(()) => {
                            tracing::debug!(service_id = %service_id, "shutdown delivered from scope guard");
                        }
                        Err(e) => {
                            tracing::warn!(service_id = %service_id, error = %e, "scope guard failed to deliver shutdown");
                        }
                    }
                });
            }
        }
    }
}

/// A connected worker, ready to execute closures.
pub struct RemoteRun {
    node: Arc<MasterNode>,
    worker: NodeId,
    service_id: ServiceId,
    task_seq: AtomicU64,
}

impl RemoteRun {
    pub fn worker(&self) -> &NodeId {
        &self.worker
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    /// Dispatch a closure to the worker and await its result.
    ///
    /// The closure is forced (memoised) first, then sent to the worker's
    /// node as an asynchronous task. Transport failures, remote errors,
    /// and cancellation of the master scope all surface as
    /// [`RemoteError`]s tagged with this scope's service id.
    pub async fn run<T>(&self, process: &ClosureProcess<T>) -> std::result::Result<T, RemoteError>
    where
        T: DeserializeOwned,
    {
        let fail = |kind| RemoteError::new(self.service_id.clone(), kind);

        let closure = process
            .force()
            .await
            .map_err(|e| fail(RemoteErrorKind::AsyncFailed(e.to_string())))?
            .clone();
        let task_id = self.task_seq.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            service_id = %self.service_id,
            worker = %self.worker,
            task_id,
            closure = %closure.id,
            "dispatching closure"
        );

        let dispatch = async {
            let mut conn = transport::connect(&self.worker)
                .await
                .map_err(|e| fail(RemoteErrorKind::AsyncFailed(e.to_string())))?;
            conn.send(&TaskRequest { task_id, closure })
                .await
                .map_err(|e| fail(RemoteErrorKind::AsyncFailed(e.to_string())))?;
            match conn.recv::<TaskReply>().await {
                Ok(reply) => Ok(reply),
                Err(crate::error::TransportError::Closed) => Err(fail(
                    RemoteErrorKind::AsyncLinkFailed("worker closed the task channel".to_string()),
                )),
                Err(e) => Err(fail(RemoteErrorKind::AsyncFailed(e.to_string()))),
            }
        };

        let reply = tokio::select! {
            _ = self.node.cancellation().cancelled() => {
                return Err(fail(RemoteErrorKind::AsyncCancelled));
            }
            reply = dispatch => reply?,
        };

        if reply.task_id != task_id {
            // A reply for some other dispatch; ours never completed.
            return Err(fail(RemoteErrorKind::AsyncPending));
        }
        match reply.outcome {
            Ok(bytes) => process
                .decode(&bytes)
                .map_err(|e| fail(RemoteErrorKind::AsyncFailed(e.to_string()))),
            Err(err) => Err(fail(RemoteErrorKind::Exception(err))),
        }
    }
}
