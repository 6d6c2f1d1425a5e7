//! Worker launchers: how workers come into existence.
//!
//! The remote runner is launcher-agnostic. Anything that can start one
//! worker process carrying `(master address, service id, log file)` on its
//! command line and later reclaim it can drive a computation: a local
//! fork for tests and single-host runs, a batch scheduler for clusters.

mod local;
mod slurm;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::LauncherError;
use crate::hold::HoldMap;
use crate::protocol::ServiceId;
use crate::transport::NodeId;

pub use local::{LocalJob, LocalLauncher};
pub use slurm::{SlurmJob, SlurmLauncher};

/// A capability to provision ephemeral workers.
///
/// Contract: `launch` starts exactly one worker process that will contact
/// `master` under `service_id`, and returns an opaque job handle while the
/// worker is running. `reclaim` is called once per launched job when the
/// service scope ends; by the time it returns, the launcher must either
/// have observed worker termination or have cancelled the job. The
/// launcher is not responsible for the handshake or for detecting a
/// silent worker.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Opaque handle for one launched worker (a child process, a batch
    /// job id, ...).
    type Job: Send + 'static;

    async fn launch(
        &self,
        master: &NodeId,
        service_id: &ServiceId,
    ) -> Result<Self::Job, LauncherError>;

    async fn reclaim(&self, job: Self::Job);

    /// How long the master waits for the worker's registration. `None`
    /// means wait forever.
    fn connection_timeout(&self) -> Option<Duration> {
        None
    }

    /// When present, remote failures park the service id here instead of
    /// propagating, and the scope retries after operator release.
    fn hold_map(&self) -> Option<&HoldMap> {
        None
    }
}
