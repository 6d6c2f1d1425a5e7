use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::error::LauncherError;
use crate::hold::HoldMap;
use crate::launcher::WorkerLauncher;
use crate::protocol::ServiceId;
use crate::transport::NodeId;

/// Launches workers as local child processes of the master.
///
/// Suitable for single-host runs and tests. The spawned program is the
/// worker executable (normally the staged copy of the running program),
/// invoked with the `worker` subcommand.
pub struct LocalLauncher {
    program: PathBuf,
    log_dir: PathBuf,
    connection_timeout: Option<Duration>,
    hold_map: Option<HoldMap>,
}

const EXIT_GRACE: Duration = Duration::from_secs(5);

pub struct LocalJob {
    child: Child,
    service_id: ServiceId,
}

impl LocalLauncher {
    pub fn new(program: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            program,
            log_dir,
            connection_timeout: None,
            hold_map: None,
        }
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    pub fn with_hold_map(mut self, holds: HoldMap) -> Self {
        self.hold_map = Some(holds);
        self
    }
}

#[async_trait]
impl WorkerLauncher for LocalLauncher {
    type Job = LocalJob;

    async fn launch(
        &self,
        master: &NodeId,
        service_id: &ServiceId,
    ) -> Result<LocalJob, LauncherError> {
        std::fs::create_dir_all(&self.log_dir).map_err(LauncherError::Spawn)?;
        let log_file = self.log_dir.join(format!("worker-{service_id}.log"));

        let child = Command::new(&self.program)
            .arg("worker")
            .arg("--service")
            .arg(service_id.as_str())
            .arg("--master-address")
            .arg(master.as_str())
            .arg("--log-file")
            .arg(&log_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(LauncherError::Spawn)?;

        tracing::info!(
            service_id = %service_id,
            pid = child.id(),
            log = %log_file.display(),
            "launched local worker"
        );
        Ok(LocalJob {
            child,
            service_id: service_id.clone(),
        })
    }

    async fn reclaim(&self, mut job: LocalJob) {
        // The scope has already delivered ShutDown; give the worker a
        // moment to exit on its own before cancelling it.
        match tokio::time::timeout(EXIT_GRACE, job.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(service_id = %job.service_id, %status, "worker exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(service_id = %job.service_id, error = %e, "failed to await worker");
            }
            Err(_) => {
                tracing::warn!(service_id = %job.service_id, "worker still running, killing");
                if let Err(e) = job.child.kill().await {
                    tracing::warn!(service_id = %job.service_id, error = %e, "failed to kill worker");
                }
            }
        }
    }

    fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout
    }

    fn hold_map(&self) -> Option<&HoldMap> {
        self.hold_map.as_ref()
    }
}
