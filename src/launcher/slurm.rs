use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::LauncherError;
use crate::hold::HoldMap;
use crate::launcher::WorkerLauncher;
use crate::protocol::ServiceId;
use crate::transport::NodeId;

/// Launches workers through the Slurm batch scheduler.
///
/// Each worker is one `sbatch` submission wrapping the worker command
/// line; the job handle is the numeric Slurm job id, cancelled with
/// `scancel` on reclaim.
pub struct SlurmLauncher {
    program: PathBuf,
    log_dir: PathBuf,
    partition: Option<String>,
    sbatch_args: Vec<String>,
    connection_timeout: Option<Duration>,
    hold_map: Option<HoldMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlurmJob {
    pub job_id: u64,
}

impl SlurmLauncher {
    pub fn new(program: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            program,
            log_dir,
            partition: None,
            sbatch_args: Vec::new(),
            connection_timeout: None,
            hold_map: None,
        }
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    /// Extra flags passed through to `sbatch` verbatim.
    pub fn with_sbatch_args(mut self, args: Vec<String>) -> Self {
        self.sbatch_args = args;
        self
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
impl WorkerLauncher for SlurmLauncher {
    type Job = SlurmJob;

    async fn launch(
        &self,
        master: &NodeId,
        service_id: &ServiceId,
    ) -> Result<SlurmJob, LauncherError> {
        std::fs::create_dir_all(&self.log_dir).map_err(LauncherError::Spawn)?;
        let log_file = self.log_dir.join(format!("worker-{service_id}.log"));
        let batch_log = self.log_dir.join(format!("worker-{service_id}.sbatch.log"));

        let worker_cmd = format!(
            "{} worker --service {} --master-address {} --log-file {}",
            self.program.display(),
            service_id,
            master,
            log_file.display(),
        );

        let mut sbatch = Command::new("sbatch");
        sbatch
            .arg("--parsable")
            .arg(format!("--job-name=worker-{service_id}"))
            .arg(format!("--output={}", batch_log.display()));
        if let Some(partition) = &self.partition {
            sbatch.arg(format!("--partition={partition}"));
        }
        for arg in &self.sbatch_args {
            sbatch.arg(arg);
        }
        sbatch.arg(format!("--wrap={worker_cmd}"));

        let output = sbatch.output().await.map_err(LauncherError::Spawn)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(LauncherError::Submission(stderr));
        }

        // `--parsable` prints "<job id>" or "<job id>;<cluster>".
        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = stdout
            .trim()
            .split(';')
            .next()
            .and_then(|id| id.parse::<u64>().ok())
            .ok_or_else(|| {
                LauncherError::Submission(format!("unparsable sbatch output: {stdout:?}"))
            })?;

        tracing::info!(service_id = %service_id, job_id, "submitted worker batch job");
        Ok(SlurmJob { job_id })
    }

    async fn reclaim(&self, job: SlurmJob) {
        match Command::new("scancel")
            .arg(job.job_id.to_string())
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                tracing::debug!(job_id = job.job_id, "cancelled worker batch job");
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                tracing::warn!(job_id = job.job_id, error = %stderr, "scancel failed");
            }
            Err(e) => {
                tracing::warn!(job_id = job.job_id, error = %e, "failed to run scancel");
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
