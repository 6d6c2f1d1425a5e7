//! Lifecycle driver: wires the master's components together and
//! guarantees their teardown around the user computation.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::closure::ClosureRegistry;
use crate::config::{MasterConfig, WorkerConfig};
use crate::db::{JsonDb, ProgramDb};
use crate::hold::{HoldMap, HoldServer};
use crate::runner::MasterNode;
use crate::shutdown;
use crate::transport::NodeTransport;

/// Everything a cluster computation gets to work with.
pub struct MasterContext {
    pub node: Arc<MasterNode>,
    pub hold_map: HoldMap,
    pub db: Arc<dyn ProgramDb>,
    pub config: MasterConfig,
    pub program_id: Uuid,
    pub cancel: CancellationToken,
    /// The executable launchers should start workers with: either the
    /// configured override or the staged copy of this program.
    pub worker_program: PathBuf,
}

/// Run a master: open the database, start the hold coordinator, bind the
/// master node, stage the worker executable, run `compute`, clean up.
pub async fn run_master<F, Fut, T>(config: MasterConfig, compute: F) -> crate::Result<T>
where
    F: FnOnce(MasterContext) -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let program_id = Uuid::new_v4();
    std::fs::create_dir_all(&config.work_dir)?;

    let db: Arc<dyn ProgramDb> = Arc::new(JsonDb::open(&config.db_path())?);
    let hold_map = HoldMap::new();
    let hold_server = HoldServer::start(hold_map.clone()).await?;

    let cancel = shutdown::install_shutdown_handler();
    let transport = NodeTransport::bind(&config.bind_host, config.candidate_ports()).await?;
    let node = MasterNode::start(transport, cancel.clone());

    tracing::info!(
        program_id = %program_id,
        pid = std::process::id(),
        master = %node.local_node(),
        hold_port = hold_server.port(),
        "master started"
    );
    db.put("program_id", &program_id.to_string())?;
    db.put("master_address", node.local_node().as_str())?;
    db.put("started_at", &Utc::now().to_rfc3339())?;

    let (worker_program, staged) = stage_worker_program(&config, program_id)?;

    let context = MasterContext {
        node,
        hold_map,
        db: db.clone(),
        config,
        program_id,
        cancel: cancel.clone(),
        worker_program: worker_program.clone(),
    };
    let result = compute(context).await;

    if staged {
        if let Err(e) = std::fs::remove_file(&worker_program) {
            tracing::warn!(path = %worker_program.display(), error = %e, "failed to remove staged executable");
        }
    }
    hold_server.stop();
    db.put("finished_at", &Utc::now().to_rfc3339())?;

    match &result {
        Ok(_) => tracing::info!(program_id = %program_id, "master computation finished"),
        Err(e) => tracing::error!(program_id = %program_id, error = %e, "master computation failed"),
    }
    result
}

/// Run a worker process to completion.
pub async fn run_worker(config: WorkerConfig, registry: Arc<ClosureRegistry>) -> crate::Result<()> {
    crate::worker::run(config, registry).await
}

/// Stage the executable workers will run. With a configured override
/// nothing is copied and nothing is cleaned up afterwards.
fn stage_worker_program(
    config: &MasterConfig,
    program_id: Uuid,
) -> std::io::Result<(PathBuf, bool)> {
    match &config.worker_command {
        Some(command) => Ok((command.clone(), false)),
        None => {
            let staged = config.work_dir.join(format!("program-{program_id}"));
            let current = std::env::current_exe()?;
            std::fs::copy(&current, &staged)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o755))?;
            }
            tracing::debug!(path = %staged.display(), "staged worker executable");
            Ok((staged, true))
        }
    }
}
