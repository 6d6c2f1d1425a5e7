use std::path::PathBuf;

use crate::protocol::ServiceId;
use crate::transport::{NodeId, DEFAULT_PORT_FIRST, DEFAULT_PORT_LAST};

/// Configuration for a master run.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Host the master's node binds and advertises.
    pub bind_host: String,
    /// Scratch directory: staged executable, worker logs, program database.
    pub work_dir: PathBuf,
    /// Program database location; defaults to `<work_dir>/program-db.json`.
    pub db_path: Option<PathBuf>,
    /// Worker executable override. When unset the master stages a copy of
    /// its own executable in `work_dir` and removes it on completion.
    pub worker_command: Option<PathBuf>,
    /// Candidate port range for the master node, bounds inclusive.
    pub port_first: u16,
    pub port_last: u16,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            work_dir: PathBuf::from("./remora-work"),
            db_path: None,
            worker_command: None,
            port_first: DEFAULT_PORT_FIRST,
            port_last: DEFAULT_PORT_LAST,
        }
    }
}

impl MasterConfig {
    pub fn new(work_dir: PathBuf) -> Self {
        Self {
            work_dir,
            ..Default::default()
        }
    }

    pub fn with_worker_command(mut self, command: PathBuf) -> Self {
        self.worker_command = Some(command);
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.work_dir.join("program-db.json"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    pub fn candidate_ports(&self) -> impl Iterator<Item = u16> {
        self.port_first..=self.port_last
    }
}

/// Configuration for one worker process, normally assembled from the
/// command line the launcher passed.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub service_id: ServiceId,
    pub master: NodeId,
    /// Host the worker's node binds and advertises. Launchers pass the
    /// worker host's name when workers run off the master's machine.
    pub bind_host: String,
    pub port_first: u16,
    pub port_last: u16,
}

impl WorkerConfig {
    pub fn new(service_id: ServiceId, master: NodeId) -> Self {
        Self {
            service_id,
            master,
            bind_host: "127.0.0.1".to_string(),
            port_first: DEFAULT_PORT_FIRST,
            port_last: DEFAULT_PORT_LAST,
        }
    }

    pub fn candidate_ports(&self) -> impl Iterator<Item = u16> {
        self.port_first..=self.port_last
    }
}
