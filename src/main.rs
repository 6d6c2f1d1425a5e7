use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use remora::closure::{ClosureRegistry, RemoteFn};
use remora::config::{MasterConfig, WorkerConfig};
use remora::driver;
use remora::launcher::{LocalLauncher, SlurmLauncher, WorkerLauncher};
use remora::protocol::ServiceId;
use remora::runner::MasterNode;

#[derive(Parser, Debug)]
#[command(name = "remora")]
#[command(about = "Remote execution on batch-scheduled clusters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a master program
    Master(MasterArgs),
    /// Run a worker; normally invoked only by a launcher
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
struct MasterArgs {
    /// Scratch directory for staged executables, logs and the database
    #[arg(long, default_value = "./remora-work")]
    work_dir: PathBuf,

    /// Master log file (stderr when omitted)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Host the master node binds and advertises
    #[arg(long, default_value = "127.0.0.1")]
    bind_host: String,

    /// Worker executable override; by default the master stages a copy of
    /// itself
    #[arg(long)]
    worker_command: Option<PathBuf>,

    /// Submit workers through Slurm instead of forking locally
    #[arg(long)]
    slurm: bool,

    /// Slurm partition for worker jobs
    #[arg(long)]
    partition: Option<String>,

    /// Seconds to wait for a worker to dial home (wait forever when
    /// omitted)
    #[arg(long)]
    connection_timeout: Option<u64>,
}

#[derive(Args, Debug)]
struct WorkerArgs {
    /// Service id allocated by the master
    #[arg(long)]
    service: String,

    /// Address of the master node
    #[arg(long)]
    master_address: String,

    /// Worker log file
    #[arg(long)]
    log_file: PathBuf,

    /// Host the worker node binds and advertises
    #[arg(long, default_value = "127.0.0.1")]
    bind_host: String,
}

/// The demo computation shipped with the binary: add one, remotely.
static ADD_ONE: RemoteFn<i64, i64> = RemoteFn::new("add_one");

fn build_registry() -> Arc<ClosureRegistry> {
    let mut registry = ClosureRegistry::new();
    registry.register("add_one", |x: i64| async move { Ok(x + 1) });
    registry.freeze()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Worker(args) => {
            init_logging(Some(&args.log_file))?;
            let mut config = WorkerConfig::new(
                ServiceId::new(args.service),
                args.master_address.parse()?,
            );
            config.bind_host = args.bind_host;
            driver::run_worker(config, build_registry()).await?;
        }
        Command::Master(args) => {
            init_logging(args.log_file.as_deref())?;
            let mut config = MasterConfig::new(args.work_dir);
            config.bind_host = args.bind_host;
            config.worker_command = args.worker_command;
            let timeout = args.connection_timeout.map(Duration::from_secs);
            let slurm = args.slurm;
            let partition = args.partition;

            let value = driver::run_master(config, |ctx| async move {
                let log_dir = ctx.config.log_dir();
                let program = ctx.worker_program.clone();
                if slurm {
                    let mut launcher = SlurmLauncher::new(program, log_dir)
                        .with_hold_map(ctx.hold_map.clone());
                    if let Some(partition) = partition {
                        launcher = launcher.with_partition(partition);
                    }
                    if let Some(timeout) = timeout {
                        launcher = launcher.with_connection_timeout(timeout);
                    }
                    add_one_remotely(&ctx.node, &launcher).await
                } else {
                    let mut launcher =
                        LocalLauncher::new(program, log_dir).with_hold_map(ctx.hold_map.clone());
                    if let Some(timeout) = timeout {
                        launcher = launcher.with_connection_timeout(timeout);
                    }
                    add_one_remotely(&ctx.node, &launcher).await
                }
            })
            .await?;
            tracing::info!(value, "remote computation returned");
        }
    }
    Ok(())
}

async fn add_one_remotely<L: WorkerLauncher>(
    node: &Arc<MasterNode>,
    launcher: &L,
) -> remora::Result<i64> {
    node.with_remote_run(launcher, |run| async move {
        let process = ADD_ONE.apply(41);
        Ok(run.run(&process).await?)
    })
    .await
}

fn init_logging(log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::File::options().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
