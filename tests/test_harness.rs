//! Test harness for master/worker integration tests.
//!
//! Workers run in-process as tokio tasks speaking the real wire protocol
//! over loopback TCP, so tests exercise registration, dispatch and
//! shutdown without forking subprocesses.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use remora::closure::ClosureRegistry;
use remora::config::WorkerConfig;
use remora::error::LauncherError;
use remora::hold::HoldMap;
use remora::launcher::WorkerLauncher;
use remora::protocol::{Register, ServiceId, WorkerMessage};
use remora::runner::MasterNode;
use remora::transport::{self, NodeId, NodeTransport};

/// Start a master node on an ephemeral loopback port.
pub async fn start_master() -> (Arc<MasterNode>, CancellationToken) {
    let transport = NodeTransport::bind("127.0.0.1", [0])
        .await
        .expect("master bind");
    let cancel = CancellationToken::new();
    (MasterNode::start(transport, cancel.clone()), cancel)
}

/// Registry used by most tests: a well-behaved closure, an always-failing
/// one, one that fails on first invocation only, and a slow one.
pub fn test_registry() -> (Arc<ClosureRegistry>, Arc<AtomicUsize>) {
    let flaky_calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ClosureRegistry::new();

    registry.register("add_one", |x: i64| async move { Ok(x + 1) });
    registry.register("boom", |_: ()| async move { Err::<i64, _>("boom".to_string()) });
    let calls = flaky_calls.clone();
    registry.register("flaky", move |x: i64| {
        let calls = calls.clone();
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("boom".to_string())
            } else {
                Ok(x + 1)
            }
        }
    });
    registry.register("sleepy", |secs: u64| async move {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        Ok(secs)
    });

    (registry.freeze(), flaky_calls)
}

/// Launches workers as in-process tokio tasks.
pub struct InProcessLauncher {
    registry: Arc<ClosureRegistry>,
    connection_timeout: Option<Duration>,
    hold_map: Option<HoldMap>,
    /// `true` per reclaimed worker that exited cleanly after `ShutDown`.
    pub clean_exits: Arc<Mutex<Vec<bool>>>,
}

pub struct InProcessJob {
    handle: JoinHandle<remora::Result<()>>,
}

impl InProcessLauncher {
    pub fn new(registry: Arc<ClosureRegistry>) -> Self {
        Self {
            registry,
            connection_timeout: None,
            hold_map: None,
            clean_exits: Arc::new(Mutex::new(Vec::new())),
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
impl WorkerLauncher for InProcessLauncher {
    type Job = InProcessJob;

    async fn launch(
        &self,
        master: &NodeId,
        service_id: &ServiceId,
    ) -> Result<InProcessJob, LauncherError> {
        let mut config = WorkerConfig::new(service_id.clone(), master.clone());
        config.port_first = 0;
        config.port_last = 0;
        let registry = self.registry.clone();
        let handle = tokio::spawn(remora::worker::run(config, registry));
        Ok(InProcessJob { handle })
    }

    async fn reclaim(&self, job: InProcessJob) {
        let clean = match tokio::time::timeout(Duration::from_secs(2), job.handle).await {
            Ok(Ok(Ok(()))) => true,
            Ok(_) => false,
            Err(_) => false,
        };
        self.clean_exits.lock().push(clean);
    }

    fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout
    }

    fn hold_map(&self) -> Option<&HoldMap> {
        self.hold_map.as_ref()
    }
}

/// A launcher that starts nothing: the worker never dials home.
pub struct NullLauncher {
    connection_timeout: Option<Duration>,
}

impl NullLauncher {
    pub fn new(connection_timeout: Duration) -> Self {
        Self {
            connection_timeout: Some(connection_timeout),
        }
    }
}

#[async_trait]
impl WorkerLauncher for NullLauncher {
    type Job = ();

    async fn launch(&self, _master: &NodeId, _service_id: &ServiceId) -> Result<(), LauncherError> {
        Ok(())
    }

    async fn reclaim(&self, _job: ()) {}

    fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout
    }
}

/// A scripted worker that registers with the master and records every
/// control message it receives afterwards. It never serves tasks.
pub struct ScriptedWorker {
    pub messages: Arc<Mutex<Vec<WorkerMessage>>>,
}

impl ScriptedWorker {
    /// Connect, register under `service_id`, await the acknowledgement,
    /// then record control messages until the channel closes.
    pub fn spawn(master: NodeId, service_id: ServiceId) -> Self {
        let messages: Arc<Mutex<Vec<WorkerMessage>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = messages.clone();
        tokio::spawn(async move {
            let transport = NodeTransport::bind("127.0.0.1", [0]).await.expect("bind");
            let mut control = transport::connect(&master).await.expect("connect");
            control
                .send(&Register {
                    service_id,
                    node_id: transport.local_node(),
                })
                .await
                .expect("register");
            assert_eq!(
                control.recv::<WorkerMessage>().await.expect("ack"),
                WorkerMessage::Connected
            );
            while let Ok(msg) = control.recv::<WorkerMessage>().await {
                seen.lock().push(msg);
            }
        });
        Self { messages }
    }

    pub fn shutdown_count(&self) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| **m == WorkerMessage::ShutDown)
            .count()
    }
}

/// A launcher backed by [`ScriptedWorker`]s, recording each one.
pub struct ScriptedLauncher {
    pub workers: Arc<Mutex<Vec<ScriptedWorker>>>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self {
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn total_shutdowns(&self) -> usize {
        self.workers.lock().iter().map(|w| w.shutdown_count()).sum()
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedLauncher {
    type Job = ();

    async fn launch(&self, master: &NodeId, service_id: &ServiceId) -> Result<(), LauncherError> {
        let worker = ScriptedWorker::spawn(master.clone(), service_id.clone());
        self.workers.lock().push(worker);
        Ok(())
    }

    async fn reclaim(&self, _job: ()) {}
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn assert_eventually<F, Fut>(condition: F, timeout: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("{message}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
