use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{panic_message, AlertSender, Backlog, BacklogGuard, Worker};
use crate::db::models::{AlertSeverity, PlayerStat};
use crate::provider::ProviderEvent;

pub const WRITE_QUEUE_CATEGORY: &str = "write_queue";

/// Grace period for the worker to exit after the drain wait.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// The closed set of storage mutations the writer knows how to apply.
#[derive(Debug, Clone)]
pub enum WriteCommand {
    /// Fast-cycle scoreboard poll results
    ApplyLiveSnapshot(Vec<ProviderEvent>),
    /// Multi-day schedule refresh results
    ApplySchedule(Vec<ProviderEvent>),
    /// Events re-resolved one by one against the provider
    ReconcileGames(Vec<ProviderEvent>),
    UpsertPlayerStats(Vec<PlayerStat>),
    /// Grading pass. `stats` were fetched ahead of time for prop wagers;
    /// `stats_fetched` names the games whose box score was received.
    GradeBets {
        stats: Vec<PlayerStat>,
        stats_fetched: Vec<String>,
    },
}

impl WriteCommand {
    pub fn label(&self) -> &'static str {
        match self {
            WriteCommand::ApplyLiveSnapshot(_) => "apply_live_snapshot",
            WriteCommand::ApplySchedule(_) => "apply_schedule",
            WriteCommand::ReconcileGames(_) => "reconcile_games",
            WriteCommand::UpsertPlayerStats(_) => "upsert_player_stats",
            WriteCommand::GradeBets { .. } => "grade_bets",
        }
    }
}

/// A queued write. Consumed exactly once by the worker; never persisted.
#[derive(Debug)]
pub struct WriteTask {
    pub name: String,
    pub command: WriteCommand,
    pub enqueued_at: Instant,
}

/// Applies write tasks to storage. Only the queue worker calls this.
#[async_trait]
pub trait WriteHandler: Send + Sync {
    async fn apply(&self, task: &WriteTask) -> anyhow::Result<()>;
}

#[derive(Default)]
struct Shared {
    backlog: Backlog,
    executed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub executed: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Cloneable producer handle.
#[derive(Clone)]
pub struct WriteSender {
    tx: mpsc::Sender<WriteTask>,
    shared: Arc<Shared>,
}

impl WriteSender {
    /// Queue a write without waiting. When the buffer is full the task is
    /// dropped with a warning and `false` is returned.
    pub fn enqueue(&self, name: &str, command: WriteCommand) -> bool {
        let task = WriteTask {
            name: name.to_string(),
            command,
            enqueued_at: Instant::now(),
        };
        self.shared.backlog.add();
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(TrySendError::Full(task)) | Err(TrySendError::Closed(task)) => {
                self.shared.backlog.done();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Write queue full: DROPPED task '{}' ({})",
                    task.name,
                    task.command.label()
                );
                false
            }
        }
    }
}

/// FIFO queue drained by a single background worker, so at most one storage
/// mutation is in flight at any time.
pub struct WriteQueue {
    tx: mpsc::Sender<WriteTask>,
    rx: Arc<Mutex<mpsc::Receiver<WriteTask>>>,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl WriteQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        WriteQueue {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            shared: Arc::new(Shared::default()),
            worker: None,
        }
    }

    pub fn sender(&self) -> WriteSender {
        WriteSender {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn enqueue(&self, name: &str, command: WriteCommand) -> bool {
        self.sender().enqueue(name, command)
    }

    /// Spawn the worker. Returns `false` if one is already running.
    pub fn start(&mut self, handler: Arc<dyn WriteHandler>, alerts: Option<AlertSender>) -> bool {
        if self.is_running() {
            return false;
        }
        let rx = Arc::clone(&self.rx);
        let shared = Arc::clone(&self.shared);
        self.worker = Some(Worker::spawn(move |shutdown| {
            run_worker(rx, handler, alerts, shared, shutdown)
        }));
        true
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().map(|w| !w.is_finished()).unwrap_or(false)
    }

    /// Tasks accepted but not yet finished
    pub fn pending(&self) -> usize {
        self.shared.backlog.len()
    }

    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        self.shared.backlog.wait_empty(timeout).await
    }

    /// Drain for up to `drain_timeout`, then stop the worker. Tasks still
    /// queued stay in the buffer and run if the queue is started again.
    pub async fn stop(&mut self, drain_timeout: Duration) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if !self.shared.backlog.wait_empty(drain_timeout).await {
            warn!(
                "Write queue not drained after {:?}: {} task(s) still pending",
                drain_timeout,
                self.pending()
            );
        }
        worker.shutdown("write queue", STOP_GRACE).await;
        let c = self.counts();
        info!(
            "Write queue stopped (executed={}, failed={}, dropped={})",
            c.executed, c.failed, c.dropped
        );
    }

    pub fn counts(&self) -> WriteCounts {
        WriteCounts {
            executed: self.shared.executed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    rx: Arc<Mutex<mpsc::Receiver<WriteTask>>>,
    handler: Arc<dyn WriteHandler>,
    alerts: Option<AlertSender>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rx = rx.lock().await;
    info!("Write queue worker started");

    loop {
        let task = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = rx.recv() => match next {
                Some(task) => task,
                None => break,
            },
        };
        let _finished = BacklogGuard(&shared.backlog);
        execute(handler.as_ref(), alerts.as_ref(), &shared, task).await;
    }

    info!("Write queue worker stopped");
}

async fn execute(
    handler: &dyn WriteHandler,
    alerts: Option<&AlertSender>,
    shared: &Shared,
    task: WriteTask,
) {
    debug!(
        "Write task '{}' ({}) started after {:?} queued",
        task.name,
        task.command.label(),
        task.enqueued_at.elapsed()
    );
    let started = Instant::now();

    let failure = match AssertUnwindSafe(handler.apply(&task)).catch_unwind().await {
        Ok(Ok(())) => {
            shared.executed.fetch_add(1, Ordering::Relaxed);
            debug!("Write task '{}' done in {:?}", task.name, started.elapsed());
            return;
        }
        Ok(Err(e)) => format!("{:#}", e),
        Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
    };

    shared.failed.fetch_add(1, Ordering::Relaxed);
    error!("Write task '{}' failed: {}", task.name, failure);
    if let Some(alerts) = alerts {
        alerts.enqueue(
            AlertSeverity::Error,
            WRITE_QUEUE_CATEGORY,
            format!("Write task '{}' failed: {}", task.name, failure),
            json!({ "task": task.name, "command": task.command.label(), "error": failure }),
        );
    }
}
