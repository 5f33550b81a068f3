use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{Backlog, BacklogGuard, Worker};
use crate::db::models::{AlertSeverity, NewAlert};
use crate::error::{StoreError, StoreResult};
use crate::lifecycle::GAME_LIVE_CATEGORY;

/// Metadata field that identifies the game of a `game_live` alert.
pub const LIVE_DEDUP_FIELD: &str = "game_id";

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Where alerts end up. Implemented by [`crate::db::Database`].
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Whether an unacknowledged alert of `category` has `metadata.<field> == key`.
    async fn has_unacknowledged(&self, category: &str, field: &str, key: &str)
        -> StoreResult<bool>;

    async fn persist(&self, alert: &NewAlert) -> StoreResult<i64>;
}

#[derive(Debug, Clone)]
pub struct AlertTask {
    pub alert: NewAlert,
    pub enqueued_at: Instant,
}

/// Retry schedule for transient lock failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay before the `retry`-th retry (1-based): `base * 2^(retry-1)` plus
    /// jitter in `[0, base/2)`, so consecutive delays strictly increase.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << retry.saturating_sub(1).min(20));
        let jitter = if base >= 2 {
            rand::thread_rng().gen_range(0..base / 2)
        } else {
            0
        };
        Duration::from_millis(exp.saturating_add(jitter))
    }
}

#[derive(Default)]
struct Shared {
    backlog: Backlog,
    persisted: AtomicU64,
    suppressed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertCounts {
    pub persisted: u64,
    /// Skipped as duplicates of an unacknowledged alert
    pub suppressed: u64,
    /// Given up on after a non-transient error or exhausted retries
    pub dropped: u64,
}

/// Cloneable producer handle. Never blocks, never drops on enqueue.
#[derive(Clone)]
pub struct AlertSender {
    tx: mpsc::UnboundedSender<AlertTask>,
    shared: Arc<Shared>,
}

impl AlertSender {
    pub fn enqueue(
        &self,
        severity: AlertSeverity,
        category: &str,
        message: impl Into<String>,
        metadata: Value,
    ) -> bool {
        self.send(NewAlert {
            severity,
            category: category.to_string(),
            message: message.into(),
            metadata,
        })
    }

    pub fn send(&self, alert: NewAlert) -> bool {
        self.shared.backlog.add();
        let task = AlertTask {
            alert,
            enqueued_at: Instant::now(),
        };
        match self.tx.send(task) {
            Ok(()) => true,
            Err(e) => {
                self.shared.backlog.done();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Alert queue closed, dropping [{}] alert", e.0.alert.category);
                false
            }
        }
    }
}

/// Unbounded alert queue with one persisting worker.
pub struct AlertQueue {
    tx: mpsc::UnboundedSender<AlertTask>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<AlertTask>>>,
    shared: Arc<Shared>,
    policy: RetryPolicy,
    worker: Option<Worker>,
}

impl AlertQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        AlertQueue {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            shared: Arc::new(Shared::default()),
            policy,
            worker: None,
        }
    }

    pub fn sender(&self) -> AlertSender {
        AlertSender {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn enqueue(
        &self,
        severity: AlertSeverity,
        category: &str,
        message: impl Into<String>,
        metadata: Value,
    ) -> bool {
        self.sender().enqueue(severity, category, message, metadata)
    }

    /// Spawn the worker. Returns `false` if one is already running.
    pub fn start(&mut self, sink: Arc<dyn AlertSink>) -> bool {
        if self.is_running() {
            return false;
        }
        let rx = Arc::clone(&self.rx);
        let shared = Arc::clone(&self.shared);
        let policy = self.policy.clone();
        self.worker = Some(Worker::spawn(move |shutdown| {
            run_worker(rx, sink, policy, shared, shutdown)
        }));
        true
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().map(|w| !w.is_finished()).unwrap_or(false)
    }

    pub fn pending(&self) -> usize {
        self.shared.backlog.len()
    }

    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        self.shared.backlog.wait_empty(timeout).await
    }

    pub async fn stop(&mut self, drain_timeout: Duration) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if !self.shared.backlog.wait_empty(drain_timeout).await {
            warn!(
                "Alert queue not drained after {:?}: {} alert(s) still pending",
                drain_timeout,
                self.pending()
            );
        }
        worker.shutdown("alert queue", STOP_GRACE).await;
        let c = self.counts();
        info!(
            "Alert queue stopped (persisted={}, suppressed={}, dropped={})",
            c.persisted, c.suppressed, c.dropped
        );
    }

    pub fn counts(&self) -> AlertCounts {
        AlertCounts {
            persisted: self.shared.persisted.load(Ordering::Relaxed),
            suppressed: self.shared.suppressed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    rx: Arc<Mutex<mpsc::UnboundedReceiver<AlertTask>>>,
    sink: Arc<dyn AlertSink>,
    policy: RetryPolicy,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rx = rx.lock().await;
    info!("Alert queue worker started");

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
        deliver(sink.as_ref(), &policy, &shared, task).await;
    }

    info!("Alert queue worker stopped");
}

enum Delivery {
    Persisted(i64),
    Suppressed,
}

/// `game_live` alerts are keyed by the game id in their metadata.
fn dedup_key(alert: &NewAlert) -> Option<String> {
    if alert.category != GAME_LIVE_CATEGORY {
        return None;
    }
    match &alert.metadata[LIVE_DEDUP_FIELD] {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

async fn attempt(sink: &dyn AlertSink, alert: &NewAlert) -> StoreResult<Delivery> {
    if let Some(key) = dedup_key(alert) {
        if sink
            .has_unacknowledged(&alert.category, LIVE_DEDUP_FIELD, &key)
            .await?
        {
            return Ok(Delivery::Suppressed);
        }
    }
    Ok(Delivery::Persisted(sink.persist(alert).await?))
}

async fn deliver(sink: &dyn AlertSink, policy: &RetryPolicy, shared: &Shared, task: AlertTask) {
    let alert = &task.alert;
    let mut retry = 0u32;

    loop {
        let err: StoreError = match attempt(sink, alert).await {
            Ok(Delivery::Persisted(id)) => {
                shared.persisted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Alert #{} [{}] persisted after {:?}",
                    id,
                    alert.category,
                    task.enqueued_at.elapsed()
                );
                return;
            }
            Ok(Delivery::Suppressed) => {
                shared.suppressed.fetch_add(1, Ordering::Relaxed);
                debug!("Duplicate [{}] alert suppressed: {}", alert.category, alert.message);
                return;
            }
            Err(e) => e,
        };

        if err.is_transient_lock() && retry < policy.max_retries {
            retry += 1;
            let delay = policy.delay_for(retry);
            warn!(
                "Alert [{}] hit a locked database, retry {}/{} in {:?}",
                alert.category, retry, policy.max_retries, delay
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        shared.dropped.fetch_add(1, Ordering::Relaxed);
        error!(
            "Dropping [{}] alert after {} retries: {} ({})",
            alert.category, retry, err, alert.message
        );
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn live(game_id: &str) -> NewAlert {
        NewAlert {
            severity: AlertSeverity::Info,
            category: GAME_LIVE_CATEGORY.into(),
            message: format!("game {} live", game_id),
            metadata: json!({ "game_id": game_id }),
        }
    }

    #[tokio::test]
    async fn test_live_alerts_deduplicated_until_acknowledged() {
        let db = Database::open_in_memory().unwrap();
        let mut queue = AlertQueue::new(RetryPolicy::default());
        queue.start(Arc::new(db.clone()));

        let sender = queue.sender();
        sender.send(live("401"));
        sender.send(live("401"));
        sender.send(live("402"));
        assert!(queue.wait_empty(Duration::from_secs(5)).await);

        let alerts = db.with_session(|s| s.list_alerts(10, true)).unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(queue.counts().suppressed, 1);

        let first = alerts.iter().find(|a| a.metadata["game_id"] == "401").unwrap();
        db.with_session(|s| s.acknowledge_alert(first.id)).unwrap();
        sender.send(live("401"));
        assert!(queue.wait_empty(Duration::from_secs(5)).await);
        assert_eq!(queue.counts().persisted, 3);

        queue.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_other_categories_are_not_deduplicated() {
        let db = Database::open_in_memory().unwrap();
        let mut queue = AlertQueue::new(RetryPolicy::default());
        queue.start(Arc::new(db.clone()));

        for _ in 0..2 {
            queue.enqueue(AlertSeverity::Warning, "scraper", "nba fetch failed", json!({ "game_id": "1" }));
        }
        assert!(queue.wait_empty(Duration::from_secs(5)).await);
        assert_eq!(db.with_session(|s| s.list_alerts(10, false)).unwrap().len(), 2);
        queue.stop(Duration::from_secs(1)).await;
    }

    /// Fails with the scripted errors, then succeeds.
    struct ScriptedSink {
        failures: StdMutex<Vec<StoreError>>,
        calls: StdMutex<Vec<Instant>>,
    }

    impl ScriptedSink {
        fn new(failures: Vec<StoreError>) -> Self {
            ScriptedSink {
                failures: StdMutex::new(failures),
                calls: StdMutex::new(vec![]),
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertSink for ScriptedSink {
        async fn has_unacknowledged(&self, _: &str, _: &str, _: &str) -> StoreResult<bool> {
            Ok(false)
        }

        async fn persist(&self, _alert: &NewAlert) -> StoreResult<i64> {
            self.calls.lock().unwrap().push(Instant::now());
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                Ok(1)
            } else {
                Err(failures.remove(0))
            }
        }
    }

    fn locked(n: usize) -> Vec<StoreError> {
        (0..n).map(|_| StoreError::Locked("database is locked".into())).collect()
    }

    #[tokio::test]
    async fn test_transient_failures_bounded_by_max_retries() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(4),
        };
        let sink = Arc::new(ScriptedSink::new(locked(100)));
        let mut queue = AlertQueue::new(policy.clone());
        queue.start(sink.clone());

        queue.enqueue(AlertSeverity::Error, "scheduler", "boom", json!({}));
        assert!(queue.wait_empty(Duration::from_secs(5)).await);

        let calls = sink.calls();
        assert_eq!(calls.len(), 4);
        for (i, pair) in calls.windows(2).enumerate() {
            let floor = policy.base_delay * 2u32.pow(i as u32);
            assert!(pair[1] - pair[0] >= floor, "retry {} waited less than {:?}", i + 1, floor);
        }
        assert_eq!(queue.counts().dropped, 1);
        assert_eq!(queue.counts().persisted, 0);
        queue.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let sink = Arc::new(ScriptedSink::new(locked(2)));
        let mut queue = AlertQueue::new(RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(2),
        });
        queue.start(sink.clone());

        queue.enqueue(AlertSeverity::Info, "grading", "graded", json!({}));
        assert!(queue.wait_empty(Duration::from_secs(5)).await);
        assert_eq!(sink.calls().len(), 3);
        assert_eq!(queue.counts().persisted, 1);
        queue.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_non_transient_failure_is_not_retried() {
        let sink = Arc::new(ScriptedSink::new(vec![StoreError::Invalid("bad".into())]));
        let mut queue = AlertQueue::new(RetryPolicy::default());
        queue.start(sink.clone());

        queue.enqueue(AlertSeverity::Info, "grading", "graded", json!({}));
        queue.enqueue(AlertSeverity::Info, "grading", "graded again", json!({}));
        assert!(queue.wait_empty(Duration::from_secs(5)).await);
        assert_eq!(sink.calls().len(), 2);
        assert_eq!(queue.counts(), AlertCounts { persisted: 1, suppressed: 0, dropped: 1 });
        queue.stop(Duration::from_secs(1)).await;
    }

    #[test]
    fn test_retry_delays_strictly_increase() {
        let policy = RetryPolicy {
            max_retries: 8,
            base_delay: Duration::from_millis(100),
        };
        for _ in 0..50 {
            let delays: Vec<Duration> = (1..=policy.max_retries).map(|r| policy.delay_for(r)).collect();
            assert!(delays.windows(2).all(|w| w[0] < w[1]), "{:?}", delays);
            assert!(delays[0] >= Duration::from_millis(100) && delays[0] < Duration::from_millis(150));
        }
    }

    #[test]
    fn test_dedup_key_only_for_live_category() {
        assert_eq!(dedup_key(&live("9")), Some("9".to_string()));
        let mut numeric = live("9");
        numeric.metadata = json!({ "game_id": 9 });
        assert_eq!(dedup_key(&numeric), Some("9".to_string()));
        let mut other = live("9");
        other.category = "scraper".into();
        assert_eq!(dedup_key(&other), None);
    }
}
