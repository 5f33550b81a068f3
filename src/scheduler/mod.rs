//! Top-level orchestration: owns both queues, runs the cadence loop, and
//! exposes every pipeline as an independently callable operation.

mod pipelines;
pub mod writer;

pub use pipelines::{SCHEDULER_CATEGORY, SCRAPER_CATEGORY};
pub use writer::StoreWriter;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::db::Database;
use crate::provider::{DataFetcher, League, ProviderClient, DEFAULT_LEAGUES};
use crate::queue::{AlertCounts, AlertQueue, RetryPolicy, WriteCounts, WriteQueue, Worker};
use pipelines::Pipelines;

const LOOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub leagues: Vec<League>,
    pub provider_base_url: String,
    /// Fast tick: live poll and grading
    pub live_interval: Duration,
    pub full_refresh_interval: Duration,
    pub stats_backfill_interval: Duration,
    pub reconcile_interval: Duration,
    /// Earliest retry of a slow cadence after a failed run
    pub retry_after: Duration,
    pub startup_delay: Duration,
    pub refresh_days_ahead: u32,
    pub stats_lookback_days: u32,
    /// Unfinished games that started earlier than this are no longer reconciled
    pub reconcile_lookback_days: u32,
    pub write_queue_capacity: usize,
    pub drain_timeout: Duration,
    pub alert_retry: RetryPolicy,
    /// Concurrent provider requests within one pipeline
    pub fetch_concurrency: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            leagues: DEFAULT_LEAGUES.iter().filter_map(|l| l.parse().ok()).collect(),
            provider_base_url: "https://site.api.espn.com/apis/site/v2/sports".to_string(),
            live_interval: Duration::from_secs(60),
            full_refresh_interval: Duration::from_secs(6 * 3600),
            stats_backfill_interval: Duration::from_secs(2 * 3600),
            reconcile_interval: Duration::from_secs(600),
            retry_after: Duration::from_secs(300),
            startup_delay: Duration::from_secs(30),
            refresh_days_ahead: 3,
            stats_lookback_days: 3,
            reconcile_lookback_days: 3,
            write_queue_capacity: 256,
            drain_timeout: Duration::from_secs(30),
            alert_retry: RetryPolicy::default(),
            fetch_concurrency: 4,
        }
    }
}

/// "Time since last run" bookkeeping for a slow cadence.
#[derive(Debug, Clone)]
pub(crate) struct Cadence {
    interval: Duration,
    retry_after: Duration,
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
}

impl Cadence {
    pub(crate) fn new(interval: Duration, retry_after: Duration) -> Self {
        Cadence {
            interval,
            retry_after,
            last_success: None,
            last_failure: None,
        }
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        if let Some(failed) = self.last_failure {
            if self.last_success.map_or(true, |ok| failed >= ok) {
                return now >= failed + self.retry_after;
            }
        }
        match self.last_success {
            Some(ok) => now >= ok + self.interval,
            None => true,
        }
    }

    /// Record a finished run; `at` is its completion time.
    pub(crate) fn record(&mut self, ok: bool, at: Instant) {
        if ok {
            self.last_success = Some(at);
        } else {
            self.last_failure = Some(at);
        }
    }
}

/// The loop's slow cadences.
#[derive(Debug, Clone)]
pub(crate) struct Cadences {
    full_refresh: Cadence,
    reconcile: Cadence,
    backfill: Cadence,
}

impl Cadences {
    pub(crate) fn new(settings: &SchedulerSettings) -> Self {
        Cadences {
            full_refresh: Cadence::new(settings.full_refresh_interval, settings.retry_after),
            reconcile: Cadence::new(settings.reconcile_interval, settings.retry_after),
            backfill: Cadence::new(settings.stats_backfill_interval, settings.retry_after),
        }
    }
}

pub struct Scheduler {
    pipelines: Arc<Pipelines>,
    db: Database,
    write_queue: WriteQueue,
    alert_queue: AlertQueue,
    loop_task: Option<Worker>,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings, db: Database, fetcher: Arc<dyn DataFetcher>) -> Self {
        let write_queue = WriteQueue::new(settings.write_queue_capacity);
        let alert_queue = AlertQueue::new(settings.alert_retry.clone());
        let provider = ProviderClient::new(fetcher, &settings.provider_base_url);
        let pipelines = Pipelines::new(
            settings,
            provider,
            db.clone(),
            write_queue.sender(),
            alert_queue.sender(),
        );
        Scheduler {
            pipelines: Arc::new(pipelines),
            db,
            write_queue,
            alert_queue,
            loop_task: None,
        }
    }

    /// Start the write and alert workers without the cadence loop.
    /// Returns `false` if both were already running.
    pub fn start_workers(&mut self) -> bool {
        let writer = StoreWriter::new(self.db.clone(), self.alert_queue.sender());
        let started_writes = self
            .write_queue
            .start(Arc::new(writer), Some(self.alert_queue.sender()));
        let started_alerts = self.alert_queue.start(Arc::new(self.db.clone()));
        started_writes || started_alerts
    }

    /// Start both workers and the cadence loop. Idempotent.
    pub fn start(&mut self) -> bool {
        self.start_workers();
        if self.is_running() {
            return false;
        }
        let pipelines = Arc::clone(&self.pipelines);
        self.loop_task = Some(Worker::spawn(move |shutdown| run_loop(pipelines, shutdown)));
        info!(
            "Scheduler started: {} league(s), live every {:?}",
            self.pipelines.settings.leagues.len(),
            self.pipelines.settings.live_interval
        );
        true
    }

    pub fn is_running(&self) -> bool {
        self.loop_task
            .as_ref()
            .map(|w| !w.is_finished())
            .unwrap_or(false)
    }

    /// Cancel the loop, drain and stop the write queue, then the alert queue,
    /// then release the provider client.
    pub async fn stop(&mut self) {
        if let Some(task) = self.loop_task.take() {
            task.shutdown("scheduler loop", LOOP_GRACE).await;
        }
        let drain = self.pipelines.settings.drain_timeout;
        self.write_queue.stop(drain).await;
        self.alert_queue.stop(drain).await;
        if let Err(e) = self.pipelines.provider.close().await {
            warn!("Failed to close provider client: {:#}", e);
        }
        info!("Scheduler stopped");
    }

    pub async fn run_full_refresh(&self) -> Result<usize> {
        self.pipelines.run_full_refresh().await
    }

    pub async fn update_live(&self) -> Result<usize> {
        self.pipelines.update_live().await
    }

    pub async fn grade_pending(&self) -> Result<()> {
        self.pipelines.grade_pending().await
    }

    pub async fn reconcile_statuses(&self) -> Result<usize> {
        self.pipelines.reconcile_statuses().await
    }

    pub async fn backfill_stats(&self) -> Result<usize> {
        self.pipelines.backfill_stats().await
    }

    /// Wait for the write queue and then the alert queue to empty.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.write_queue.wait_empty(timeout).await
            && self
                .alert_queue
                .wait_empty(deadline.saturating_duration_since(Instant::now()))
                .await
    }

    pub fn write_counts(&self) -> WriteCounts {
        self.write_queue.counts()
    }

    pub fn alert_counts(&self) -> AlertCounts {
        self.alert_queue.counts()
    }
}

async fn run_loop(p: Arc<Pipelines>, mut shutdown: watch::Receiver<bool>) {
    let settings = &p.settings;
    if !settings.startup_delay.is_zero() {
        info!("First cycle in {:?}", settings.startup_delay);
        tokio::select! {
            _ = tokio::time::sleep(settings.startup_delay) => {}
            _ = shutdown.changed() => return,
        }
    }

    let mut cadences = Cadences::new(settings);
    let mut ticker = tokio::time::interval(settings.live_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = run_cycle(&p, &mut cadences) => {}
        }
    }
    info!("Scheduler loop exited");
}

async fn run_cycle(p: &Pipelines, c: &mut Cadences) {
    if c.full_refresh.is_due(Instant::now()) {
        let ok = p
            .run_unit("full_refresh", p.run_full_refresh())
            .await
            .is_some();
        let at = Instant::now();
        c.full_refresh.record(ok, at);
        // a successful full refresh already reconciled
        if ok {
            c.reconcile.record(true, at);
        }
    }

    let reconcile_due = c.reconcile.is_due(Instant::now());
    let (_, reconciled, stats) = tokio::join!(
        p.run_unit("update_live", p.update_live()),
        async {
            if !reconcile_due {
                return None;
            }
            let ok = p
                .run_unit("reconcile_statuses", p.reconcile_statuses())
                .await
                .is_some();
            Some(ok)
        },
        p.run_unit("collect_grading_stats", p.collect_grading_stats()),
    );
    if let Some(ok) = reconciled {
        c.reconcile.record(ok, Instant::now());
    }
    p.enqueue_grading(stats.unwrap_or_default());

    if c.backfill.is_due(Instant::now()) {
        let ok = p
            .run_unit("backfill_stats", p.backfill_stats())
            .await
            .is_some();
        c.backfill.record(ok, Instant::now());
    }
}
