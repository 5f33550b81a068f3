//! Background queues with a single consumer each.
//!
//! [`WriteQueue`] serializes every storage mutation behind one worker;
//! [`AlertQueue`] persists operational alerts with retry and de-duplication.
//! The two never wait on each other.

pub mod alert;
pub mod write;

pub use alert::{AlertCounts, AlertQueue, AlertSender, AlertSink, AlertTask, RetryPolicy};
pub use write::{WriteCommand, WriteCounts, WriteHandler, WriteQueue, WriteSender, WriteTask};

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

/// Count of tasks accepted but not yet finished by a worker.
#[derive(Default)]
pub(crate) struct Backlog {
    outstanding: AtomicUsize,
    idle: Notify,
}

impl Backlog {
    pub(crate) fn add(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn done(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Wait until every accepted task has finished. Returns `false` if the
    /// timeout elapsed first.
    pub(crate) async fn wait_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.len() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.len() == 0;
            }
        }
    }
}

/// Marks one task finished when dropped, including when the worker is
/// aborted mid-task.
pub(crate) struct BacklogGuard<'a>(pub(crate) &'a Backlog);

impl Drop for BacklogGuard<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A spawned worker task plus its shutdown signal.
pub(crate) struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Worker {
    pub(crate) fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(f(rx));
        Worker { handle, shutdown }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal shutdown and wait up to `grace` for the task to exit, aborting
    /// it afterwards.
    pub(crate) async fn shutdown(self, name: &str, grace: Duration) {
        let _ = self.shutdown.send(true);
        let mut handle = self.handle;
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => warn!("{} worker exited abnormally: {}", name, e),
            Err(_) => {
                warn!("{} worker did not stop within {:?}, aborting", name, grace);
                handle.abort();
            }
        }
    }
}
