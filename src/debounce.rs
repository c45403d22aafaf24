/// Cancellable, debounced conflict checks for booking forms.
///
/// Every field change calls [`Debouncer::trigger`]. The previous pending check
/// is aborted, and each trigger is stamped with a token from a monotonically
/// increasing counter. A check only delivers its result if its token is still
/// the latest when the work finishes, so a slow response for stale inputs can
/// never overwrite a newer one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::SchedulingConfig;

#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    latest: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one triggered check.
#[derive(Debug)]
pub struct DebouncedCheck<T> {
    token: u64,
    result: oneshot::Receiver<T>,
}

impl<T> DebouncedCheck<T> {
    pub fn token(&self) -> u64 {
        self.token
    }

    /// The check's result, or `None` if it was superseded or cancelled.
    pub async fn outcome(self) -> Option<T> {
        self.result.await.ok()
    }
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Debouncer {
            delay,
            latest: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
        }
    }

    pub fn from_config(config: &SchedulingConfig) -> Self {
        Debouncer::new(Duration::from_millis(config.debounce_ms))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Token of the most recent trigger.
    pub fn latest_token(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    /// Run `work` once the delay passes without another trigger.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger<F, Fut, T>(&self, work: F) -> DebouncedCheck<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let token = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let latest = Arc::clone(&self.latest);
        let delay = self.delay;
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if latest.load(Ordering::SeqCst) != token {
                return;
            }

            let result = work().await;
            if latest.load(Ordering::SeqCst) == token {
                // The receiver may already be gone; nobody is waiting then.
                let _ = tx.send(result);
            } else {
                debug!(token, "Discarding result of superseded check");
            }
        });

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }

        DebouncedCheck { token, result: rx }
    }

    /// Drop whatever is pending or in flight.
    pub fn cancel(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
