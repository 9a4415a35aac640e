//! Cancellation and periodic background tasks
//!
//! Backoff sleeps, health-wait polls and the background loops all observe a
//! [`CancellationToken`]. Cancelling a token wakes every waiter at once.

use crate::errors::RecoveryError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Cloneable, one-shot cancellation signal
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Every clone shares the sender, so this cannot happen while
                // `self` is alive.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Fail fast with `Cancelled` if the token has already fired.
    pub fn check(&self) -> Result<(), RecoveryError> {
        if self.is_cancelled() {
            Err(RecoveryError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep for `duration` unless `token` fires first.
pub async fn sleep_or_cancel(
    duration: Duration,
    token: &CancellationToken,
) -> Result<(), RecoveryError> {
    if duration.is_zero() {
        return token.check();
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(RecoveryError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// A named loop that runs `tick` every `period` until stopped.
///
/// The first tick fires immediately. Missed ticks are delayed rather than
/// bunched up. Dropping the handle stops the loop.
pub struct RepeatingTask {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RepeatingTask {
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let stop = token.clone();
        let task_name = name.clone();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        tokio::select! {
                            biased;
                            _ = stop.cancelled() => break,
                            _ = tick() => {}
                        }
                    }
                }
            }
            debug!(task = %task_name, "Repeating task stopped");
        });

        debug!(task = %name, period_ms = period.as_millis() as u64, "Repeating task started");
        Self {
            name,
            token,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the loop to stop after the current tick.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for RepeatingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatingTask")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
