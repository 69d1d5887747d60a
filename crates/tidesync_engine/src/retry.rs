//! Timeouts, retries and cancellation for adapter calls.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::warn;

/// Observes cancellation requests issued after the token was created.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<u64>,
    generation: u64,
}

impl CancelToken {
    pub(crate) fn new(rx: watch::Receiver<u64>) -> Self {
        let generation = *rx.borrow();
        Self { rx, generation }
    }

    /// Returns true once a cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() != self.generation
    }

    /// Resolves when a cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() != self.generation {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone: nobody can cancel any more.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Runs adapter calls under the adapter's timeout and retry policy.
pub(crate) struct Retrier<'a> {
    config: SyncConfig,
    cancel: &'a CancelToken,
    retries: &'a AtomicU64,
}

impl<'a> Retrier<'a> {
    pub(crate) fn new(config: SyncConfig, cancel: &'a CancelToken, retries: &'a AtomicU64) -> Self {
        Self {
            config,
            cancel,
            retries,
        }
    }

    /// Runs one attempt, racing it against the timeout and cancellation.
    pub(crate) async fn guarded<T, F>(&self, fut: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            result = tokio::time::timeout(self.config.timeout, fut) => {
                result.unwrap_or(Err(SyncError::Timeout))
            }
        }
    }

    /// Runs `op`, retrying retryable failures; retry `n` waits
    /// `n * retry_delay`.
    pub(crate) async fn call<T, F, Fut>(&self, operation: &str, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match self.guarded(op()).await {
                Err(err) if err.is_retryable() && attempt < self.config.retry_count => {
                    attempt += 1;
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = self.config.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "adapter call failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn config() -> SyncConfig {
        SyncConfig::default()
            .with_retry_count(2)
            .with_retry_delay(Duration::from_millis(1))
            .with_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let (_tx, rx) = watch::channel(0);
        let cancel = CancelToken::new(rx);
        let retries = AtomicU64::new(0);
        let calls = &AtomicU32::new(0);

        let value = Retrier::new(config(), &cancel, &retries)
            .call("pull", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SyncError::network_retryable("reset"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_retry_count() {
        let (_tx, rx) = watch::channel(0);
        let cancel = CancelToken::new(rx);
        let retries = AtomicU64::new(0);
        let calls = &AtomicU32::new(0);

        let err = Retrier::new(config(), &cancel, &retries)
            .call("push", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SyncError::network_retryable("reset"))
            })
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn authentication_is_not_retried() {
        let (_tx, rx) = watch::channel(0);
        let cancel = CancelToken::new(rx);
        let retries = AtomicU64::new(0);
        let calls = &AtomicU32::new(0);

        let err = Retrier::new(config(), &cancel, &retries)
            .call("push", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SyncError::Authentication("expired".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Authentication(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let (_tx, rx) = watch::channel(0);
        let cancel = CancelToken::new(rx);
        let retries = AtomicU64::new(0);

        let err = Retrier::new(config().with_retry_count(0), &cancel, &retries)
            .guarded(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout));
    }

    #[tokio::test]
    async fn cancellation_interrupts_calls() {
        let (tx, rx) = watch::channel(0);
        let cancel = CancelToken::new(rx);
        assert!(!cancel.is_cancelled());

        let retries = AtomicU64::new(0);
        let retrier = Retrier::new(
            config().with_timeout(Duration::from_secs(30)),
            &cancel,
            &retries,
        );
        let call = retrier.guarded(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        tx.send_modify(|generation| *generation += 1);

        assert!(matches!(call.await, Err(SyncError::Cancelled)));
        assert!(cancel.is_cancelled());

        let later = CancelToken::new(tx.subscribe());
        assert!(!later.is_cancelled());
    }
}
