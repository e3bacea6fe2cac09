//! Exponential backoff and retry helpers.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::debug;

use crate::{cancelled, Retriable};

/// Exponential backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the second attempt.
    pub initial: Duration,

    /// Multiplier applied per attempt.
    pub factor: f64,

    /// Jitter factor (0.0 to 1.0), added on top of the computed delay.
    pub jitter: f64,

    /// Maximum number of attempts, including the first.
    pub steps: u32,

    /// Upper bound for a single delay.
    pub cap: Duration,
}

impl Backoff {
    /// Short backoff for individual API calls: 10ms, 50ms, 250ms.
    pub const API_DEFAULT: Backoff = Backoff {
        initial: Duration::from_millis(10),
        factor: 5.0,
        jitter: 0.1,
        steps: 4,
        cap: Duration::from_secs(30),
    };

    /// Backoff that keeps retrying for roughly two minutes.
    pub const TWO_MINUTES: Backoff = Backoff {
        initial: Duration::from_secs(1),
        factor: 2.0,
        jitter: 0.1,
        steps: 9,
        cap: Duration::from_secs(30),
    };

    /// Calculate the delay after the given (zero-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.initial.as_millis() as f64 * self.factor.powi(attempt as i32);
        let delay = delay.min(self.cap.as_millis() as f64);

        let jitter_range = delay * self.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(0.0..jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((delay + jitter) as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::API_DEFAULT
    }
}

/// Run `op` until it succeeds, `should_retry` rejects the error, or the
/// backoff runs out of steps. The last error is returned.
///
/// With a `shutdown` receiver, a shutdown request during a backoff delay
/// stops the loop and returns the last error without another attempt.
pub async fn retry_on<T, E, F, Fut, P>(
    backoff: &Backoff,
    shutdown: Option<&watch::Receiver<bool>>,
    mut should_retry: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: Display,
{
    let max_attempts = backoff.steps.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts || !should_retry(&err) {
                    return Err(err);
                }

                let delay = backoff.delay(attempt - 1);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after error"
                );
                match shutdown {
                    Some(shutdown) => {
                        let mut shutdown = shutdown.clone();
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancelled(&mut shutdown) => {
                                debug!(attempt, "Retry cancelled by shutdown");
                                return Err(err);
                            }
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
        }
    }
}

/// Retry while the error is transient.
pub async fn retry_on_retriable<T, E, F, Fut>(
    backoff: &Backoff,
    shutdown: Option<&watch::Receiver<bool>>,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retriable + Display,
{
    retry_on(backoff, shutdown, |err: &E| err.is_retriable(), op).await
}

/// Retry while the error is transient or an optimistic-concurrency conflict.
pub async fn retry_on_conflict_or_retriable<T, E, F, Fut>(
    backoff: &Backoff,
    shutdown: Option<&watch::Receiver<bool>>,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retriable + Display,
{
    retry_on(backoff, shutdown, |err: &E| err.is_conflict() || err.is_retriable(), op).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Transient,
        Conflict,
        Fatal,
    }

    impl Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retriable for FakeError {
        fn is_conflict(&self) -> bool {
            matches!(self, Self::Conflict)
        }

        fn is_retriable(&self) -> bool {
            matches!(self, Self::Transient)
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let backoff = Backoff {
            initial: Duration::from_millis(100),
            factor: 2.0,
            jitter: 0.0,
            steps: 10,
            cap: Duration::from_millis(500),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(500));
    }

    #[test]
    fn test_delay_jitter_bounded() {
        let backoff = Backoff::API_DEFAULT;
        for _ in 0..50 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(55));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient() {
        let calls = &AtomicU32::new(0);
        let result = retry_on_retriable(&Backoff::API_DEFAULT, None, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(FakeError::Transient)
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_after_steps() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry_on_retriable(&Backoff::API_DEFAULT, None, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FakeError::Transient)
        })
        .await;

        assert_eq!(result, Err(FakeError::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), Backoff::API_DEFAULT.steps);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_only_retried_when_asked() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry_on_retriable(&Backoff::API_DEFAULT, None, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FakeError::Conflict)
        })
        .await;
        assert_eq!(result, Err(FakeError::Conflict));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls = &AtomicU32::new(0);
        let result = retry_on_conflict_or_retriable(&Backoff::API_DEFAULT, None, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(FakeError::Conflict)
            } else {
                Ok(())
            }
        })
        .await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict_or_retriable(&Backoff::TWO_MINUTES, None, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FakeError::Fatal)
        })
        .await;

        assert_eq!(result, Err(FakeError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff_delay() {
        let (tx, rx) = watch::channel(false);
        let calls = &AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let retry = retry_on_retriable(&Backoff::TWO_MINUTES, Some(&rx), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FakeError::Transient)
        });
        let stop = async {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(retry, stop);

        assert_eq!(result, Err(FakeError::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_already_requested_stops_after_first_attempt() {
        let (_tx, rx) = watch::channel(true);
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = retry_on_retriable(&Backoff::TWO_MINUTES, Some(&rx), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FakeError::Transient)
        })
        .await;

        assert_eq!(result, Err(FakeError::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
