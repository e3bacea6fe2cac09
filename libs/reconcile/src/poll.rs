//! Bounded polling with cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::PollError;

/// Interval and ceiling of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    /// Time between checks.
    pub interval: Duration,

    /// Total time after which the wait gives up.
    pub timeout: Duration,
}

impl PollSpec {
    /// Create a spec from an interval and a ceiling.
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Create a spec allowing `attempts` intervals after the first check.
    pub const fn attempts(interval: Duration, attempts: u32) -> Self {
        Self {
            interval,
            timeout: Duration::from_secs(interval.as_secs() * attempts as u64),
        }
    }
}

/// Resolves once shutdown has been requested.
///
/// A dropped sender means nobody can request shutdown any more, so the
/// future then never resolves.
pub async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Check `condition` immediately and then every `spec.interval` until it
/// returns `Ok(true)`.
///
/// The condition is checked one final time when the ceiling is reached.
/// An error from the condition aborts the wait.
pub async fn poll_until<E, F, Fut>(
    spec: PollSpec,
    what: &str,
    shutdown: &mut watch::Receiver<bool>,
    mut condition: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let started = Instant::now();

    loop {
        let done = condition().await.map_err(|source| PollError::Failed {
            what: what.to_string(),
            source,
        })?;
        if done {
            return Ok(());
        }

        let elapsed = started.elapsed();
        if elapsed >= spec.timeout {
            return Err(PollError::Timeout {
                what: what.to_string(),
                elapsed,
            });
        }

        let wait = spec.interval.min(spec.timeout - elapsed);
        debug!(what, wait_secs = wait.as_secs(), "Condition not met yet");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancelled(shutdown) => {
                return Err(PollError::Cancelled { what: what.to_string() });
            }
        }
    }
}
