//! Reconciliation loop primitives.
//!
//! Helpers shared by every controller in the workspace:
//!
//! - **Retry**: re-run an API call on transient or conflict errors with an
//!   exponential, jittered backoff ([`retry_on_retriable`],
//!   [`retry_on_conflict_or_retriable`]).
//! - **Polling**: wait for a condition with an explicit interval and
//!   ceiling, aborting on shutdown ([`poll_until`]).
//!
//! # Invariants
//!
//! - A retry loop never exceeds `Backoff::steps` attempts
//! - A poll never runs past its ceiling; the ceiling surfaces as
//!   [`PollError::Timeout`], never as a silent success
//! - Shutdown aborts a wait immediately with [`PollError::Cancelled`] and
//!   stops a retry loop at its next backoff delay

use std::time::Duration;

use thiserror::Error;

mod backoff;
mod poll;

pub use backoff::{retry_on, retry_on_conflict_or_retriable, retry_on_retriable, Backoff};
pub use poll::{cancelled, poll_until, PollSpec};

/// Classification of an error for retry purposes.
///
/// Implemented by the API error types of the client crates so the retry
/// helpers stay independent of any particular client.
pub trait Retriable {
    /// The write lost an optimistic-concurrency race.
    fn is_conflict(&self) -> bool;

    /// The failure is transient (throttling, server timeout, transport).
    fn is_retriable(&self) -> bool;
}

/// Errors from a bounded wait.
#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The ceiling elapsed before the condition held.
    #[error("timeout after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    /// Shutdown was requested while waiting.
    #[error("cancelled while waiting for {what}")]
    Cancelled { what: String },

    /// The condition itself failed.
    #[error("failed while waiting for {what}: {source}")]
    Failed {
        what: String,
        #[source]
        source: E,
    },
}

impl<E> PollError<E> {
    /// Returns true if the ceiling elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the wait was aborted by shutdown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Short requeue used when the request itself cannot be read.
pub const DEFAULT_REQUEUE_SHORT: Duration = Duration::from_secs(30);

/// Requeue used while waiting for the cluster to become stable.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
