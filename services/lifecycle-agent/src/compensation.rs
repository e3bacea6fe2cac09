//! Compensation registry.
//!
//! A LIFO stack of named rollback actions registered by a multi-step
//! attempt just before each irreversible step. On any exit short of the
//! terminal hand-off the stack is unwound: actions run newest first, each
//! failure is logged and does not stop the remaining actions.
//!
//! # Invariants
//!
//! - Entries live only for one in-process attempt and are never persisted.
//! - Each action runs at most once.
//! - Dropping a stack with pending entries does not run them; it logs.

use std::future::Future;

use futures_util::future::BoxFuture;
use tracing::{info, warn};

type Action<'a> = Box<dyn FnOnce() -> BoxFuture<'a, anyhow::Result<()>> + Send + 'a>;

struct Entry<'a> {
    name: &'static str,
    action: Action<'a>,
}

/// Ordered rollback actions for a single attempt.
#[derive(Default)]
pub struct CompensationStack<'a> {
    entries: Vec<Entry<'a>>,
}

impl<'a> CompensationStack<'a> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register a rollback action.
    pub fn push<F, Fut>(&mut self, name: &'static str, action: F)
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'a,
    {
        info!(compensation = name, "Registered compensation");
        self.entries.push(Entry {
            name,
            action: Box::new(move || Box::pin(action())),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the pending actions in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    /// Run every pending action, newest first.
    ///
    /// Returns the number of actions that failed.
    pub async fn unwind(&mut self) -> usize {
        let mut failures = 0;
        while let Some(entry) = self.entries.pop() {
            info!(compensation = entry.name, "Running compensation");
            if let Err(e) = (entry.action)().await {
                failures += 1;
                warn!(compensation = entry.name, error = %format!("{e:#}"), "Compensation failed");
            }
        }
        failures
    }

    /// Forget all pending actions without running them.
    pub fn disarm(&mut self) {
        self.entries.clear();
    }
}

impl Drop for CompensationStack<'_> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(pending = ?self.names(), "Compensation stack dropped with pending actions");
        }
    }
}
