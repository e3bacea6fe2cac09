//! Phase classification.
//!
//! The phase is derived from the status conditions on every reconcile and
//! never stored. Rules, first match wins:
//!
//! 1. Neither condition present: [`Phase::Initial`].
//! 2. Either condition has reason `Failed`: [`Phase::Failed`].
//! 3. `SeedGenCompleted` is `True`: [`Phase::Completed`].
//! 4. `SeedGenInProgress` is `True` and the stage is `ImagerLaunched` or
//!    `Finalizing`, or the message is the imager launch message:
//!    [`Phase::Finalizing`]. An empty message without a stage is
//!    [`Phase::Initial`].
//! 5. Otherwise [`Phase::Generating`].

use std::fmt;

use crate::crd::{condition_types, reasons, ConditionStatus, SeedGenStage, SeedGenerator};
use crate::seedgen::status::MSG_LAUNCHING_IMAGER;

/// Derived state of a seed generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not started; validation runs next.
    Initial,

    /// Validated or mid-attempt; the generation saga runs next.
    Generating,

    /// The imager was launched and the agent restarted; finalize runs next.
    Finalizing,

    /// Terminal success.
    Completed,

    /// Terminal failure.
    Failed,
}

impl Phase {
    /// Terminal phases are never acted upon again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "Initial",
            Self::Generating => "Generating",
            Self::Finalizing => "Finalizing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

impl SeedGenerator {
    /// Classify the request from its current status.
    pub fn phase(&self) -> Phase {
        let completed = self.condition(condition_types::COMPLETED);
        let in_progress = self.condition(condition_types::IN_PROGRESS);

        if completed.is_none() && in_progress.is_none() {
            return Phase::Initial;
        }

        if [completed, in_progress]
            .into_iter()
            .flatten()
            .any(|c| c.reason == reasons::FAILED)
        {
            return Phase::Failed;
        }

        if completed.is_some_and(|c| c.status == ConditionStatus::True) {
            return Phase::Completed;
        }

        if let Some(in_progress) = in_progress.filter(|c| c.status == ConditionStatus::True) {
            let stage = self.status.as_ref().and_then(|s| s.stage);
            if matches!(stage, Some(SeedGenStage::ImagerLaunched | SeedGenStage::Finalizing))
                || in_progress.message == MSG_LAUNCHING_IMAGER
            {
                return Phase::Finalizing;
            }
            if in_progress.message.is_empty() && stage.is_none() {
                return Phase::Initial;
            }
        }

        Phase::Generating
    }
}
