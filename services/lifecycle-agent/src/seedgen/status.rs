//! Status condition helpers.

use chrono::Utc;

use crate::crd::{condition_types, reasons, Condition, ConditionStatus, SeedGenStage, SeedGenerator};

pub const MSG_WAITING_FOR_STABILITY: &str = "Waiting for system to stabilize";
pub const MSG_STARTING: &str = "Starting seed generation";
pub const MSG_PULLING_RECERT: &str = "Pulling recert image";
pub const MSG_PREPARING: &str = "Preparing for seed generation";
pub const MSG_CLEANING: &str = "Cleaning cluster resources";
pub const MSG_LAUNCHING_IMAGER: &str = "Launching imager container";
pub const MSG_FINALIZING: &str = "Finalizing seed generation";
pub const MSG_COMPLETED: &str = "Seed Generation completed";

/// Insert or update a condition.
///
/// The transition time only moves when the status value changes.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    generation: Option<i64>,
) {
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Utc::now();
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = generation;
        }
        None => conditions.push(Condition {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: generation,
            last_transition_time: Utc::now(),
        }),
    }
}

impl SeedGenerator {
    fn set(&mut self, type_: &str, status: ConditionStatus, reason: &str, message: &str) {
        let generation = self.metadata.generation;
        let st = self.status.get_or_insert_with(Default::default);
        set_condition(&mut st.conditions, type_, status, reason, message, generation);
    }

    /// Record progress of the current attempt.
    pub fn set_in_progress(&mut self, message: &str, stage: SeedGenStage) {
        self.set(condition_types::IN_PROGRESS, ConditionStatus::True, reasons::IN_PROGRESS, message);
        self.status.get_or_insert_with(Default::default).stage = Some(stage);
    }

    /// Mark the request as terminally failed.
    pub fn set_failed(&mut self, message: &str) {
        self.set(
            condition_types::COMPLETED,
            ConditionStatus::False,
            reasons::FAILED,
            &format!("Seed generation failed: {message}"),
        );
        self.set(condition_types::IN_PROGRESS, ConditionStatus::False, reasons::FAILED, message);
    }

    /// Mark the request as terminally successful.
    pub fn set_completed(&mut self) {
        self.set(condition_types::IN_PROGRESS, ConditionStatus::False, reasons::COMPLETED, MSG_COMPLETED);
        self.set(condition_types::COMPLETED, ConditionStatus::True, reasons::COMPLETED, MSG_COMPLETED);
    }

    /// Record that this generation of the request has been observed.
    pub fn mark_observed(&mut self) {
        let generation = self.metadata.generation;
        self.status.get_or_insert_with(Default::default).observed_generation = generation;
    }
}
