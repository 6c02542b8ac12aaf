//! Condition tracker - reads and writes a target's persisted progress

use crate::core::{Condition, NextStep, OperationKind, Phase, Pipeline, Target};
use crate::error::{ProvisionError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Decides which step is current and records step outcomes on the target
#[derive(Clone)]
pub struct ConditionTracker {
    clock: Clock,
}

impl ConditionTracker {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Utc::now),
        }
    }

    /// Use a custom time source for probe and transition timestamps
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self { clock: Arc::new(clock) }
    }

    /// The condition the next engine call must process
    ///
    /// With no conditions recorded yet, a waiting condition for the first
    /// step is synthesised; it is not written to the target here.
    pub fn current_condition<T: Target>(
        &self,
        target: &T,
        pipeline: &Pipeline<T>,
        terminal: Option<Phase>,
    ) -> Result<Condition> {
        let status = target.status();
        let operation = pipeline.operation();

        if terminal.is_some_and(|phase| phase == status.phase) {
            return Err(ProvisionError::AlreadyDone {
                operation,
                phase: status.phase,
            });
        }

        if let Some(recorded) = status.operation {
            if recorded != operation && !status.conditions.is_empty() {
                return Err(ProvisionError::Config(format!(
                    "conditions of {} belong to {}; begin {} first",
                    target.name(),
                    recorded,
                    operation
                )));
            }
        }

        let first = pipeline
            .first()
            .ok_or(ProvisionError::EmptyPipeline(operation))?;

        if status.conditions.is_empty() {
            debug!(target_name = target.name(), step = first.name(), "no conditions yet, starting at first step");
            return Ok(Condition::waiting(first.name()));
        }

        status
            .conditions
            .iter()
            .find(|c| c.is_pending())
            .cloned()
            .ok_or(ProvisionError::NoConditionPending)
    }

    /// Insert or update a condition, keyed by its type
    ///
    /// The transition time only moves when the status changes. New
    /// conditions are appended, never inserted, so order follows the
    /// pipeline.
    pub fn set_condition<T: Target>(&self, target: &mut T, new: Condition) {
        let now = (self.clock)();
        let conditions = &mut target.status_mut().conditions;

        match conditions.iter_mut().find(|c| c.type_ == new.type_) {
            Some(existing) => {
                if existing.status != new.status {
                    existing.status = new.status;
                    existing.last_transition_time = Some(new.last_transition_time.unwrap_or(now));
                }
                if existing.reason != new.reason {
                    existing.reason = new.reason;
                }
                if existing.message != new.message {
                    existing.message = new.message;
                }
                existing.last_probe_time = Some(new.last_probe_time.unwrap_or(now));
            }
            None => {
                let mut cond = new;
                cond.last_probe_time.get_or_insert(now);
                cond.last_transition_time.get_or_insert(now);
                conditions.push(cond);
            }
        }
    }

    /// The step following `current`, or `Done` after the last one
    pub fn next_step_name<T>(&self, pipeline: &Pipeline<T>, current: &str) -> Result<NextStep> {
        pipeline.next_after(current)
    }

    /// First pipeline step with no condition recorded on the target yet
    ///
    /// Used to move past a condition whose type the pipeline does not know.
    pub fn next_unrecorded_step<T: Target>(&self, target: &T, pipeline: &Pipeline<T>) -> NextStep {
        let status = target.status();
        match pipeline.steps().iter().find(|s| status.condition(s.name()).is_none()) {
            Some(step) => NextStep::Step(step.name().to_string()),
            None => NextStep::Done,
        }
    }

    /// Start a fresh run of `operation` on the target
    ///
    /// Clears the conditions left by the previous operation and moves the
    /// target into the operation's in-progress phase.
    pub fn begin_operation<T: Target>(&self, target: &mut T, operation: OperationKind) -> Result<()> {
        let phase = target.phase();
        if !operation.can_start_from(phase) {
            return Err(ProvisionError::InvalidTransition { operation, phase });
        }

        let status = target.status_mut();
        status.conditions.clear();
        status.reason.clear();
        status.message.clear();
        status.operation = Some(operation);
        status.phase = operation.in_progress_phase();
        debug!(operation = %operation, phase = %status.phase, "operation started");
        Ok(())
    }
}

impl Default for ConditionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConditionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionTracker").finish_non_exhaustive()
    }
}
