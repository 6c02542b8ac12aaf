//! Lifecycle state models

use crate::core::{condition::Condition, pipeline::OperationKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse lifecycle state of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    /// Registered, nothing provisioned yet
    #[default]
    Pending,
    /// An operation is being driven through its pipeline
    Processing,
    /// Provisioned and serving
    Running,
    Upgrading,
    Terminating,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Processing => "Processing",
            Phase::Running => "Running",
            Phase::Upgrading => "Upgrading",
            Phase::Terminating => "Terminating",
            Phase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Persisted progress record of a target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub phase: Phase,

    /// Operation the conditions belong to, if one was started explicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationKind>,

    /// Ordered, unique by type, appended in pipeline order
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,
}

impl Status {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Fraction of conditions that are True (0.0 to 1.0) for a pipeline of `total` steps
    pub fn progress(&self, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let done = self
            .conditions
            .iter()
            .filter(|c| c.status == crate::core::ConditionStatus::True)
            .count();
        done as f64 / total as f64
    }

    /// Mark the target failed with a reason the operator can act on
    pub fn fail(&mut self, reason: impl Into<String>, message: impl Into<String>) {
        self.phase = Phase::Failed;
        self.reason = reason.into();
        self.message = message.into();
    }
}
