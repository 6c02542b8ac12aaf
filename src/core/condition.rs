//! Condition model - the persisted record of a step's last known outcome

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason recorded while a step waits for its first attempt
pub const REASON_WAITING: &str = "Waiting";
/// Reason recorded when a step was bypassed through the skip set
pub const REASON_SKIP: &str = "Skip";

pub const MESSAGE_WAITING: &str = "waiting execute";
pub const MESSAGE_SKIP: &str = "Skip current condition";

/// Reason recorded when the handler for `step` returned an error
pub fn failed_reason(step: &str) -> String {
    format!("Failed{}", step)
}

/// Status of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Outcome of one pipeline step, keyed by the step name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Step name this condition tracks
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,

    /// Last time the step was attempted
    #[serde(default)]
    pub last_probe_time: Option<DateTime<Utc>>,

    /// Last time `status` changed
    #[serde(default)]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Create a condition without timestamps; the tracker stamps them on insert
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_probe_time: None,
            last_transition_time: None,
        }
    }

    /// A condition for a step that has not been attempted yet
    pub fn waiting(type_: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::Unknown, REASON_WAITING, MESSAGE_WAITING)
    }

    /// Whether this condition still needs processing
    pub fn is_pending(&self) -> bool {
        matches!(self.status, ConditionStatus::Unknown | ConditionStatus::False)
    }
}
