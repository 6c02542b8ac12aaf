//! Pipeline execution: the step engine and the loops that drive it

pub mod driver;
pub mod engine;
pub mod fanout;
pub mod retry;
pub mod tracker;

pub use driver::{DriveReport, DriveResult, Driver, REASON_CANCELLED, REASON_CONFIG_ERROR, REASON_RETRIES_EXHAUSTED};
pub use engine::{Engine, EngineEvent, EventHandler, StepOutcome, REASON_SUCCEEDED};
pub use fanout::{fan_out, FanOutError};
pub use retry::{ExponentialBackoff, FixedInterval, RetryPolicy};
pub use tracker::ConditionTracker;
