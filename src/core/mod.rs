//! Core domain models
//!
//! This module defines the fundamental data structures that represent
//! targets, their persisted conditions, and the pipelines that advance them.

pub mod condition;
pub mod config;
pub mod context;
pub mod pipeline;
pub mod state;
pub mod step;
pub mod target;
pub mod validation;

pub use condition::*;
pub use context::*;
pub use pipeline::*;
pub use state::*;
pub use step::*;
pub use target::*;
pub use validation::{validate_cluster, ErrorList, FieldError, FieldErrorKind};
