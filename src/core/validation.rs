//! Field-level validation errors returned by provider hooks

use crate::core::target::{Cluster, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldErrorKind {
    Required,
    Invalid,
    Duplicate,
    NotSupported,
    Forbidden,
}

/// One problem found on one field of a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub kind: FieldErrorKind,
    /// Dotted path to the field, e.g. `spec.machines[1].address`
    pub field: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub detail: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}: {:?} \"{}\": {}", self.field, self.kind, value, self.detail),
            None => write!(f, "{}: {:?}: {}", self.field, self.kind, self.detail),
        }
    }
}

/// Errors collected while validating a target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorList(Vec<FieldError>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: FieldErrorKind, field: impl Into<String>, value: Option<&str>, detail: impl Into<String>) {
        self.0.push(FieldError {
            kind,
            field: field.into(),
            value: value.map(str::to_string),
            detail: detail.into(),
        });
    }

    pub fn required(&mut self, field: impl Into<String>, detail: impl Into<String>) {
        self.push(FieldErrorKind::Required, field, None, detail);
    }

    pub fn invalid(&mut self, field: impl Into<String>, value: &str, detail: impl Into<String>) {
        self.push(FieldErrorKind::Invalid, field, Some(value), detail);
    }

    pub fn extend(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        f.write_str(&joined.join("; "))
    }
}

impl From<Vec<FieldError>> for ErrorList {
    fn from(errors: Vec<FieldError>) -> Self {
        Self(errors)
    }
}

/// Structural checks every cluster must pass before provisioning
pub fn validate_cluster(cluster: &Cluster) -> ErrorList {
    let mut errors = ErrorList::new();

    if cluster.name.trim().is_empty() {
        errors.required("name", "cluster name must not be empty");
    }
    if cluster.spec.kubernetes_version.trim().is_empty() {
        errors.required("spec.kubernetesVersion", "a kubernetes version is required");
    }
    if !cluster.masters().any(|_| true) {
        errors.required("spec.machines", "at least one master machine is required");
    }

    let mut seen_ids = HashSet::new();
    let mut seen_addresses = HashSet::new();
    for (i, machine) in cluster.machines().iter().enumerate() {
        if machine.address.trim().is_empty() {
            errors.required(format!("spec.machines[{}].address", i), "machine address must not be empty");
        } else if !seen_addresses.insert(machine.address.as_str()) {
            errors.push(
                FieldErrorKind::Duplicate,
                format!("spec.machines[{}].address", i),
                Some(&machine.address),
                "address is used by another machine",
            );
        }
        if !seen_ids.insert(machine.id.as_str()) {
            errors.push(
                FieldErrorKind::Duplicate,
                format!("spec.machines[{}].id", i),
                Some(&machine.id),
                "machine id is used twice",
            );
        }
    }

    if cluster.spec.machines.iter().all(|m| m.role == Role::Worker) && !cluster.spec.machines.is_empty() {
        errors.push(
            FieldErrorKind::Forbidden,
            "spec.machines",
            None,
            "a cluster of only workers cannot be initialized",
        );
    }

    errors
}
