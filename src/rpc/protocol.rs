//! Wire protocol between a provider host and a plugin process
//!
//! Every message is one line of JSON. The client opens with a
//! [`Handshake`], the server answers with a [`HandshakeReply`], then each
//! [`Request`] frame gets exactly one [`Response`] frame with the same id.

use crate::core::{config::PluginConfig, ErrorList, ManagedObject, OperationKind};
use crate::error::ProvisionError;
use crate::execution::StepOutcome;
use serde::{Deserialize, Serialize};

/// First message on a connection, sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub protocol_version: u32,
    pub magic_cookie_key: String,
    pub magic_cookie_value: String,
}

impl From<&PluginConfig> for Handshake {
    fn from(plugin: &PluginConfig) -> Self {
        Self {
            protocol_version: plugin.protocol_version,
            magic_cookie_key: plugin.magic_cookie_key.clone(),
            magic_cookie_value: plugin.magic_cookie_value.clone(),
        }
    }
}

impl Handshake {
    /// Why `self` does not match what the server expects, if it doesn't
    pub fn mismatch(&self, expected: &PluginConfig) -> Option<String> {
        if self.protocol_version != expected.protocol_version {
            return Some(format!(
                "incompatible protocol version: client speaks {}, plugin speaks {}",
                self.protocol_version, expected.protocol_version
            ));
        }
        if self.magic_cookie_key != expected.magic_cookie_key
            || self.magic_cookie_value != expected.magic_cookie_value
        {
            return Some("magic cookie mismatch: client is not a provisioner host".to_string());
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum HandshakeReply {
    Accepted { provider: String, protocol_version: u32 },
    Rejected { reason: String },
}

/// Request or response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame<B> {
    pub id: u64,
    pub body: B,
}

/// Procedures a plugin serves, one variant per facade method
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Request<T> {
    Name,
    Init {
        config_file: String,
    },
    Validate {
        target: T,
    },
    PreCreate {
        user: String,
        target: T,
    },
    AfterCreate {
        target: T,
    },
    ValidateUpdate {
        target: T,
        old: T,
    },
    #[serde(alias = "OnInitialize")]
    OnCreate {
        target: T,
    },
    OnUpdate {
        target: T,
    },
    OnUpgrade {
        target: T,
    },
    OnScaleUp {
        target: T,
    },
    OnScaleDown {
        target: T,
    },
    OnDelete {
        target: T,
    },
}

impl<T> Request<T> {
    /// Request advancing `operation` by one step
    pub fn operate(operation: OperationKind, target: T) -> Self {
        match operation {
            OperationKind::Create => Request::OnCreate { target },
            OperationKind::Update => Request::OnUpdate { target },
            OperationKind::Upgrade => Request::OnUpgrade { target },
            OperationKind::ScaleUp => Request::OnScaleUp { target },
            OperationKind::ScaleDown => Request::OnScaleDown { target },
            OperationKind::Delete => Request::OnDelete { target },
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Request::Name => "Name",
            Request::Init { .. } => "Init",
            Request::Validate { .. } => "Validate",
            Request::PreCreate { .. } => "PreCreate",
            Request::AfterCreate { .. } => "AfterCreate",
            Request::ValidateUpdate { .. } => "ValidateUpdate",
            Request::OnCreate { .. } => "OnCreate",
            Request::OnUpdate { .. } => "OnUpdate",
            Request::OnUpgrade { .. } => "OnUpgrade",
            Request::OnScaleUp { .. } => "OnScaleUp",
            Request::OnScaleDown { .. } => "OnScaleDown",
            Request::OnDelete { .. } => "OnDelete",
        }
    }
}

/// Reply to one request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Response<T> {
    Name(String),
    Unit,
    Validation(ErrorList),
    Target(T),
    Objects(Vec<ManagedObject>),
    /// Result of an `On*` call; the target travels back even when the
    /// step failed, since the failure is recorded on its conditions
    Operated {
        target: T,
        result: Result<StepOutcome, RemoteError>,
    },
    Error(RemoteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Fatal, must not be retried
    Config,
    Step,
    Panic,
    Protocol,
    Other,
}

/// An error as it crosses the plugin boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            step: None,
            stack: None,
        }
    }

    pub fn panic(message: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            stack,
            ..Self::new(RemoteErrorKind::Panic, message)
        }
    }
}

impl From<&ProvisionError> for RemoteError {
    fn from(err: &ProvisionError) -> Self {
        match err {
            e if e.is_config_error() => RemoteError::new(RemoteErrorKind::Config, e.to_string()),
            ProvisionError::StepFailed { step, source } => RemoteError {
                step: Some(step.clone()),
                ..RemoteError::new(RemoteErrorKind::Step, format!("{:#}", source))
            },
            ProvisionError::Remote { message, stack } => RemoteError {
                stack: stack.clone(),
                ..RemoteError::new(RemoteErrorKind::Other, message.clone())
            },
            other => RemoteError::new(RemoteErrorKind::Other, other.to_string()),
        }
    }
}

impl From<RemoteError> for ProvisionError {
    fn from(err: RemoteError) -> Self {
        match (err.kind, err.step) {
            (RemoteErrorKind::Config, _) => ProvisionError::Config(err.message),
            (RemoteErrorKind::Step, Some(step)) => ProvisionError::StepFailed {
                step,
                source: anyhow::anyhow!(err.message),
            },
            (RemoteErrorKind::Panic, _) => ProvisionError::Remote {
                message: format!("plugin panicked: {}", err.message),
                stack: err.stack,
            },
            (_, _) => ProvisionError::Remote {
                message: err.message,
                stack: err.stack,
            },
        }
    }
}
