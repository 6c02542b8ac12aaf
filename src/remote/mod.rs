//! Collaborators step handlers use to reach machines and clusters
//!
//! Step handlers never open connections themselves: they ask an
//! [`ExecutorFactory`] for a session per call. Sessions are not pooled.

pub mod local;
pub mod ssh;

pub use local::{LocalExecutor, LocalExecutorFactory};
pub use ssh::{SshExecutor, SshExecutorFactory};

use crate::core::{Cluster, MachineRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into an error carrying the trimmed stderr
    pub fn into_result(self, cmd: &str) -> anyhow::Result<ExecOutput> {
        if self.success() {
            return Ok(self);
        }
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        anyhow::bail!("`{}` exited with code {}: {}", cmd, self.exit_code, detail)
    }
}

/// Runs shell commands on one machine
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn exec(&self, cmd: &str) -> anyhow::Result<ExecOutput>;
}

/// Moves files to and from one machine
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn copy_file(&self, local: &Path, remote: &Path) -> anyhow::Result<()>;

    async fn write_file(&self, remote: &Path, contents: &[u8]) -> anyhow::Result<()>;

    async fn read_file(&self, remote: &Path) -> anyhow::Result<Vec<u8>>;

    async fn exist(&self, remote: &Path) -> anyhow::Result<bool>;
}

/// Opens a command session to a machine
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    async fn connect(&self, machine: &MachineRef) -> anyhow::Result<Box<dyn RemoteExecutor>>;
}

/// Builds an API client for a provisioned cluster
///
/// The client type is left to the caller; the engine only threads the
/// factory through to handlers that need it.
#[async_trait]
pub trait ClientsetFactory<C>: Send + Sync {
    async fn clientset(&self, cluster: &Cluster) -> anyhow::Result<C>;
}
