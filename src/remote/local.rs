//! Local host executor - runs commands as subprocesses of the provider

use crate::core::MachineRef;
use crate::remote::{ExecOutput, ExecutorFactory, FileTransfer, RemoteExecutor};
use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Runs commands through `sh -c` on the machine hosting the provider
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    shell: String,
    timeout: Duration,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn `program args..`, wait up to `limit` and capture its output
pub(crate) async fn run_captured(mut command: Command, limit: Duration, label: &str) -> anyhow::Result<ExecOutput> {
    let output = timeout(limit, command.kill_on_drop(true).output())
        .await
        .map_err(|_| anyhow::anyhow!("`{}` timed out after {}s", label, limit.as_secs()))?
        .with_context(|| format!("failed to spawn `{}`", label))?;

    let exit_code = output.status.code().unwrap_or(-1);
    debug!(exit_code, stdout_bytes = output.stdout.len(), "command finished");

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code,
    })
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn exec(&self, cmd: &str) -> anyhow::Result<ExecOutput> {
        debug!(shell = %self.shell, "running local command");
        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(cmd);
        run_captured(command, self.timeout, cmd).await
    }
}

#[async_trait]
impl FileTransfer for LocalExecutor {
    async fn copy_file(&self, local: &Path, remote: &Path) -> anyhow::Result<()> {
        if let Some(parent) = remote.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, remote)
            .await
            .with_context(|| format!("copy {} to {}", local.display(), remote.display()))?;
        Ok(())
    }

    async fn write_file(&self, remote: &Path, contents: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = remote.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(remote, contents)
            .await
            .with_context(|| format!("write {}", remote.display()))
    }

    async fn read_file(&self, remote: &Path) -> anyhow::Result<Vec<u8>> {
        tokio::fs::read(remote)
            .await
            .with_context(|| format!("read {}", remote.display()))
    }

    async fn exist(&self, remote: &Path) -> anyhow::Result<bool> {
        Ok(tokio::fs::try_exists(remote).await?)
    }
}

/// Hands out a [`LocalExecutor`] for every machine, whatever its address
#[derive(Debug, Clone, Default)]
pub struct LocalExecutorFactory {
    executor: LocalExecutor,
}

impl LocalExecutorFactory {
    pub fn new(executor: LocalExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ExecutorFactory for LocalExecutorFactory {
    async fn connect(&self, machine: &MachineRef) -> anyhow::Result<Box<dyn RemoteExecutor>> {
        debug!(address = %machine.address, "local session");
        Ok(Box::new(self.executor.clone()))
    }
}
