//! SSH executor - runs commands on a machine through the system `ssh` client

use crate::core::MachineRef;
use crate::remote::local::{run_captured, DEFAULT_COMMAND_TIMEOUT};
use crate::remote::{ExecOutput, ExecutorFactory, RemoteExecutor};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// One machine reached over ssh with key-based, non-interactive auth
#[derive(Debug, Clone)]
pub struct SshExecutor {
    address: String,
    user: String,
    port: u16,
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(address: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: user.into(),
            port: 22,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments passed to `ssh` for `cmd`
    fn args(&self, cmd: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-p".to_string(),
            self.port.to_string(),
            format!("{}@{}", self.user, self.address),
            "--".to_string(),
            cmd.to_string(),
        ]
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn exec(&self, cmd: &str) -> anyhow::Result<ExecOutput> {
        debug!(address = %self.address, user = %self.user, "running remote command");
        let mut command = Command::new("ssh");
        command.args(self.args(cmd));
        run_captured(command, self.timeout, cmd).await
    }
}

/// Opens an [`SshExecutor`] per machine
#[derive(Debug, Clone)]
pub struct SshExecutorFactory {
    pub user: String,
    pub port: u16,
    pub timeout: Duration,
}

impl Default for SshExecutorFactory {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

#[async_trait]
impl ExecutorFactory for SshExecutorFactory {
    async fn connect(&self, machine: &MachineRef) -> anyhow::Result<Box<dyn RemoteExecutor>> {
        if machine.address.is_empty() {
            anyhow::bail!("machine {} has no address", machine.id);
        }
        Ok(Box::new(
            SshExecutor::new(&machine.address, &self.user)
                .with_port(self.port)
                .with_timeout(self.timeout),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Role;

    #[test]
    fn test_ssh_args() {
        let executor = SshExecutor::new("10.0.0.1", "ops").with_port(2222);
        let args = executor.args("kubeadm version");
        assert_eq!(args[5], "2222");
        assert_eq!(args[6], "ops@10.0.0.1");
        assert_eq!(args.last().unwrap(), "kubeadm version");
    }

    #[tokio::test]
    async fn test_factory_rejects_machine_without_address() {
        let factory = SshExecutorFactory::default();
        let machine = MachineRef::new("m1", "", Role::Master);
        assert!(factory.connect(&machine).await.is_err());
    }
}
