//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ListCommand, RunCommand, ServeCommand, StatusCommand, ValidateCommand};
use std::ffi::OsString;

/// Baremetal Kubernetes provisioner
#[derive(Debug, Parser, Clone)]
#[command(name = "provisioner")]
#[command(version)]
#[command(about = "Drive clusters through resumable, condition-tracked provisioning pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Drive an operation on a cluster
    Run(RunCommand),

    /// Validate a provider configuration
    Validate(ValidateCommand),

    /// Show the status of a stored cluster
    Status(StatusCommand),

    /// List stored clusters
    List(ListCommand),

    /// Serve a provider to a host process over stdin/stdout
    Serve(ServeCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OperationKind;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "provisioner",
            "run",
            "--file",
            "provider.yaml",
            "--target",
            "prod.yaml",
            "--operation",
            "scale-up",
            "--variable",
            "registry=10.0.0.5",
            "--max-attempts",
            "3",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Run(cmd) => {
                assert_eq!(cmd.operation, OperationKind::ScaleUp);
                assert_eq!(cmd.max_attempts, 3);
                assert_eq!(cmd.variable, vec![("registry".to_string(), "10.0.0.5".to_string())]);
                assert!(!cmd.local);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_operation_defaults_to_create() {
        let cli = Cli::try_parse_from(["provisioner", "run", "-f", "p.yaml", "-n", "prod"]).unwrap();
        match cli.command {
            Command::Run(cmd) => {
                assert_eq!(cmd.operation, OperationKind::Create);
                assert_eq!(cmd.name.as_deref(), Some("prod"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_operation_is_rejected() {
        assert!(Cli::try_parse_from(["provisioner", "run", "-f", "p.yaml", "-o", "reboot"]).is_err());
    }
}
