//! Sequential fan-out of one action over a list of machines

use crate::core::MachineRef;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, warn};

/// The machine a fan-out stopped at
#[derive(Debug, Error)]
#[error("machine {address} ({id}) failed: {source:#}")]
pub struct FanOutError {
    /// Position of the failing machine in the input order
    pub index: usize,
    pub address: String,
    pub id: String,
    #[source]
    pub source: anyhow::Error,
}

/// Run `action` on each machine in order, stopping at the first failure
///
/// Machines after the failing one are never attempted. An empty input
/// succeeds without calling `action`.
pub async fn fan_out<'a, F, Fut>(machines: &'a [MachineRef], mut action: F) -> Result<usize, FanOutError>
where
    F: FnMut(&'a MachineRef) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut done = 0;
    for (index, machine) in machines.iter().enumerate() {
        debug!(address = %machine.address, index, "fan-out");
        if let Err(source) = action(machine).await {
            warn!(address = %machine.address, index, error = %format!("{:#}", source), "fan-out stopped");
            return Err(FanOutError {
                index,
                address: machine.address.clone(),
                id: machine.id.clone(),
                source,
            });
        }
        done += 1;
    }
    Ok(done)
}
