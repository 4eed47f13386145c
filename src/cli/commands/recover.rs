//! `buildrelay recover`

use anyhow::Result;

use super::wiring::open_configured_store;
use crate::{Config, ExitCode};
use buildrelay_orchestrator::recover_interrupted;

/// Attempts still owned by a running process on the same state dir are skipped.
pub async fn execute_recover_command(config: &Config) -> Result<ExitCode> {
    let store = open_configured_store(config)?;
    let recovered = recover_interrupted(store.as_ref()).await?;
    if recovered.is_empty() {
        println!("no interrupted attempts");
    }
    for key in recovered {
        println!("failed interrupted attempt {key}");
    }
    Ok(ExitCode::SUCCESS)
}
