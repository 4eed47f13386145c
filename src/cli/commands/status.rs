//! `buildrelay status`

use anyhow::Result;

use super::wiring::open_configured_store;
use crate::{Config, ExitCode, StatusReport, emit_jcs};
use buildrelay_utils::error::ConfigError;
use buildrelay_utils::types::Round;

pub async fn execute_status_command(
    task_id: &str,
    round: u8,
    json: bool,
    config: &Config,
) -> Result<ExitCode> {
    let round = Round::try_from(round).map_err(|e| ConfigError::InvalidValue {
        key: "round".to_string(),
        value: e,
    })?;
    let store = open_configured_store(config)?;
    let report = StatusReport::from(store.get(task_id, round).await?);

    if json {
        println!("{}", emit_jcs(&report)?);
    } else {
        print_report(&report);
    }
    Ok(ExitCode::SUCCESS)
}

pub(super) fn print_report(report: &StatusReport) {
    println!("{}", report.summary());
    println!("  created: {}", report.created_at.to_rfc3339());
    println!("  updated: {}", report.updated_at.to_rfc3339());
    if let Some(deployment) = &report.deployment {
        println!("  repository: {}", deployment.repo_url);
        println!("  commit: {}", deployment.commit_sha);
        println!("  pages: {}", deployment.pages_url);
    }
    if let Some(outcome) = &report.outcome {
        println!(
            "  generated by: {} ({}) after {} attempt(s), {} file(s)",
            outcome.provider, outcome.model, outcome.attempts, outcome.file_count
        );
    }
    if let Some(error) = &report.last_error {
        println!("  failed in {} ({}): {}", error.stage, error.class, error.message);
        for provider in &error.providers {
            println!(
                "    {} x{} ({}): {}",
                provider.provider, provider.attempts, provider.terminal_kind, provider.message
            );
        }
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
}
