//! `buildrelay submit`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use super::status::print_report;
use super::wiring::{collaborators, open_configured_store, process_env};
use crate::cli::run::exit_code_for_admission;
use crate::{
    Admission, AdmissionError, BuildRequest, Config, ExitCode, Orchestrator, OrchestratorSettings,
    StatusReport, emit_jcs,
};
use buildrelay_orchestrator::recover_interrupted;
use buildrelay_utils::error::render_user_error;
use buildrelay_utils::secret::verify_secret;
use buildrelay_utils::types::{TaskKey, TaskStatus};

/// When set, every request file must carry a matching `secret` field.
pub const SHARED_SECRET_ENV: &str = "BUILDRELAY_SECRET";

/// Read one request file, checking its shared secret when one is expected.
///
/// # Errors
///
/// Unreadable or malformed files, and [`AdmissionError::InvalidRequest`] for
/// a missing or wrong secret.
pub fn load_request(path: &Path, env: &dyn Fn(&str) -> Option<String>) -> Result<BuildRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request file {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("request file {} is not valid JSON", path.display()))?;

    if let Some(expected) = env(SHARED_SECRET_ENV).filter(|s| !s.is_empty()) {
        let presented = value.get("secret").and_then(Value::as_str).unwrap_or("");
        if !verify_secret(&expected, presented) {
            return Err(AdmissionError::InvalidRequest(format!(
                "secret in {} does not match",
                path.display()
            ))
            .into());
        }
    }

    serde_json::from_value(value)
        .with_context(|| format!("request file {} is not a build request", path.display()))
}

pub async fn execute_submit_command(
    paths: &[PathBuf],
    wait: bool,
    json: bool,
    recover: bool,
    config: &Config,
) -> Result<ExitCode> {
    let requests = paths
        .iter()
        .map(|p| load_request(p, &process_env))
        .collect::<Result<Vec<_>>>()?;

    let store = open_configured_store(config)?;
    if recover {
        for key in recover_interrupted(store.as_ref()).await? {
            eprintln!("recovered interrupted attempt {key}");
        }
    }

    let parts = collaborators(config, Arc::clone(&store), &process_env)?;
    let orchestrator = Orchestrator::start(parts, OrchestratorSettings::from_config(&config.pipeline));

    let mut outcome = ExitCode::SUCCESS;
    let mut admitted: Vec<(TaskKey, String)> = Vec::new();
    for request in requests {
        let nonce = request.nonce.clone();
        match orchestrator.admit(request).await {
            Ok(Admission::Accepted(key)) => {
                if !json {
                    println!("accepted {key} [{nonce}]");
                }
                admitted.push((key, nonce));
            }
            Ok(Admission::Duplicate(task)) => {
                if !json {
                    println!("{} [{nonce}] already finished as {}", task.key(), task.status);
                }
                admitted.push((task.key(), nonce));
            }
            Err(e) => {
                eprintln!("✗ submit: {}", render_user_error(&e));
                if outcome == ExitCode::SUCCESS {
                    outcome = exit_code_for_admission(&e);
                }
            }
        }
    }

    orchestrator.shutdown().await;
    info!(count = admitted.len(), "All admitted requests finished");

    if wait {
        for (key, nonce) in &admitted {
            let Some(task) = store.find(&key.task_id, key.round, nonce).await? else {
                continue;
            };
            if task.status == TaskStatus::Failed && outcome == ExitCode::SUCCESS {
                outcome = ExitCode::TASK_FAILED;
            }
            let report = StatusReport::from(task);
            if json {
                println!("{}", emit_jcs(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    Ok(outcome)
}
