//! CLI entry point and dispatch logic
//!
//! `run()` parses arguments, initializes logging, discovers configuration,
//! builds the tokio runtime, dispatches, and owns all error output.

use anyhow::Result;
use clap::Parser;

use super::args::{Cli, Commands};
use super::commands;

use crate::{AdmissionError, CliArgs, Config, ExitCode, StoreError};
use buildrelay_utils::error::{ConfigError, render_user_error};
use buildrelay_utils::logging::init_tracing;
use buildrelay_utils::redaction::redact_error_message;

/// Main CLI execution function.
///
/// Prints everything itself, errors included, and returns the exit code for
/// `main` to apply.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose, cli.log_format.into()) {
        eprintln!("warning: logging unavailable: {e}");
    }

    let cli_args = CliArgs {
        config_path: cli.config.clone(),
        workers: cli.workers,
        provider_order: cli.providers.clone(),
        state_dir: cli.state_dir.clone(),
        store_backend: cli.store.clone(),
    };

    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("✗ {}", redact_error_message(&render_user_error(&err)));
            return Err(ExitCode::CONFIG);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let operation = cli.command.name();
    let result = rt.block_on(async {
        match cli.command {
            Commands::Submit {
                requests,
                wait,
                json,
                no_recover,
            } => commands::execute_submit_command(&requests, wait, json, !no_recover, &config).await,
            Commands::Status { task, round, json } => {
                commands::execute_status_command(&task, round, json, &config).await
            }
            Commands::Config { json } => commands::execute_config_command(json, &config),
            Commands::Recover => commands::execute_recover_command(&config).await,
        }
    });

    match result {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(error) => Err(report_error(&error, operation)),
    }
}

/// Print an error the way its type wants to be shown and pick the exit code.
pub(crate) fn report_error(error: &anyhow::Error, operation: &str) -> ExitCode {
    let (rendered, code) = if let Some(e) = error.downcast_ref::<AdmissionError>() {
        (render_user_error(e), exit_code_for_admission(e))
    } else if let Some(e) = error.downcast_ref::<StoreError>() {
        (render_user_error(e), exit_code_for_store(e))
    } else if let Some(e) = error.downcast_ref::<ConfigError>() {
        (render_user_error(e), ExitCode::CONFIG)
    } else {
        (format!("{error:#}"), ExitCode::INTERNAL)
    };
    eprintln!("✗ {operation}: {}", redact_error_message(&rendered));
    code
}

pub(crate) fn exit_code_for_admission(error: &AdmissionError) -> ExitCode {
    match error {
        AdmissionError::Store(e) => exit_code_for_store(e),
        _ => ExitCode::ADMISSION_REJECTED,
    }
}

pub(crate) fn exit_code_for_store(error: &StoreError) -> ExitCode {
    match error {
        StoreError::NotFound(_) => ExitCode::NOT_FOUND,
        _ => ExitCode::INTERNAL,
    }
}
