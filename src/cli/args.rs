//! CLI argument definitions and parsing structures

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use buildrelay_utils::logging::LogFormat;

/// buildrelay - generate, publish, and report LLM-built web apps
#[derive(Parser, Debug)]
#[command(name = "buildrelay")]
#[command(about = "Turn build requests into published GitHub Pages apps using LLM providers")]
#[command(long_about = r#"
buildrelay admits build requests, generates the app with the first LLM provider
that succeeds, commits it to a GitHub repository with Pages enabled, and calls
the request's evaluation URL with the result.

EXAMPLES:
  # Run a request and report how it ended
  buildrelay submit request.json --wait

  # Inspect the latest attempt for a task-round as canonical JSON
  buildrelay status my-task --round 1 --json

  # Show the effective configuration and where each value came from
  buildrelay config

  # Fail attempts left mid-pipeline by a crashed process
  buildrelay recover

CONFIGURATION:
  Precedence: CLI flags > environment > config file > defaults
  The config file is discovered upward from CWD as .buildrelay/config.toml
  API keys and the GitHub token are read from the environment variables the
  config names, never from the file.
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Compact)]
    pub log_format: LogFormatArg,

    /// Number of pipeline workers
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Provider preference order, comma separated (e.g. anthropic,openrouter)
    #[arg(long, global = true, value_delimiter = ',')]
    pub providers: Option<Vec<String>>,

    /// Directory holding task records
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Task store backend (file or memory)
    #[arg(long, global = true)]
    pub store: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Admit build requests from JSON files and run them
    ///
    /// The process stays up until every admitted request reaches a terminal
    /// state.
    Submit {
        /// Request files, each holding one build request object
        #[arg(required = true)]
        requests: Vec<PathBuf>,

        /// Report each request's terminal status; exit 5 if any failed
        #[arg(long)]
        wait: bool,

        /// Emit reports as canonical JSON
        #[arg(long)]
        json: bool,

        /// Skip failing records a previous process left mid-pipeline
        #[arg(long)]
        no_recover: bool,
    },

    /// Show the latest attempt for a task-round
    Status {
        /// Task identifier
        task: String,

        /// Round number (1 or 2)
        #[arg(long, default_value_t = 1)]
        round: u8,

        /// Emit canonical JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration with value sources
    Config {
        /// Emit canonical JSON
        #[arg(long)]
        json: bool,
    },

    /// Mark attempts interrupted by a previous process as failed
    Recover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Commands {
    /// Name used in error reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit { .. } => "submit",
            Self::Status { .. } => "status",
            Self::Config { .. } => "config",
            Self::Recover => "recover",
        }
    }
}

/// Build the clap command for shell completion and help generation.
#[must_use]
pub fn build_cli() -> clap::Command {
    <Cli as clap::CommandFactory>::command()
}
