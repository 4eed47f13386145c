//! Command-line interface for buildrelay
//!
//! - `args`: clap definitions
//! - `run`: entry point, dispatch, error reporting
//! - `commands`: one module per subcommand plus the collaborator wiring

pub mod args;
mod commands;
mod run;


pub use args::{Cli, Commands, LogFormatArg, build_cli};
pub use commands::{SHARED_SECRET_ENV, load_request};
pub use run::run;
