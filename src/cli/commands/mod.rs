//! CLI command implementations

mod config;
mod recover;
mod status;
mod submit;
mod wiring;

pub use config::execute_config_command;
pub use recover::execute_recover_command;
pub use status::execute_status_command;
pub use submit::{SHARED_SECRET_ENV, execute_submit_command, load_request};
