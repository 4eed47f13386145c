//! Configuration management for buildrelay
//!
//! Hierarchical configuration with discovery and precedence:
//! CLI > environment > file > defaults. The file is TOML with `[pipeline]`,
//! `[providers]`, `[github]`, `[notify]`, and `[store]` sections, discovered
//! as `.buildrelay/config.toml` upward from the working directory.

mod discovery;
mod model;
mod sources;
mod validation;

pub use discovery::parse_order;
pub use model::*;
