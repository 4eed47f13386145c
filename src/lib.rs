//! buildrelay - LLM build requests to published GitHub Pages apps
//!
//! An admitted [`BuildRequest`] is generated by the first provider in the
//! fallback order that succeeds, committed to a GitHub repository with Pages
//! enabled, and reported to the request's evaluation URL. Every
//! `(task, round, nonce)` triple runs at most once; resubmitting a finished
//! triple returns the recorded result.
//!
//! buildrelay can be used in two ways:
//! - **CLI**: `buildrelay submit request.json --wait`, `buildrelay status <task> --round 1 --json`
//! - **Library**: assemble [`Collaborators`] and drive an [`Orchestrator`]
//!
//! # Library use
//!
//! ```rust,no_run
//! use buildrelay::{BuildRequest, Collaborators, Orchestrator, OrchestratorSettings};
//! # async fn demo(parts: Collaborators) -> anyhow::Result<()> {
//! let orchestrator = Orchestrator::start(parts, OrchestratorSettings::default());
//! let request: BuildRequest = serde_json::from_str(
//!     r#"{"task":"demo","round":1,"nonce":"n1","brief":"A counter page"}"#,
//! )?;
//! let admission = orchestrator.admit(request).await?;
//! orchestrator.shutdown().await;
//! # let _ = admission;
//! # Ok(())
//! # }
//! ```
//!
//! Status reports are emitted in JCS (RFC 8785) canonical form; use
//! [`emit_jcs`] for the same encoding in your own integrations.

pub use buildrelay_config::{CliArgs, Config};
pub use buildrelay_delivery::{Notifier, RepositoryPublisher};
pub use buildrelay_llm::{FallbackPolicy, FallbackSelector, ProviderAdapter};
pub use buildrelay_orchestrator::{
    Admission, AdmissionError, BuildRequest, Collaborators, Orchestrator, OrchestratorSettings,
    StatusReport,
};
pub use buildrelay_store::{StoreError, TaskStore, open_store};
pub use buildrelay_utils::ExitCode;
pub use buildrelay_utils::canonicalization::emit_jcs;
pub use buildrelay_utils::types::{BuildTask, Round, TaskKey, TaskStatus};

pub mod cli;
