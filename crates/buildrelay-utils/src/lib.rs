pub mod atomic_write;
pub mod canonicalization;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod paths;
pub mod redaction;
pub mod secret;
pub mod types;

pub use error::{ConfigError, ErrorCategory, UserFriendlyError};
pub use exit_codes::ExitCode;
pub use types::{
    Attachment, BuildTask, Deployment, ErrorClass, FailureDescriptor, FailureStage, FileSet,
    OutcomeSummary, ProviderAttemptSummary, RepositoryIdentity, Round, TaskKey, TaskStatus,
};
