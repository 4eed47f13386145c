//! Delivery side effects: publishing generated files to GitHub, waiting for
//! GitHub Pages, and calling the evaluation callback.

mod github;
mod naming;
mod notifier;
mod types;

pub use github::{GitHubPublisher, pages_url};
pub use naming::repository_name;
pub use notifier::{HttpNotifier, NotifyPolicy};
pub use types::{
    EvaluationPayload, Notifier, NotifyFailure, PublishFailure, PublishFailureKind,
    PublishReceipt, RepositoryPublisher,
};

#[doc(hidden)]
pub use github::wait_for_ok;
