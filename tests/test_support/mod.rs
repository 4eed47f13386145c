//! Scripted collaborators shared by the integration tests
//!
//! Include with `#[path = "test_support/mod.rs"] mod test_support;`.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use buildrelay_delivery::{
    EvaluationPayload, Notifier, NotifyFailure, PublishFailure, PublishFailureKind,
    PublishReceipt, RepositoryPublisher,
};
use buildrelay_llm::{
    FailureKind, FallbackPolicy, FallbackSelector, GeneratedCode, GenerationRequest,
    ProviderAdapter, ProviderFailure,
};
use buildrelay_orchestrator::{
    AttachmentResolver, BuildRequest, Collaborators, Orchestrator, OrchestratorSettings,
    PublishPolicy,
};
use buildrelay_store::{InMemoryTaskStore, TaskStore};
use buildrelay_utils::types::{
    BuildTask, FileSet, RepositoryIdentity, Round, TaskKey, TaskStatus,
};
use tokio::sync::Semaphore;

pub fn site_files(marker: &str) -> FileSet {
    let mut files = FileSet::new();
    files.insert(
        "index.html".to_string(),
        format!("<h1>{marker}</h1>").into_bytes(),
    );
    files
}

/// What a scripted adapter does on one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Fail(FailureKind),
    /// Never answers; the selector's call timeout has to fire.
    Hang,
}

/// Adapter that plays back a script. The last step repeats once the script
/// runs out.
pub struct ScriptedAdapter {
    name: String,
    script: Mutex<VecDeque<Step>>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicU32,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedAdapter {
    pub fn new(name: &str, steps: &[Step]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(steps.iter().copied().collect()),
            gate: None,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding(name: &str) -> Arc<Self> {
        Self::new(name, &[Step::Succeed])
    }

    pub fn failing(name: &str, kind: FailureKind) -> Arc<Self> {
        Self::new(name, &[Step::Fail(kind)])
    }

    /// Succeeds, but only once `gate` has a permit.
    pub fn gated(name: &str, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::from([Step::Succeed])),
            gate: Some(gate),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self) -> Step {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().copied().unwrap_or(Step::Succeed)
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedCode, ProviderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }
        match self.next_step() {
            Step::Succeed => Ok(GeneratedCode::new(
                site_files(&self.name),
                format!("{}-model", self.name),
            )),
            Step::Fail(kind) => Err(ProviderFailure::new(
                kind,
                format!("{} scripted {kind}", self.name),
            )),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Err(ProviderFailure::new(FailureKind::ServerError, "woke up"))
            }
        }
    }
}

/// Publisher that records commits in memory.
#[derive(Default)]
pub struct FakePublisher {
    /// Per-call outcome; `None` or an empty script publishes.
    script: Mutex<VecDeque<Option<PublishFailureKind>>>,
    /// Same for owner resolution.
    identity_script: Mutex<VecDeque<Option<PublishFailureKind>>>,
    identity_calls: AtomicU32,
    published: Mutex<Vec<(RepositoryIdentity, FileSet, Round)>>,
    fetches: AtomicU32,
    attempts: AtomicU32,
}

impl FakePublisher {
    pub fn scripted(outcomes: &[Option<PublishFailureKind>]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.iter().copied().collect()),
            ..Self::default()
        })
    }

    /// Scripts `identity_for`; publishing always succeeds.
    pub fn identity_scripted(outcomes: &[Option<PublishFailureKind>]) -> Arc<Self> {
        Arc::new(Self {
            identity_script: Mutex::new(outcomes.iter().copied().collect()),
            ..Self::default()
        })
    }

    pub fn identity_calls(&self) -> u32 {
        self.identity_calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<(RepositoryIdentity, FileSet, Round)> {
        self.published.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryPublisher for FakePublisher {
    async fn identity_for(&self, task: &BuildTask) -> Result<RepositoryIdentity, PublishFailure> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(Some(kind)) = self.identity_script.lock().unwrap().pop_front() {
            return Err(PublishFailure::new(kind, format!("scripted {kind}")));
        }
        Ok(RepositoryIdentity::new("octo", task.task_id.clone()))
    }

    async fn publish(
        &self,
        identity: &RepositoryIdentity,
        files: &FileSet,
        round: Round,
    ) -> Result<PublishReceipt, PublishFailure> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(Some(kind)) = self.script.lock().unwrap().pop_front() {
            return Err(PublishFailure::new(kind, format!("scripted {kind}")));
        }
        self.published
            .lock()
            .unwrap()
            .push((identity.clone(), files.clone(), round));
        Ok(PublishReceipt {
            repo_url: format!("https://github.com/{}", identity.full_name()),
            commit_sha: format!("sha-{attempt}"),
            pages_url: format!("https://{}.github.io/{}/", identity.owner, identity.name),
            warnings: Vec::new(),
        })
    }

    async fn fetch_files(&self, identity: &RepositoryIdentity) -> Result<FileSet, PublishFailure> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .published
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _, _)| id == identity)
            .map(|(_, files, _)| files.clone())
            .unwrap_or_default())
    }

    async fn wait_until_live(&self, _pages_url: &str) -> Result<(), PublishFailure> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    fail: bool,
    calls: Mutex<Vec<(String, EvaluationPayload)>>,
}

impl FakeNotifier {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<(String, EvaluationPayload)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, url: &str, payload: &EvaluationPayload) -> Result<(), NotifyFailure> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        if self.fail {
            return Err(NotifyFailure {
                attempts: 5,
                last_status: Some(503),
                message: "HTTP 503".to_string(),
            });
        }
        Ok(())
    }
}

pub const EVALUATION_URL: &str = "https://eval.example.com/notify";

pub fn request(task: &str, round: u8, nonce: &str) -> BuildRequest {
    BuildRequest {
        email: Some("dev@example.com".to_string()),
        task: task.to_string(),
        round,
        nonce: nonce.to_string(),
        brief: "Build a page with a click counter".to_string(),
        checks: vec!["Page has a title".to_string()],
        evaluation_url: Some(EVALUATION_URL.to_string()),
        attachments: Vec::new(),
    }
}

/// Policy with a call timeout short enough that three hung calls leave
/// room for the next provider.
pub fn test_policy() -> FallbackPolicy {
    FallbackPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(10),
        call_timeout: Duration::from_secs(60),
        stage_deadline: Duration::from_secs(30 * 60),
    }
}

pub fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        workers: 2,
        queue_capacity: 16,
        publish: PublishPolicy {
            attempts: 3,
            backoff: Duration::from_secs(5),
            call_timeout: Duration::from_secs(120),
        },
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<dyn TaskStore>,
    pub publisher: Arc<FakePublisher>,
    pub notifier: Arc<FakeNotifier>,
}

pub struct HarnessBuilder {
    adapters: Vec<Arc<ScriptedAdapter>>,
    store: Arc<dyn TaskStore>,
    publisher: Arc<FakePublisher>,
    notifier: Arc<FakeNotifier>,
    settings: OrchestratorSettings,
}

impl HarnessBuilder {
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = store;
        self
    }

    pub fn publisher(mut self, publisher: Arc<FakePublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn notifier(mut self, notifier: Arc<FakeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn start(self) -> Harness {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = self
            .adapters
            .iter()
            .map(|a| Arc::clone(a) as Arc<dyn ProviderAdapter>)
            .collect();
        let parts = Collaborators {
            store: Arc::clone(&self.store),
            selector: FallbackSelector::new(adapters, test_policy()),
            publisher: Arc::clone(&self.publisher) as Arc<dyn RepositoryPublisher>,
            notifier: Arc::clone(&self.notifier) as Arc<dyn Notifier>,
            attachments: AttachmentResolver::new(reqwest::Client::new()),
        };
        Harness {
            orchestrator: Orchestrator::start(parts, self.settings),
            store: self.store,
            publisher: self.publisher,
            notifier: self.notifier,
        }
    }
}

impl Harness {
    pub fn builder(adapters: &[Arc<ScriptedAdapter>]) -> HarnessBuilder {
        HarnessBuilder {
            adapters: adapters.to_vec(),
            store: Arc::new(InMemoryTaskStore::new()),
            publisher: Arc::new(FakePublisher::default()),
            notifier: Arc::new(FakeNotifier::default()),
            settings: test_settings(),
        }
    }

    pub fn start(adapters: &[Arc<ScriptedAdapter>]) -> Self {
        Self::builder(adapters).start()
    }

    /// Admit a fresh request and wait for it to finish.
    pub async fn run(&self, request: BuildRequest) -> BuildTask {
        let nonce = request.nonce.clone();
        let admission = self.orchestrator.admit(request).await.unwrap();
        self.wait(&admission.key(), &nonce).await
    }

    pub async fn wait(&self, key: &TaskKey, nonce: &str) -> BuildTask {
        self.orchestrator
            .wait_for_terminal(key, nonce, Duration::from_millis(10))
            .await
            .unwrap()
    }

    /// Poll in real time until the latest record for the key has `status`.
    pub async fn wait_for_status(&self, task_id: &str, round: Round, status: TaskStatus) {
        for _ in 0..500 {
            if let Ok(task) = self.store.get(task_id, round).await
                && task.status == status
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{task_id} round {round} never reached {status}");
    }
}
