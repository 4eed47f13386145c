//! GitHub publisher
//!
//! Publishes a file set as a single commit through the git data API:
//! blobs, then a tree based on the current head, then a commit, then a ref
//! update. A repository with no commits is first initialized through the
//! Contents API, because the git data API refuses to work on an empty
//! repository.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use buildrelay_config::GithubConfig;
use buildrelay_utils::redaction::summarize_body;
use buildrelay_utils::types::{BuildTask, FileSet, RepositoryIdentity, Round};
use reqwest::header::{ACCEPT, HeaderMap, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::naming::repository_name;
use crate::types::{PublishFailure, PublishFailureKind, PublishReceipt, RepositoryPublisher};

const API_VERSION: &str = "2022-11-28";
const INIT_PATH: &str = ".init";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct GitHubPublisher {
    client: Client,
    api_base: String,
    token: String,
    owner: Option<String>,
    login: OnceCell<String>,
    pages_wait: Duration,
    poll_interval: Duration,
}

impl GitHubPublisher {
    /// Build a publisher from configuration and an already-resolved token.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: &GithubConfig, token: String) -> Result<Self, PublishFailure> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                PublishFailure::new(
                    PublishFailureKind::Network,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;
        Ok(Self {
            client,
            api_base: config.api_base_url().trim_end_matches('/').to_string(),
            token,
            owner: config.owner.clone(),
            login: OnceCell::new(),
            pages_wait: config.pages_wait(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Login of the token's user, fetched once.
    async fn login(&self) -> Result<&str, PublishFailure> {
        self.login
            .get_or_try_init(|| async {
                let user: UserResponse = self.call(Method::GET, "/user", None).await?;
                Ok::<_, PublishFailure>(user.login)
            })
            .await
            .map(String::as_str)
    }

    async fn owner(&self) -> Result<String, PublishFailure> {
        match &self.owner {
            Some(owner) => Ok(owner.clone()),
            None => self.login().await.map(str::to_string),
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, HeaderMap, String), PublishFailure> {
        let url = format!("{}{path}", self.api_base);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "buildrelay")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| transport_failure(&e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(|e| transport_failure(&e))?;
        debug!(%method, path, status = status.as_u16(), "GitHub API call");
        Ok((status, headers, text))
    }

    /// Call an endpoint that must succeed and decode its JSON body.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, PublishFailure> {
        let (status, headers, text) = self.request(method, path, body).await?;
        if !status.is_success() {
            return Err(classify_status(status, &headers, &text, path));
        }
        serde_json::from_str(&text).map_err(|e| {
            PublishFailure::new(
                PublishFailureKind::ServerError,
                format!("unexpected response from {path}: {e}"),
            )
        })
    }

    async fn get_repo(
        &self,
        identity: &RepositoryIdentity,
    ) -> Result<Option<RepoResponse>, PublishFailure> {
        let path = format!("/repos/{}", identity.full_name());
        let (status, headers, text) = self.request(Method::GET, &path, None).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => serde_json::from_str(&text).map(Some).map_err(|e| {
                PublishFailure::new(PublishFailureKind::ServerError, format!("{path}: {e}"))
            }),
            s => Err(classify_status(s, &headers, &text, &path)),
        }
    }

    async fn ensure_repo(
        &self,
        identity: &RepositoryIdentity,
        description: &str,
    ) -> Result<RepoResponse, PublishFailure> {
        if let Some(repo) = self.get_repo(identity).await? {
            return Ok(repo);
        }

        let create_path = if self.login().await? == identity.owner {
            "/user/repos".to_string()
        } else {
            format!("/orgs/{}/repos", identity.owner)
        };
        let body = json!({
            "name": identity.name,
            "description": description,
            "private": false,
            "auto_init": false,
        });
        let (status, headers, text) = self
            .request(Method::POST, &create_path, Some(&body))
            .await?;
        if status.is_success() {
            info!(repo = %identity.full_name(), "Created repository");
        } else if status == StatusCode::UNPROCESSABLE_ENTITY {
            info!(repo = %identity.full_name(), "Repository already exists, reusing it");
        } else {
            return Err(classify_status(status, &headers, &text, &create_path));
        }

        self.get_repo(identity).await?.ok_or_else(|| {
            PublishFailure::new(
                PublishFailureKind::ServerError,
                format!("repository {} not visible after creation", identity.full_name()),
            )
        })
    }

    /// Head commit SHA of `branch`, or `None` for an empty repository.
    async fn head_sha(
        &self,
        identity: &RepositoryIdentity,
        branch: &str,
    ) -> Result<Option<String>, PublishFailure> {
        let path = format!("/repos/{}/git/ref/heads/{branch}", identity.full_name());
        let (status, headers, text) = self.request(Method::GET, &path, None).await?;
        match status {
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => Ok(None),
            s if s.is_success() => {
                let reference: RefResponse = serde_json::from_str(&text).map_err(|e| {
                    PublishFailure::new(PublishFailureKind::ServerError, format!("{path}: {e}"))
                })?;
                Ok(Some(reference.object.sha))
            }
            s => Err(classify_status(s, &headers, &text, &path)),
        }
    }

    async fn initialize_empty(
        &self,
        identity: &RepositoryIdentity,
        branch: &str,
    ) -> Result<String, PublishFailure> {
        info!(repo = %identity.full_name(), "Repository is empty, creating initial commit");
        let path = format!("/repos/{}/contents/{INIT_PATH}", identity.full_name());
        let body = json!({
            "message": "Initialize repository",
            "content": STANDARD.encode("Initialized by buildrelay\n"),
            "branch": branch,
        });
        let _: Value = self.call(Method::PUT, &path, Some(&body)).await?;
        self.head_sha(identity, branch).await?.ok_or_else(|| {
            PublishFailure::new(
                PublishFailureKind::ServerError,
                format!("branch {branch} still missing after initialization"),
            )
        })
    }

    async fn commit_files(
        &self,
        identity: &RepositoryIdentity,
        branch: &str,
        files: &FileSet,
        round: Round,
    ) -> Result<String, PublishFailure> {
        let repo = identity.full_name();
        let head = match self.head_sha(identity, branch).await? {
            Some(sha) => sha,
            None => self.initialize_empty(identity, branch).await?,
        };
        let base: CommitResponse = self
            .call(Method::GET, &format!("/repos/{repo}/git/commits/{head}"), None)
            .await?;

        let mut entries = Vec::with_capacity(files.len());
        for (path, content) in files {
            let blob: ShaResponse = self
                .call(
                    Method::POST,
                    &format!("/repos/{repo}/git/blobs"),
                    Some(&json!({ "content": STANDARD.encode(content), "encoding": "base64" })),
                )
                .await?;
            entries.push(TreeEntry::blob(path, blob.sha));
        }

        let tree: ShaResponse = self
            .call(
                Method::POST,
                &format!("/repos/{repo}/git/trees"),
                Some(&json!({ "base_tree": base.tree.sha, "tree": entries })),
            )
            .await?;
        let commit: ShaResponse = self
            .call(
                Method::POST,
                &format!("/repos/{repo}/git/commits"),
                Some(&json!({
                    "message": format!("Deploy application - Round {}", round.number()),
                    "tree": tree.sha,
                    "parents": [head],
                })),
            )
            .await?;
        let _: Value = self
            .call(
                Method::PATCH,
                &format!("/repos/{repo}/git/refs/heads/{branch}"),
                Some(&json!({ "sha": commit.sha, "force": true })),
            )
            .await?;

        info!(repo = %repo, files = files.len(), commit = %commit.sha, "Pushed files in a single commit");
        Ok(commit.sha)
    }

    /// Enable Pages from the root of `branch`. Failure here does not fail the
    /// publish; the Pages URL is still deterministic.
    async fn enable_pages(
        &self,
        identity: &RepositoryIdentity,
        branch: &str,
    ) -> Result<(), String> {
        let path = format!("/repos/{}/pages", identity.full_name());
        let body = json!({ "source": { "branch": branch, "path": "/" } });
        match self.request(Method::POST, &path, Some(&body)).await {
            Ok((status, _, _)) if status.is_success() => {
                info!(repo = %identity.full_name(), "GitHub Pages enabled");
                Ok(())
            }
            Ok((StatusCode::CONFLICT, _, _)) => {
                debug!(repo = %identity.full_name(), "GitHub Pages already enabled");
                Ok(())
            }
            Ok((status, _, text)) => Err(format!(
                "enabling GitHub Pages returned {}: {}",
                status.as_u16(),
                summarize_body(&text, 200)
            )),
            Err(e) => Err(format!("enabling GitHub Pages failed: {e}")),
        }
    }

    async fn fetch_blob(&self, repo: &str, sha: &str) -> Result<Vec<u8>, PublishFailure> {
        let blob: BlobResponse = self
            .call(Method::GET, &format!("/repos/{repo}/git/blobs/{sha}"), None)
            .await?;
        decode_blob(&blob)
    }
}

#[async_trait]
impl RepositoryPublisher for GitHubPublisher {
    async fn identity_for(&self, task: &BuildTask) -> Result<RepositoryIdentity, PublishFailure> {
        let owner = self.owner().await?;
        Ok(RepositoryIdentity::new(
            owner,
            repository_name(&task.task_id, task.email.as_deref()),
        ))
    }

    async fn publish(
        &self,
        identity: &RepositoryIdentity,
        files: &FileSet,
        round: Round,
    ) -> Result<PublishReceipt, PublishFailure> {
        let repo = self
            .ensure_repo(identity, &format!("Application for task {}", identity.name))
            .await?;
        let branch = repo.default_branch.as_deref().unwrap_or("main");
        let commit_sha = self.commit_files(identity, branch, files, round).await?;

        let mut warnings = Vec::new();
        if let Err(warning) = self.enable_pages(identity, branch).await {
            warn!(repo = %identity.full_name(), %warning, "Pages not enabled");
            warnings.push(warning);
        }

        Ok(PublishReceipt {
            repo_url: repo
                .html_url
                .unwrap_or_else(|| format!("https://github.com/{}", identity.full_name())),
            commit_sha,
            pages_url: pages_url(identity),
            warnings,
        })
    }

    async fn fetch_files(&self, identity: &RepositoryIdentity) -> Result<FileSet, PublishFailure> {
        let Some(repo) = self.get_repo(identity).await? else {
            return Err(PublishFailure::new(
                PublishFailureKind::NotFound,
                format!("repository {} does not exist", identity.full_name()),
            ));
        };
        let branch = repo.default_branch.as_deref().unwrap_or("main");
        let full_name = identity.full_name();
        let Some(head) = self.head_sha(identity, branch).await? else {
            return Ok(FileSet::new());
        };
        let commit: CommitResponse = self
            .call(Method::GET, &format!("/repos/{full_name}/git/commits/{head}"), None)
            .await?;
        let tree: TreeResponse = self
            .call(
                Method::GET,
                &format!("/repos/{full_name}/git/trees/{}?recursive=1", commit.tree.sha),
                None,
            )
            .await?;
        if tree.truncated {
            warn!(repo = %full_name, "Repository tree listing was truncated");
        }

        let mut files = FileSet::new();
        for entry in tree.tree.into_iter().filter(|e| e.entry_type == "blob") {
            if entry.path == INIT_PATH {
                continue;
            }
            let content = self.fetch_blob(&full_name, &entry.sha).await?;
            files.insert(entry.path, content);
        }
        debug!(repo = %full_name, files = files.len(), "Fetched repository files");
        Ok(files)
    }

    async fn wait_until_live(&self, pages_url: &str) -> Result<(), PublishFailure> {
        wait_for_ok(&self.client, pages_url, self.pages_wait, self.poll_interval).await
    }
}

/// `https://{owner}.github.io/{repo}/`
#[must_use]
pub fn pages_url(identity: &RepositoryIdentity) -> String {
    format!(
        "https://{}.github.io/{}/",
        identity.owner.to_ascii_lowercase(),
        identity.name
    )
}

/// Poll `url` until it answers 200 or `max_wait` elapses.
pub async fn wait_for_ok(
    client: &Client,
    url: &str,
    max_wait: Duration,
    interval: Duration,
) -> Result<(), PublishFailure> {
    if max_wait.is_zero() {
        return Ok(());
    }
    let deadline = Instant::now() + max_wait;
    loop {
        match client.get(url).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                info!(url, "Site is live");
                return Ok(());
            }
            Ok(response) => debug!(url, status = response.status().as_u16(), "Site not live yet"),
            Err(e) => debug!(url, error = %e, "Site not reachable yet"),
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(PublishFailure::new(
                PublishFailureKind::Timeout,
                format!("{url} not live after {}s", max_wait.as_secs()),
            ));
        }
        sleep(interval.min(remaining)).await;
    }
}

fn transport_failure(error: &reqwest::Error) -> PublishFailure {
    let kind = if error.is_timeout() {
        PublishFailureKind::Timeout
    } else {
        PublishFailureKind::Network
    };
    PublishFailure::new(kind, summarize_body(&error.to_string(), 300))
}

/// Map a non-success GitHub response to a failure kind.
///
/// GitHub reports primary rate limiting as 403 with
/// `x-ratelimit-remaining: 0`, so that case is not an auth failure.
pub(crate) fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    path: &str,
) -> PublishFailure {
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0");
    let kind = match status.as_u16() {
        429 => PublishFailureKind::RateLimited,
        403 if exhausted || body.contains("rate limit") => PublishFailureKind::RateLimited,
        401 | 403 => PublishFailureKind::Unauthorized,
        404 => PublishFailureKind::NotFound,
        408 => PublishFailureKind::Timeout,
        500..=599 => PublishFailureKind::ServerError,
        _ => PublishFailureKind::Rejected,
    };
    PublishFailure::new(
        kind,
        format!(
            "{path} returned {}: {}",
            status.as_u16(),
            summarize_body(body, 300)
        ),
    )
}

fn decode_blob(blob: &BlobResponse) -> Result<Vec<u8>, PublishFailure> {
    if blob.encoding != "base64" {
        return Ok(blob.content.clone().into_bytes());
    }
    let compact: String = blob.content.split_whitespace().collect();
    STANDARD.decode(compact).map_err(|e| {
        PublishFailure::new(
            PublishFailureKind::ServerError,
            format!("blob content was not valid base64: {e}"),
        )
    })
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    html_url: Option<String>,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    tree: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeListing>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeListing {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

#[derive(Debug, Serialize)]
struct TreeEntry<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    entry_type: &'static str,
    sha: String,
}

impl<'a> TreeEntry<'a> {
    fn blob(path: &'a str, sha: String) -> Self {
        Self {
            path,
            mode: "100644",
            entry_type: "blob",
            sha,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn pages_url_uses_lowercased_owner() {
        let identity = RepositoryIdentity::new("OctoCat", "t1-jane");
        assert_eq!(pages_url(&identity), "https://octocat.github.io/t1-jane/");
    }

    #[test]
    fn rate_limit_403_is_transient_but_plain_403_is_not() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        let limited = classify_status(StatusCode::FORBIDDEN, &headers, "", "/user/repos");
        assert_eq!(limited.kind, PublishFailureKind::RateLimited);

        let denied = classify_status(StatusCode::FORBIDDEN, &HeaderMap::new(), "", "/user/repos");
        assert_eq!(denied.kind, PublishFailureKind::Unauthorized);
        assert!(!denied.kind.is_transient());
    }

    #[test]
    fn status_classes_map_to_kinds() {
        let h = HeaderMap::new();
        let kind = |code: u16| {
            classify_status(StatusCode::from_u16(code).unwrap(), &h, "", "/x").kind
        };
        assert_eq!(kind(502), PublishFailureKind::ServerError);
        assert_eq!(kind(404), PublishFailureKind::NotFound);
        assert_eq!(kind(422), PublishFailureKind::Rejected);
        assert_eq!(kind(429), PublishFailureKind::RateLimited);
    }

    #[test]
    fn blob_content_with_line_breaks_decodes() {
        let blob = BlobResponse {
            content: "PGgx\nPmhp\nPC9oMT4=\n".into(),
            encoding: "base64".into(),
        };
        assert_eq!(decode_blob(&blob).unwrap(), b"<h1>hi</h1>");
    }

    #[test]
    fn tree_entries_serialize_as_git_blobs() {
        let entry = TreeEntry::blob("index.html", "abc".into());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, json!({"path": "index.html", "mode": "100644", "type": "blob", "sha": "abc"}));
    }

    #[tokio::test]
    async fn zero_wait_skips_polling() {
        let client = Client::new();
        assert!(
            wait_for_ok(&client, "http://127.0.0.1:9/", Duration::ZERO, Duration::from_millis(1))
                .await
                .is_ok()
        );
    }
}
