//! GitHub REST gateway
//!
//! The `SourceControl` trait is the seam the pipelines run against;
//! `GitHubClient` is the production implementation. Commits use the contents
//! API's optimistic concurrency: the blob sha captured at fetch time rides
//! along on the PUT, and a stale sha comes back as HTTP 409, which maps to
//! `CommitConflict` rather than the generic write failure.

use crate::error::OrchestratorError;
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://api.github.com";
const API_TIMEOUT_SECS: u64 = 60;
const USER_AGENT: &str = "fanout";

/// Maximum length for error body content in error messages
const MAX_ERROR_BODY_LEN: usize = 200;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RepoDescriptor {
    pub full_name: String,
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeNode {
    pub path: String,
    /// "blob" for files, "tree" for directories.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl TreeNode {
    pub fn is_file(&self) -> bool {
        self.kind == "blob"
    }
}

/// One file's content at a specific revision, fetched fresh per job and never
/// shared between jobs.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub path: String,
    pub content: String,
    /// Opaque revision marker (the blob sha) used for optimistic-concurrency
    /// commits.
    pub revision: String,
}

/// A create-or-update request. `revision: None` means "create new file".
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub repo: String,
    pub branch: String,
    pub path: String,
    pub content: String,
    pub message: String,
    pub revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub commit: CommitRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

#[derive(Debug, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

// ============================================================================
// Gateway trait
// ============================================================================

/// Source-control operations the orchestrator needs. Per-job operations
/// (`get_file`, `put_file`) speak the job failure taxonomy; run-level CRUD
/// uses anyhow like the rest of the outer plumbing.
#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn list_repositories(&self) -> anyhow::Result<Vec<RepoDescriptor>>;

    /// Recursive file/dir listing for one branch.
    async fn list_tree(&self, repo: &str, branch: &str) -> anyhow::Result<Vec<TreeNode>>;

    async fn get_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<FileSnapshot, OrchestratorError>;

    /// Create or update a file; returns the new revision marker.
    async fn put_file(&self, req: &CommitRequest) -> Result<String, OrchestratorError>;

    async fn list_branches(&self, repo: &str) -> anyhow::Result<Vec<BranchInfo>>;

    async fn create_branch(&self, repo: &str, name: &str, from_sha: &str) -> anyhow::Result<()>;

    async fn create_pull_request(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> anyhow::Result<PullRequest>;
}

// ============================================================================
// GitHub implementation
// ============================================================================

pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
}

#[derive(Deserialize)]
struct ContentResponse {
    content: String,
    sha: String,
}

#[derive(Serialize)]
struct PutContentsRequest {
    message: String,
    content: String,
    branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Deserialize)]
struct PutContentsResponse {
    content: Option<PutContentInfo>,
}

#[derive(Deserialize)]
struct PutContentInfo {
    sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeNode>,
}

#[derive(Serialize)]
struct CreateRefRequest {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
}

#[derive(Serialize)]
struct CreatePrRequest {
    title: String,
    body: String,
    head: String,
    base: String,
}

#[derive(Deserialize)]
struct CreatePrResponse {
    number: u64,
    html_url: String,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

impl GitHubClient {
    pub fn new(token: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, token })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.with_headers(self.client.get(url))
    }

    fn with_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn error_text(response: reqwest::Response) -> String {
        let body = response.text().await.unwrap_or_default();
        if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&body) {
            let detail = api_error
                .errors
                .first()
                .and_then(|e| e.message.clone())
                .unwrap_or_default();
            if detail.is_empty() {
                api_error.message
            } else {
                format!("{}: {}", api_error.message, detail)
            }
        } else {
            sanitize_error_body(&body)
        }
    }
}

/// Sanitize an API error body to prevent credential leakage.
/// Truncates long responses and redacts potential secrets.
fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "token",
        "secret",
        "password",
        "credential",
        "bearer",
        "ghp_",
        "gho_",
        "ghu_",
        "github_pat_",
    ];

    let truncated = if body.chars().count() > MAX_ERROR_BODY_LEN {
        let head: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    };

    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(error details redacted - may contain sensitive data)".to_string();
        }
    }

    truncated
}

/// Decode the contents API's base64 payload (it arrives with embedded newlines).
fn decode_base64_content(encoded: &str) -> Result<String, String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| format!("invalid base64 content: {}", e))?;
    String::from_utf8(bytes).map_err(|e| format!("file is not valid UTF-8: {}", e))
}

#[async_trait]
impl SourceControl for GitHubClient {
    async fn list_repositories(&self) -> anyhow::Result<Vec<RepoDescriptor>> {
        let url = format!("{}/user/repos?per_page=100&sort=updated", API_BASE);
        let response = self.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!(
                "GitHub API error ({}): {}",
                status,
                Self::error_text(response).await
            );
        }
        Ok(response.json().await?)
    }

    async fn list_tree(&self, repo: &str, branch: &str) -> anyhow::Result<Vec<TreeNode>> {
        let url = format!(
            "{}/repos/{}/git/trees/{}?recursive=1",
            API_BASE, repo, branch
        );
        let response = self.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!(
                "GitHub API error ({}): {}",
                status,
                Self::error_text(response).await
            );
        }
        let parsed: TreeResponse = response.json().await?;
        Ok(parsed.tree)
    }

    async fn get_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<FileSnapshot, OrchestratorError> {
        let url = format!(
            "{}/repos/{}/contents/{}?ref={}",
            API_BASE, repo, path, branch
        );
        let response =
            self.get(&url)
                .send()
                .await
                .map_err(|e| OrchestratorError::Fetch {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            let reason = if status.as_u16() == 404 {
                "not found".to_string()
            } else {
                format!("HTTP {}: {}", status, Self::error_text(response).await)
            };
            return Err(OrchestratorError::Fetch {
                path: path.to_string(),
                reason,
            });
        }

        let parsed: ContentResponse =
            response
                .json()
                .await
                .map_err(|e| OrchestratorError::Fetch {
                    path: path.to_string(),
                    reason: format!("bad response: {}", e),
                })?;
        let content =
            decode_base64_content(&parsed.content).map_err(|reason| OrchestratorError::Fetch {
                path: path.to_string(),
                reason,
            })?;

        Ok(FileSnapshot {
            path: path.to_string(),
            content,
            revision: parsed.sha,
        })
    }

    async fn put_file(&self, req: &CommitRequest) -> Result<String, OrchestratorError> {
        let url = format!("{}/repos/{}/contents/{}", API_BASE, req.repo, req.path);
        let body = PutContentsRequest {
            message: req.message.clone(),
            content: base64::engine::general_purpose::STANDARD.encode(&req.content),
            branch: req.branch.clone(),
            sha: req.revision.clone(),
        };

        let response = self
            .with_headers(self.client.put(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestratorError::Commit {
                path: req.path.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 409 {
            return Err(OrchestratorError::CommitConflict {
                path: req.path.clone(),
            });
        }
        if !status.is_success() {
            return Err(OrchestratorError::Commit {
                path: req.path.clone(),
                reason: format!("HTTP {}: {}", status, Self::error_text(response).await),
            });
        }

        let parsed: PutContentsResponse =
            response
                .json()
                .await
                .map_err(|e| OrchestratorError::Commit {
                    path: req.path.clone(),
                    reason: format!("bad response: {}", e),
                })?;
        parsed
            .content
            .map(|c| c.sha)
            .ok_or_else(|| OrchestratorError::Commit {
                path: req.path.clone(),
                reason: "response missing content sha".to_string(),
            })
    }

    async fn list_branches(&self, repo: &str) -> anyhow::Result<Vec<BranchInfo>> {
        let url = format!("{}/repos/{}/branches?per_page=100", API_BASE, repo);
        let response = self.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!(
                "GitHub API error ({}): {}",
                status,
                Self::error_text(response).await
            );
        }
        Ok(response.json().await?)
    }

    async fn create_branch(&self, repo: &str, name: &str, from_sha: &str) -> anyhow::Result<()> {
        let url = format!("{}/repos/{}/git/refs", API_BASE, repo);
        let body = CreateRefRequest {
            git_ref: format!("refs/heads/{}", name),
            sha: from_sha.to_string(),
        };
        let response = self
            .with_headers(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!(
                "Failed to create branch '{}' ({}): {}",
                name,
                status,
                Self::error_text(response).await
            );
        }
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> anyhow::Result<PullRequest> {
        let url = format!("{}/repos/{}/pulls", API_BASE, repo);
        let request = CreatePrRequest {
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
        };

        let response = self
            .with_headers(self.client.post(&url))
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(
                "GitHub API error ({}): {}",
                status,
                Self::error_text(response).await
            );
        }

        let pr: CreatePrResponse = response.json().await?;
        Ok(PullRequest {
            number: pr.number,
            url: pr.html_url,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
