//! Source-control API client.
//!
//! The worker pipeline only needs three operations from the hosting
//! provider: pull-request metadata, the raw diff, and posting the review
//! comment. They sit behind the [`SourceControl`] trait so tests can swap
//! in a scripted implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ReviewdError};

use super::classify_status;

/// Pull-request author.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestAuthor {
    pub login: String,
}

/// Pull-request metadata, the subset the review prompt needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    pub html_url: String,
    pub user: PullRequestAuthor,
}

/// Trait for source-control providers.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Fetch pull-request metadata.
    async fn get_pull_request(&self, owner: &str, repo: &str, number: u64) -> Result<PullRequest>;

    /// Fetch the raw unified diff of a pull request.
    async fn get_diff(&self, owner: &str, repo: &str, number: u64) -> Result<String>;

    /// Post a comment on a pull request. Returns the comment id.
    async fn post_comment(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<u64>;
}

/// Configuration for the GitHub client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// API base URL (override for GitHub Enterprise or tests)
    pub api_base: String,
    /// Personal access token or installation token
    pub token: Option<String>,
    /// Request timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token: None,
            timeout_ms: 30_000,
        }
    }
}

/// GitHub REST client.
pub struct GithubClient {
    http: reqwest::Client,
    config: GithubConfig,
}

#[derive(Deserialize)]
struct CommentResponse {
    id: u64,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("reviewd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ReviewdError::from)?;
        Ok(Self { http, config })
    }

    fn pull_url(&self, owner: &str, repo: &str, number: u64) -> String {
        format!(
            "{}/repos/{}/{}/pulls/{}",
            self.config.api_base, owner, repo, number
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn ensure_success(
        &self,
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ReviewdError::with_internal(
            classify_status(status),
            format!("GitHub {} returned {}", operation, status),
            body,
        ))
    }
}

#[async_trait]
impl SourceControl for GithubClient {
    async fn get_pull_request(&self, owner: &str, repo: &str, number: u64) -> Result<PullRequest> {
        let request = self
            .http
            .get(self.pull_url(owner, repo, number))
            .header("Accept", "application/vnd.github+json");
        let response = self.authorize(request).send().await?;
        let response = self.ensure_success(response, "pull request fetch").await?;
        Ok(response.json().await?)
    }

    async fn get_diff(&self, owner: &str, repo: &str, number: u64) -> Result<String> {
        let request = self
            .http
            .get(self.pull_url(owner, repo, number))
            .header("Accept", "application/vnd.github.v3.diff");
        let response = self.authorize(request).send().await?;
        let response = self.ensure_success(response, "diff fetch").await?;
        Ok(response.text().await?)
    }

    async fn post_comment(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<u64> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.config.api_base, owner, repo, number
        );
        let request = self
            .http
            .post(url)
            .header("Accept", "application/vnd.github+json")
            .json(&serde_json::json!({ "body": body }));
        let response = self.authorize(request).send().await?;
        let response = self.ensure_success(response, "comment post").await?;
        let comment: CommentResponse = response.json().await?;

        tracing::info!(owner = %owner, repo = %repo, pull_number = number, comment_id = comment.id, "Posted review comment");
        Ok(comment.id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
