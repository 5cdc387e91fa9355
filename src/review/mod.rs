//! The pull-request review task executed by the worker.
//!
//! One job = fetch the PR metadata and diff, run the review prompt through
//! the model, post the result back as a comment. Every upstream call goes
//! through the same funnel: cache first, then rate-limit admission, then
//! the dependency's circuit breaker.

pub mod github;
pub mod model;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::{cache_key, Cache, CacheNamespace};
use crate::error::{ErrorKind, Result, ReviewdError};
use crate::jobs::JobHandler;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter};

pub use github::{GithubClient, GithubConfig, PullRequest, SourceControl};
pub use model::{
    render_prompt, Completion, CompletionModel, CompletionOptions, HttpCompletionModel,
    ModelConfig, COMMENT_HEADER, DEFAULT_REVIEW_PROMPT,
};

/// Rate-limiter keys, one per protected upstream.
const GITHUB_LIMIT_KEY: &str = "github";
const MODEL_LIMIT_KEY: &str = "model";

/// Map an upstream HTTP status to the error kind the retry machinery
/// classifies on.
pub(crate) fn classify_status(status: reqwest::StatusCode) -> ErrorKind {
    use reqwest::StatusCode;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Unauthorized,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::PAYLOAD_TOO_LARGE => ErrorKind::PayloadTooLarge,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorKind::Timeout,
        s if s.is_server_error() => ErrorKind::UpstreamUnavailable,
        s if s.is_client_error() => ErrorKind::Validation,
        _ => ErrorKind::Internal,
    }
}

/// Parameters of one review job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewParams {
    pub owner: String,
    pub repo: String,
    pub pull_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ReviewParams {
    fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// Configuration for the review service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Prompt template; `None` uses [`DEFAULT_REVIEW_PROMPT`]
    pub prompt: Option<String>,
    /// Breaker settings for the source-control upstream
    pub github_breaker: CircuitBreakerConfig,
    /// Breaker settings for the model upstream
    pub model_breaker: CircuitBreakerConfig,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            prompt: None,
            github_breaker: CircuitBreakerConfig::default(),
            model_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Executes review jobs against the protected upstreams.
pub struct ReviewService {
    source_control: Arc<dyn SourceControl>,
    model: Arc<dyn CompletionModel>,
    cache: Cache,
    limiter: RateLimiter,
    github_breaker: CircuitBreaker,
    model_breaker: CircuitBreaker,
    prompt: String,
}

impl ReviewService {
    pub fn new(
        source_control: Arc<dyn SourceControl>,
        model: Arc<dyn CompletionModel>,
        cache: Cache,
        limiter: RateLimiter,
        config: ReviewConfig,
    ) -> Self {
        Self {
            source_control,
            model,
            cache,
            limiter,
            github_breaker: CircuitBreaker::new("github", config.github_breaker),
            model_breaker: CircuitBreaker::new("model", config.model_breaker),
            prompt: config.prompt.unwrap_or_else(|| DEFAULT_REVIEW_PROMPT.to_string()),
        }
    }

    /// Reject the call if the upstream's window is exhausted. The limiter
    /// only reports; turning the verdict into an error happens here so the
    /// failure is classified as retryable.
    async fn admit(&self, key: &str) -> Result<()> {
        let decision = self.limiter.check(key).await;
        if decision.allowed {
            return Ok(());
        }
        Err(ReviewdError::new(
            ErrorKind::RateLimited,
            format!("Request budget for {} exhausted until {}", key, decision.reset_at),
        ))
    }

    async fn fetch_pull_request(&self, params: &ReviewParams) -> Result<PullRequest> {
        let key = cache_key(
            CacheNamespace::PullRequest,
            &(&params.owner, &params.repo, params.pull_number),
        );
        if let Some(pr) = self.cache.get::<PullRequest>(&key).await {
            return Ok(pr);
        }

        self.admit(GITHUB_LIMIT_KEY).await?;
        let pr = self
            .github_breaker
            .execute(|| {
                self.source_control
                    .get_pull_request(&params.owner, &params.repo, params.pull_number)
            })
            .await?;

        if let Err(e) = self
            .cache
            .set(&key, &pr, CacheNamespace::PullRequest.default_ttl())
            .await
        {
            tracing::warn!(error = %e, "Failed to cache pull request metadata");
        }
        Ok(pr)
    }

    async fn fetch_diff(&self, params: &ReviewParams) -> Result<String> {
        let key = cache_key(
            CacheNamespace::Diff,
            &(&params.owner, &params.repo, params.pull_number),
        );
        if let Some(diff) = self.cache.get::<String>(&key).await {
            tracing::debug!(pull_number = params.pull_number, "Diff cache hit");
            return Ok(diff);
        }

        self.admit(GITHUB_LIMIT_KEY).await?;
        let diff = self
            .github_breaker
            .execute(|| {
                self.source_control
                    .get_diff(&params.owner, &params.repo, params.pull_number)
            })
            .await?;

        if let Err(e) = self
            .cache
            .set(&key, &diff, CacheNamespace::Diff.default_ttl())
            .await
        {
            tracing::warn!(error = %e, "Failed to cache diff");
        }
        Ok(diff)
    }

    async fn analyze(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion> {
        let key = cache_key(CacheNamespace::Completion, &(prompt, options));
        if let Some(completion) = self.cache.get::<Completion>(&key).await {
            tracing::info!("Completion cache hit, skipping model call");
            return Ok(completion);
        }

        self.admit(MODEL_LIMIT_KEY).await?;
        let completion = self
            .model_breaker
            .execute(|| self.model.complete(prompt, options))
            .await?;

        if let Err(e) = self
            .cache
            .set(&key, &completion, CacheNamespace::Completion.default_ttl())
            .await
        {
            tracing::warn!(error = %e, "Failed to cache completion");
        }
        Ok(completion)
    }

    /// Run one review end to end. Returns the payload persisted as the
    /// job's result.
    pub async fn run_review(&self, params: &ReviewParams) -> Result<serde_json::Value> {
        tracing::info!(
            owner = %params.owner,
            repo = %params.repo,
            pull_number = params.pull_number,
            "Starting review"
        );

        let pr = self.fetch_pull_request(params).await?;
        let diff = self.fetch_diff(params).await?;

        let prompt = render_prompt(&self.prompt, &diff, &pr);
        let completion = self.analyze(&prompt, &params.completion_options()).await?;

        let body = format!("{}\n\n{}", COMMENT_HEADER, completion.completion);

        // Comment posting is not idempotent, so it is never cached
        self.admit(GITHUB_LIMIT_KEY).await?;
        let comment_id = self
            .github_breaker
            .execute(|| {
                self.source_control
                    .post_comment(&params.owner, &params.repo, params.pull_number, &body)
            })
            .await?;

        Ok(serde_json::json!({
            "comment_id": comment_id,
            "model": completion.model,
            "stop_reason": completion.stop_reason,
        }))
    }
}

#[async_trait]
impl JobHandler<ReviewParams> for ReviewService {
    async fn run(&self, params: &ReviewParams) -> Result<serde_json::Value> {
        self.run_review(params).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
