//! Language-model API client and review prompt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result, ReviewdError};

use super::classify_status;

/// Template for review analyses. Placeholders are substituted per job.
pub const DEFAULT_REVIEW_PROMPT: &str = "\
You are a senior software engineer reviewing a pull request. Please analyze \
the following changes and provide focused feedback:

Title: {title}
Description: {description}
Author: {author}
State: {state}
URL: {url}

Changes:
{diff}

Please provide a concise analysis focusing on:
1. Code quality and maintainability
2. Idiomatic code and adherence to best practices
3. Potential bugs or edge cases
4. Security implications
5. Performance considerations

Keep the analysis focused on the technical aspects of the changes. Suggest \
improvements and explain your reasoning for each suggestion.";

/// Header prepended to every posted review comment.
pub const COMMENT_HEADER: &str = "## Automated review";

/// Per-call overrides for a completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// A model completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub completion: String,
    pub stop_reason: Option<String>,
    pub model: String,
}

/// Trait for completion providers.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion>;
}

/// Configuration for the HTTP completion client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Messages endpoint base URL
    pub api_base: String,
    /// API key sent as bearer auth
    pub api_key: String,
    /// Model id used when the job does not override it
    pub model: String,
    /// Default completion budget
    pub max_tokens: u32,
    /// Default sampling temperature
    pub temperature: f32,
    /// Request timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: String::new(),
            max_tokens: 4096,
            temperature: 0.2,
            timeout_ms: 120_000,
        }
    }
}

/// Messages-API completion client.
pub struct HttpCompletionModel {
    http: reqwest::Client,
    config: ModelConfig,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    model: String,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl HttpCompletionModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("reviewd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ReviewdError::from)?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl CompletionModel for HttpCompletionModel {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion> {
        let payload = serde_json::json!({
            "model": options.model.as_deref().unwrap_or(&self.config.model),
            "max_tokens": options.max_tokens.unwrap_or(self.config.max_tokens),
            "temperature": options.temperature.unwrap_or(self.config.temperature),
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .http
            .post(format!("{}/v1/messages", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReviewdError::with_internal(
                classify_status(status),
                format!("Model API returned {}", status),
                body,
            ));
        }

        let parsed: MessagesResponse = response.json().await?;
        let completion = parsed
            .content
            .iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text.clone())
            .ok_or_else(|| {
                ReviewdError::new(
                    ErrorKind::UpstreamUnavailable,
                    "Model API response contained no text content",
                )
            })?;

        Ok(Completion {
            completion,
            stop_reason: parsed.stop_reason,
            model: parsed.model,
        })
    }
}

/// Substitute pull-request fields into a prompt template.
pub fn render_prompt(
    template: &str,
    diff: &str,
    pr: &super::github::PullRequest,
) -> String {
    template
        .replace("{title}", &pr.title)
        .replace("{description}", pr.body.as_deref().unwrap_or(""))
        .replace("{author}", &pr.user.login)
        .replace("{state}", &pr.state)
        .replace("{url}", &pr.html_url)
        .replace("{diff}", diff)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::github::{PullRequest, PullRequestAuthor};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pr() -> PullRequest {
        PullRequest {
            number: 7,
            title: "Add retry logic".to_string(),
            body: Some("Retries transient failures".to_string()),
            state: "open".to_string(),
            html_url: "https://example.com/pr/7".to_string(),
            user: PullRequestAuthor {
                login: "octocat".to_string(),
            },
        }
    }

    #[test]
    fn test_render_prompt_substitutes_all_placeholders() {
        let rendered = render_prompt(DEFAULT_REVIEW_PROMPT, "diff --git", &pr());
        assert!(rendered.contains("Title: Add retry logic"));
        assert!(rendered.contains("Author: octocat"));
        assert!(rendered.contains("diff --git"));
        assert!(!rendered.contains("{diff}"));
        assert!(!rendered.contains("{title}"));
    }

    #[test]
    fn test_render_prompt_missing_description() {
        let mut pr = pr();
        pr.body = None;
        let rendered = render_prompt("D:{description}|", "x", &pr);
        assert_eq!(rendered, "D:|");
    }

    #[tokio::test]
    async fn test_complete_parses_text_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{ "type": "text", "text": "Looks solid overall." }],
                "stop_reason": "end_turn",
                "model": "test-model"
            })))
            .mount(&server)
            .await;

        let client = HttpCompletionModel::new(ModelConfig {
            api_base: server.uri(),
            api_key: "key".to_string(),
            ..Default::default()
        })
        .unwrap();

        let completion = client
            .complete("review this", &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(completion.completion, "Looks solid overall.");
        assert_eq!(completion.stop_reason.as_deref(), Some("end_turn"));
    }

    #[tokio::test]
    async fn test_complete_maps_rate_limit_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = HttpCompletionModel::new(ModelConfig {
            api_base: server.uri(),
            api_key: "key".to_string(),
            ..Default::default()
        })
        .unwrap();

        let err = client
            .complete("review this", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn test_complete_rejects_empty_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [],
                "stop_reason": null,
                "model": "test-model"
            })))
            .mount(&server)
            .await;

        let client = HttpCompletionModel::new(ModelConfig {
            api_base: server.uri(),
            api_key: "key".to_string(),
            ..Default::default()
        })
        .unwrap();

        let err = client
            .complete("review this", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }
}
