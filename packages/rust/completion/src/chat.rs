//! OpenAI-compatible chat completion client.

use std::time::Duration;

use codematch_shared::{CodeMatchError, CompletionConfig, CompletionError};
use reqwest::{Client, StatusCode, header};
use tracing::{debug, info, instrument};

use crate::{CompletionBackend, CompletionRequest};

/// Maximum response body size (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// User-Agent string for completion requests.
const USER_AGENT: &str = concat!("CodeMatch/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, serde::Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, serde::Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, serde::Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for `POST <base_url>/chat/completions` with bearer auth.
#[derive(Clone)]
pub struct ChatCompletionClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl std::fmt::Debug for ChatCompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionClient {
    /// Build a client from config and an API key. Does not contact the endpoint.
    pub fn new(config: &CompletionConfig, api_key: String) -> Result<Self, CodeMatchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CodeMatchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(client, &config.base_url, api_key))
    }

    /// Build from an existing HTTP client.
    pub fn with_client(client: Client, base_url: &str, api_key: String) -> Self {
        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

impl CompletionBackend for ChatCompletionClient {
    #[instrument(
        skip_all,
        fields(model = request.model, prompt_chars = request.prompt.chars().count())
    )]
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, CompletionError> {
        let body = ChatRequest {
            model: request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Connect(e.to_string()))?;

        let status = response.status();
        let retry_after = retry_after_secs(response.headers());
        if let Some(len) = response.content_length() {
            check_size(len)?;
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CompletionError::Connect(format!("failed to read body: {e}")))?;
        check_size(bytes.len() as u64)?;

        if !status.is_success() {
            return Err(status_error(status, retry_after, &bytes));
        }

        let parsed: ChatResponse = serde_json::from_slice(&bytes)
            .map_err(|e| CompletionError::Malformed(format!("invalid JSON: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CompletionError::Malformed("response has no message content".into()))?;

        if let Some(usage) = parsed.usage {
            info!(
                model = parsed.model.as_deref().unwrap_or(request.model),
                tokens_in = usage.prompt_tokens,
                tokens_out = usage.completion_tokens,
                "completion received"
            );
        }
        debug!(text = %text, "completion text");

        Ok(text.trim().to_string())
    }
}

fn check_size(len: u64) -> Result<(), CompletionError> {
    if len > MAX_RESPONSE_SIZE {
        return Err(CompletionError::Malformed(format!(
            "response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
        )));
    }
    Ok(())
}

fn retry_after_secs(headers: &header::HeaderMap) -> Option<u64> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn status_error(status: StatusCode, retry_after: Option<u64>, body: &[u8]) -> CompletionError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CompletionError::Unauthorized {
            status: status.as_u16(),
        },
        StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited {
            retry_after_secs: retry_after,
        },
        _ => CompletionError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).chars().take(200).collect(),
        },
    }
}
