use crate::error::{Error, Result};
use crate::prompt::TranslationRequest;
use async_trait::async_trait;
use mockall::automock;
use serde::Deserialize;
use serde_json::json;
use std::fmt::{self, Debug};
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-pro";

/// Raw text generated by the model; untrusted until sanitized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslationResult {
    raw_text: String,
}

impl TranslationResult {
    pub fn new<S: Into<String>>(raw_text: S) -> Self {
        Self {
            raw_text: raw_text.into(),
        }
    }

    #[must_use]
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }
}

/// Translates a natural language question into SQL text.
#[automock]
#[async_trait]
pub trait Translator: Debug + Send + Sync {
    /// Send `request` to the model and return its text.
    ///
    /// # Errors
    /// * [`Error::Service`] on transport, authentication, quota or response failures
    async fn translate(&self, request: &TranslationRequest) -> Result<TranslationResult>;
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"***")
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Create a new client; `timeout` bounds each request from connect to the last byte.
    ///
    /// # Errors
    /// * [`Error::Service`] if the underlying HTTP client cannot be built
    pub fn new<S: Into<String>>(
        api_key: S,
        model: S,
        base_url: S,
        timeout: Duration,
    ) -> Result<Self> {
        let version: &str = env!("CARGO_PKG_VERSION");
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let user_agent = format!("nlsql/{version} ({os}; {arch})");

        let client = reqwest::ClientBuilder::new()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Service {
                cause: error.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

fn service_error<E: ToString>(error: E) -> Error {
    Error::Service {
        cause: error.to_string(),
    }
}

#[async_trait]
impl Translator for GeminiClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn translate(&self, request: &TranslationRequest) -> Result<TranslationResult> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": request.instruction() },
                    { "text": request.question() },
                ]
            }]
        });

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(service_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|error_response| error_response.error.message)
                .unwrap_or(text);
            return Err(service_error(format!("{status}: {message}")));
        }

        let response: GenerateContentResponse = response.json().await.map_err(service_error)?;
        let Some(candidate) = response.candidates.into_iter().next() else {
            let reason = response
                .prompt_feedback
                .and_then(|feedback| feedback.block_reason)
                .unwrap_or_else(|| "unknown".to_string());
            return Err(service_error(format!(
                "response contained no candidates (block reason: {reason})"
            )));
        };

        let Some(content) = candidate.content else {
            let reason = candidate
                .finish_reason
                .unwrap_or_else(|| "unknown".to_string());
            return Err(service_error(format!(
                "candidate contained no content (finish reason: {reason})"
            )));
        };

        let raw_text: String = content
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        debug!(raw_text = %raw_text, "translation received");
        Ok(TranslationResult::new(raw_text))
    }
}
