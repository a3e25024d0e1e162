//! OpenRouter HTTP provider
//!
//! One adapter implements both provider seams against any
//! OpenAI-compatible endpoint:
//! - Chat completions with rate-limit retry and exponential backoff
//! - Embeddings for the semantic cache tier

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tracing::{debug, warn};

use super::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ProviderReply};
use super::{ChatMessage, EmbeddingProvider, ModelProvider};
use crate::config::ProviderSettings;
use crate::error::{Error, Result};
use crate::routing::ModelProfile;

/// OpenRouter API base URL
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default embedding model (cost-effective with good quality)
const DEFAULT_EMBEDDING_MODEL: &str = "openai/text-embedding-3-small";

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retry attempts for rate-limited requests
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
const BACKOFF_BASE_MS: u64 = 1000;

/// Ceiling for a server-suggested retry wait, in seconds
const MAX_RETRY_AFTER_SECS: u64 = 3600;

const REFERER_HEADER: &str = "https://github.com/thriftgate/thriftgate";
const TITLE_HEADER: &str = "Thriftgate";

/// HTTP provider for OpenRouter-compatible APIs
///
/// Thread-safe; one instance serves both chat dispatch and embeddings.
#[derive(Clone)]
pub struct HttpProvider {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
    embedding_model: String,
    timeout: Duration,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("base_url", &self.base_url)
            .field("embedding_model", &self.embedding_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder for creating an HttpProvider
pub struct HttpProviderBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    embedding_model: Option<String>,
    timeout_secs: Option<u64>,
}

impl Default for HttpProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpProviderBuilder {
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: None,
            embedding_model: None,
            timeout_secs: None,
        }
    }

    /// Set the API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL (defaults to OpenRouter)
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the embedding model
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Set the request timeout
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Build the HttpProvider
    pub fn build(self) -> Result<HttpProvider> {
        let api_key = self
            .api_key
            .ok_or_else(|| Error::ConfigError("API key is required".to_string()))?;

        let timeout = Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::NetworkError)?;

        Ok(HttpProvider {
            http_client,
            api_key,
            base_url: self
                .base_url
                .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
            embedding_model: self
                .embedding_model
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            timeout,
        })
    }
}

impl HttpProvider {
    pub fn builder() -> HttpProviderBuilder {
        HttpProviderBuilder::new()
    }

    /// Build a provider from configuration, resolving the API key from
    /// the environment when it is not set directly.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let api_key = settings.resolved_api_key().ok_or_else(|| {
            Error::ConfigError(
                "No API key configured. Set THRIFTGATE_API_KEY or OPENROUTER_API_KEY.".to_string(),
            )
        })?;

        HttpProviderBuilder::new()
            .api_key(api_key)
            .base_url(&settings.base_url)
            .embedding_model(&settings.embedding_model)
            .timeout_secs(settings.timeout_secs)
            .build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a single chat request to the API
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", REFERER_HEADER)
            .header("X-Title", TITLE_HEADER)
            .json(request)
            .send()
            .await
            .map_err(|error| self.map_transport_error(&request.model, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(handle_error_response(&request.model, status, &body));
        }

        response.json().await.map_err(|error| Error::ProviderError {
            model: request.model.clone(),
            message: format!("failed to parse response: {}", error),
        })
    }

    fn map_transport_error(&self, model: &str, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::ProviderTimeout {
                model: model.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            Error::ProviderError {
                model: model.to_string(),
                message: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl ModelProvider for HttpProvider {
    async fn invoke(
        &self,
        model: &ModelProfile,
        messages: &[ChatMessage],
    ) -> Result<ProviderReply> {
        let request = ChatRequest::new(&model.name, messages.to_vec());
        let mut attempts = 0;

        loop {
            attempts += 1;
            let started = Instant::now();

            match self.send_chat(&request).await {
                Ok(response) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    return ProviderReply::from_chat_response(response, latency_ms).ok_or_else(
                        || Error::ProviderError {
                            model: model.name.clone(),
                            message: "empty response from API".to_string(),
                        },
                    );
                }
                Err(Error::RateLimited(wait_secs)) if attempts < MAX_RETRY_ATTEMPTS => {
                    let backoff = calculate_backoff(attempts, wait_secs);
                    warn!(
                        model = %model.name,
                        attempt = attempts,
                        wait_ms = backoff,
                        "Rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest::new(&self.embedding_model, text);
        let url = format!("{}/embeddings", self.base_url);

        debug!(model = %request.model, "Sending embedding request");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", REFERER_HEADER)
            .header("X-Title", TITLE_HEADER)
            .json(&request)
            .send()
            .await
            .map_err(|error| Error::EmbeddingUnavailable(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingUnavailable(format!(
                "HTTP {} from embeddings API: {}",
                status.as_u16(),
                body
            )));
        }

        let embedding_response: EmbeddingResponse = response.json().await.map_err(|error| {
            Error::EmbeddingUnavailable(format!("failed to parse response: {}", error))
        })?;

        embedding_response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding response".to_string()))
    }
}

/// Map an error response from the API onto the error taxonomy
fn handle_error_response(model: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let provider_error = |message: String| Error::ProviderError {
        model: model.to_string(),
        message,
    };

    match status.as_u16() {
        401 => provider_error(
            "unauthorized: invalid API key (set THRIFTGATE_API_KEY or OPENROUTER_API_KEY)"
                .to_string(),
        ),
        429 => {
            let wait_secs = extract_retry_after(body).unwrap_or(60);
            Error::RateLimited(wait_secs)
        }
        400 => provider_error(format!("bad request: {}", body)),
        402 => provider_error("payment required: insufficient credits".to_string()),
        403 => provider_error(format!("forbidden: {}", body)),
        404 => provider_error(format!("model not found or endpoint unavailable: {}", body)),
        500..=599 => provider_error(format!("server error ({}): {}", status.as_u16(), body)),
        _ => provider_error(format!("HTTP error {}: {}", status.as_u16(), body)),
    }
}

/// Calculate backoff delay with jitter
///
/// The server-suggested wait is clamped so a hostile `retry_after` value
/// can neither overflow the millisecond conversion nor park a dispatch
/// for longer than an hour.
fn calculate_backoff(attempt: u32, suggested_wait: u64) -> u64 {
    let base = BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
    let max_wait = suggested_wait.min(MAX_RETRY_AFTER_SECS) * 1000;

    // Use the larger of calculated backoff or suggested wait
    let delay = base.max(max_wait);

    // Add some jitter (10% random variation)
    let jitter = delay / 10;
    delay + (rand_jitter() % jitter.max(1))
}

/// Generate a pseudo-random jitter value
fn rand_jitter() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64 % 1000)
        .unwrap_or(0)
}

/// Extract retry-after value from error response
fn extract_retry_after(body: &str) -> Option<u64> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(retry_after) = json.get("retry_after").and_then(|v| v.as_u64()) {
            return Some(retry_after);
        }
        if let Some(retry_after) = json
            .get("error")
            .and_then(|error| error.get("retry_after"))
            .and_then(|v| v.as_u64())
        {
            return Some(retry_after);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_provider() -> HttpProvider {
        HttpProvider::builder()
            .api_key("test-key")
            .base_url("https://example.com")
            .timeout_secs(5)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder() {
        let provider = test_provider();
        assert_eq!(provider.base_url(), "https://example.com");
        assert_eq!(provider.embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(provider.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_builder_requires_api_key() {
        let result = HttpProvider::builder().build();
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_builder_defaults_to_openrouter() {
        let provider = HttpProvider::builder().api_key("k").build().unwrap();
        assert_eq!(provider.base_url(), OPENROUTER_BASE_URL);
    }

    #[test]
    fn test_from_settings_uses_configured_key() {
        let settings = ProviderSettings {
            api_key: Some("direct-key".to_string()),
            ..ProviderSettings::default()
        };

        let provider = HttpProvider::from_settings(&settings).unwrap();
        assert_eq!(provider.api_key, "direct-key");
        assert_eq!(provider.base_url(), OPENROUTER_BASE_URL);
    }

    #[test]
    fn test_debug_hides_api_key() {
        let provider = test_provider();
        let debug = format!("{:?}", provider);
        assert!(debug.contains("HttpProvider"));
        assert!(!debug.contains("test-key"));
    }

    #[test]
    fn test_provider_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpProvider>();
    }

    #[test]
    fn test_handle_error_response_unauthorized() {
        let error = handle_error_response("m", reqwest::StatusCode::UNAUTHORIZED, "");
        match error {
            Error::ProviderError { model, message } => {
                assert_eq!(model, "m");
                assert!(message.contains("unauthorized"));
            }
            other => panic!("expected ProviderError, got {:?}", other),
        }
    }

    #[test]
    fn test_handle_error_response_rate_limited() {
        let error = handle_error_response(
            "m",
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"retry_after": 30}"#,
        );
        assert!(matches!(error, Error::RateLimited(30)));

        // No hint in the body falls back to 60 seconds
        let error = handle_error_response("m", reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(error, Error::RateLimited(60)));
    }

    #[test]
    fn test_handle_error_response_server_error() {
        let error = handle_error_response(
            "m",
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            "overloaded",
        );
        match error {
            Error::ProviderError { message, .. } => {
                assert!(message.contains("server error"));
                assert!(message.contains("overloaded"));
            }
            other => panic!("expected ProviderError, got {:?}", other),
        }
    }

    #[test]
    fn test_calculate_backoff() {
        let backoff1 = calculate_backoff(1, 0);
        assert!(backoff1 >= BACKOFF_BASE_MS);

        let backoff2 = calculate_backoff(2, 0);
        assert!(backoff2 >= BACKOFF_BASE_MS * 2);

        // With suggested wait
        let backoff_with_wait = calculate_backoff(1, 5);
        assert!(backoff_with_wait >= 5000);
    }

    #[test]
    fn test_calculate_backoff_clamps_hostile_retry_after() {
        // A response body can claim any retry_after; the delay must stay
        // bounded instead of overflowing the millisecond conversion
        let backoff = calculate_backoff(1, u64::MAX);
        let ceiling = MAX_RETRY_AFTER_SECS * 1000;
        assert!(backoff >= ceiling);
        assert!(backoff <= ceiling + ceiling / 10);

        let backoff = calculate_backoff(2, MAX_RETRY_AFTER_SECS + 1);
        assert!(backoff <= ceiling + ceiling / 10);
    }

    #[test]
    fn test_extract_retry_after() {
        let body = r#"{"retry_after": 30}"#;
        assert_eq!(extract_retry_after(body), Some(30));

        let body = r#"{"error": {"retry_after": 60}}"#;
        assert_eq!(extract_retry_after(body), Some(60));

        let body = r#"{"message": "rate limited"}"#;
        assert_eq!(extract_retry_after(body), None);
    }
}
