//! LLM integration: a small provider-agnostic completion client.
//!
//! The assistant only needs "prompt in, text out", so every provider is
//! reduced to a single [`CompletionProvider::complete`] call. Without an API
//! key the client answers with a canned response instead of failing.

mod error;
pub mod prompts;
pub mod response;

pub use error::LlmError;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::AssistantConfig;
use response::extract_code_block;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
}

impl Provider {
    pub fn parse(name: &str) -> Result<Self, LlmError> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "gemini" | "google" => Ok(Provider::Gemini),
            other => Err(LlmError::UnsupportedProvider(other.to_string())),
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4",
            Provider::Anthropic => "claude-3-opus-20240229",
            Provider::Gemini => "gemini-1.5-flash",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError>;

    /// Whether requests reach a real model (as opposed to canned answers).
    fn is_available(&self) -> bool;

    fn name(&self) -> String;

    /// Ask for JSON and parse it. A ```json block is preferred; text that is
    /// not JSON at all comes back as `{"text": ...}`.
    async fn complete_json(&self, prompt: &str, max_tokens: u32) -> Result<Value, LlmError> {
        let json_prompt = format!("{prompt}\n\nPlease format your response as valid JSON.");
        let raw = self.complete(&json_prompt, max_tokens).await?;

        let candidate = extract_code_block(&raw, "json").unwrap_or_else(|| raw.trim().to_string());
        Ok(serde_json::from_str(&candidate).unwrap_or_else(|_| json!({ "text": raw })))
    }
}

const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_secs(4);

/// Configured pause between requests. Negative values mean no pause; values
/// that are not a representable duration fall back to the default.
fn request_interval(secs: f64) -> Duration {
    if secs.is_finite() && secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or_else(|err| {
        warn!(
            "Invalid min_request_interval_secs {secs}: {err}, using {}s",
            DEFAULT_REQUEST_INTERVAL.as_secs()
        );
        DEFAULT_REQUEST_INTERVAL
    })
}

/// Enforces a minimum pause between consecutive requests.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub async fn wait_if_needed(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                info!("Rate limiting: waiting {:.2}s before next API call", wait.as_secs_f64());
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

pub struct LlmClient {
    provider: Provider,
    model: String,
    api_key: String,
    http: Client,
    limiter: RateLimiter,
}

impl LlmClient {
    pub fn new(provider: &str, model: &str, api_key: &str) -> Result<Self, LlmError> {
        let provider = Provider::parse(provider)?;
        let model = if model.trim().is_empty() {
            provider.default_model().to_string()
        } else {
            model.to_string()
        };
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            provider,
            model,
            api_key: api_key.to_string(),
            http,
            limiter: RateLimiter::new(DEFAULT_REQUEST_INTERVAL),
        })
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self, LlmError> {
        let mut client = Self::new(&config.llm_provider, &config.llm_model, &config.llm_api_key)?;
        client.http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        client.limiter = RateLimiter::new(request_interval(config.min_request_interval_secs));
        Ok(client)
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        match self.provider {
            Provider::OpenAi => "https://api.openai.com/v1/chat/completions".to_string(),
            Provider::Anthropic => "https://api.anthropic.com/v1/messages".to_string(),
            Provider::Gemini => format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                self.model
            ),
        }
    }

    fn request_body(&self, prompt: &str, max_tokens: u32) -> Value {
        match self.provider {
            Provider::OpenAi | Provider::Anthropic => json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }],
                "max_tokens": max_tokens,
            }),
            Provider::Gemini => json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
                "generationConfig": {
                    "maxOutputTokens": max_tokens,
                    "temperature": 0.7,
                    "topP": 0.95,
                    "topK": 40,
                },
            }),
        }
    }

    async fn send(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        let mut request = self
            .http
            .post(self.endpoint())
            .header("content-type", "application/json")
            .json(&self.request_body(prompt, max_tokens));

        request = match self.provider {
            Provider::OpenAi => request.bearer_auth(&self.api_key),
            Provider::Anthropic => request
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01"),
            Provider::Gemini => request.query(&[("key", self.api_key.as_str())]),
        };

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            if status == 429 {
                warn!("Rate limit exceeded (429 Too Many Requests). Consider increasing min_request_interval_secs.");
            }
            return Err(LlmError::Http { status, body });
        }

        let payload: Value = response.json().await?;
        extract_text(self.provider, &payload)
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        if !self.is_available() {
            warn!("API key not set, returning mock response");
            return Ok(mock_response(prompt));
        }

        self.limiter.wait_if_needed().await;
        debug!(provider = %self.provider, model = %self.model, "Sending completion request");
        self.send(prompt, max_tokens).await
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn name(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

fn extract_text(provider: Provider, payload: &Value) -> Result<String, LlmError> {
    let malformed = |message: String| LlmError::MalformedResponse {
        provider: provider.to_string(),
        message,
    };

    match provider {
        Provider::OpenAi => {
            let parsed: OpenAiResponse =
                serde_json::from_value(payload.clone()).map_err(|e| malformed(e.to_string()))?;
            parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content.unwrap_or_default())
                .ok_or_else(|| malformed("no choices in response".to_string()))
        }
        Provider::Anthropic => {
            let parsed: AnthropicResponse =
                serde_json::from_value(payload.clone()).map_err(|e| malformed(e.to_string()))?;
            parsed
                .content
                .into_iter()
                .next()
                .map(|c| c.text)
                .ok_or_else(|| malformed("no content blocks in response".to_string()))
        }
        Provider::Gemini => {
            let parsed: GeminiResponse =
                serde_json::from_value(payload.clone()).map_err(|e| malformed(e.to_string()))?;
            let candidate = parsed
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .ok_or_else(|| malformed(format!("cannot parse response: {payload}")))?;
            Ok(candidate
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>())
        }
    }
}

const MOCK_ANALYSIS: &str = r#"
## Code Analysis Result (Mock Response)

### Structure Evaluation
This code has a clear structure with class definitions and functions, but there are some areas for improvement:
1. Consider a more modular design
2. Some functions might be too complex and could be broken down into smaller functions

### Potential Issues
1. Use of global variables might make maintenance difficult
2. Some functions lack sufficient error handling
3. There are hardcoded values that could be moved to configuration files

### Design Pattern Suggestions
1. Factory Pattern - For object creation
2. Strategy Pattern - For different data processing strategies

### Code Style
1. Add more complete docstrings
2. Ensure function names follow PEP 8 naming conventions

Note: This is a mock response, no actual LLM analysis was performed. Set a valid API key for a real analysis.
"#;

/// Answer used when no API key is configured.
pub fn mock_response(prompt: &str) -> String {
    if prompt.contains("```python") {
        MOCK_ANALYSIS.to_string()
    } else {
        "Unable to analyze the provided content. This is a mock response because no API key was set."
            .to_string()
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Scripted provider: hands out queued responses in order and records prompts.
    #[derive(Clone, Default)]
    pub struct ScriptedProvider {
        responses: Arc<StdMutex<Vec<String>>>,
        pub prompts: Arc<StdMutex<Vec<String>>>,
    }

    impl ScriptedProvider {
        pub fn new(responses: &[&str]) -> Self {
            let mut queued: Vec<String> = responses.iter().map(|r| r.to_string()).collect();
            queued.reverse();
            Self {
                responses: Arc::new(StdMutex::new(queued)),
                prompts: Arc::new(StdMutex::new(Vec::new())),
            }
        }

        pub fn last_prompt(&self) -> Option<String> {
            self.prompts.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.responses.lock().unwrap().pop().unwrap_or_default())
        }

        fn is_available(&self) -> bool {
            true
        }

        fn name(&self) -> String {
            "scripted".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(Provider::parse("OpenAI").unwrap(), Provider::OpenAi);
        assert_eq!(Provider::parse("gemini").unwrap(), Provider::Gemini);
        assert!(matches!(
            Provider::parse("cohere"),
            Err(LlmError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_client_defaults_model() {
        let client = LlmClient::new("anthropic", "", "").unwrap();
        assert_eq!(client.model(), "claude-3-opus-20240229");
        assert!(!client.is_available());
        assert!(LlmClient::new("nope", "", "").is_err());
    }

    #[test]
    fn test_gemini_endpoint_uses_model() {
        let client = LlmClient::new("gemini", "gemini-1.5-pro", "k").unwrap();
        assert!(client.endpoint().ends_with("models/gemini-1.5-pro:generateContent"));
        let body = client.request_body("hi", 500);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 500);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn test_mock_response_without_key() {
        let client = LlmClient::new("openai", "", "").unwrap();
        let with_code = client.complete("```python\nx = 1\n```", 100).await.unwrap();
        assert!(with_code.contains("Mock Response"));

        let plain = client.complete("hello", 100).await.unwrap();
        assert!(plain.starts_with("Unable to analyze"));
    }

    #[test]
    fn test_extract_text_per_provider() {
        let openai = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(extract_text(Provider::OpenAi, &openai).unwrap(), "hello");

        let anthropic = json!({"content": [{"type": "text", "text": "hi there"}]});
        assert_eq!(extract_text(Provider::Anthropic, &anthropic).unwrap(), "hi there");

        let gemini = json!({"candidates": [{"content": {"parts": [{"text": "a"}, {"text": "b"}]}}]});
        assert_eq!(extract_text(Provider::Gemini, &gemini).unwrap(), "ab");

        let empty = json!({"candidates": []});
        assert!(matches!(
            extract_text(Provider::Gemini, &empty),
            Err(LlmError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_complete_json_prefers_fenced_block() {
        let provider = ScriptedProvider::new(&[
            "Sure:\n```json\n{\"score\": 3}\n```",
            "not json at all",
        ]);

        let value = provider.complete_json("rate it", 100).await.unwrap();
        assert_eq!(value["score"], 3);
        assert!(provider
            .last_prompt()
            .unwrap()
            .ends_with("Please format your response as valid JSON."));

        let fallback = provider.complete_json("again", 100).await.unwrap();
        assert_eq!(fallback["text"], "not json at all");
    }

    #[test]
    fn test_request_interval_from_config() {
        assert_eq!(request_interval(1.5), Duration::from_millis(1500));
        assert_eq!(request_interval(-3.0), Duration::ZERO);
        assert_eq!(request_interval(f64::INFINITY), DEFAULT_REQUEST_INTERVAL);
        assert_eq!(request_interval(f64::NEG_INFINITY), DEFAULT_REQUEST_INTERVAL);
        assert_eq!(request_interval(f64::NAN), DEFAULT_REQUEST_INTERVAL);
        assert_eq!(request_interval(1e300), DEFAULT_REQUEST_INTERVAL);

        let config = AssistantConfig {
            min_request_interval_secs: f64::INFINITY,
            ..AssistantConfig::default()
        };
        let client = LlmClient::from_config(&config).unwrap();
        assert_eq!(client.limiter.min_interval, DEFAULT_REQUEST_INTERVAL);
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let start = Instant::now();
        limiter.wait_if_needed().await;
        limiter.wait_if_needed().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
