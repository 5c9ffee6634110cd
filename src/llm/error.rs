use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Unsupported LLM provider: {0} (expected openai, anthropic or gemini)")]
    UnsupportedProvider(String),

    #[error("API error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },
}
