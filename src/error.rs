use thiserror::Error;

/// Failures that escape the extractor or the request queue.
///
/// Schema and syntax problems in model output never show up here; those are
/// retried inside the extractor and end as `Extraction::Empty` at worst.
#[derive(Debug, Error)]
pub enum SyllabusError {
    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("upstream error from {provider}: {message}")]
    Upstream {
        provider: String,
        message: String,
        status: Option<u16>,
    },

    #[error("auth failed for {provider}: {message}")]
    AuthFailed { provider: String, message: String },

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("request queue closed before dispatch")]
    QueueClosed,

    #[error("{0}")]
    Other(String),
}

impl SyllabusError {
    /// Extract provider name from structured error variants.
    /// Returns None for variants that don't carry provider context.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::RateLimited { provider } => Some(provider),
            Self::Upstream { provider, .. } => Some(provider),
            Self::AuthFailed { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Returns true for transient errors that may succeed if the caller
    /// submits the request again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Timeout(_) => true,
            // status: None means the body was unusable, not that the server hiccuped
            Self::Upstream { status, .. } => status.is_some_and(|s| s >= 500),
            Self::Request(_) => true,
            _ => false,
        }
    }

    /// Message safe to show to end users. Does not leak endpoint URLs,
    /// keys or upstream response bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout(ms) => format!("generation timed out after {ms}ms"),
            Self::RateLimited { provider } => {
                format!("rate limited by {provider}, try again shortly")
            }
            Self::Upstream {
                provider, status, ..
            } => match status {
                Some(code) => format!("upstream error from {provider} (HTTP {code})"),
                None => format!("upstream error from {provider}"),
            },
            Self::AuthFailed { provider, .. } => {
                format!("authentication failed for {provider}")
            }
            Self::SchemaParse(_) => "failed to parse provider response".to_string(),
            Self::Request(_) => "request to provider failed".to_string(),
            Self::Config(msg) => format!("configuration error: {msg}"),
            Self::QueueClosed => "generation queue shut down".to_string(),
            Self::Other(msg) => msg.clone(),
        }
    }
}
