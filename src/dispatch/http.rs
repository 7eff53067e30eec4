use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;

use crate::config::{ApiFormat, ProviderConfig};
use crate::dispatch::{CompletionProvider, ProviderRequest, ProviderResult};
use crate::error::SyllabusError;

pub const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// HTTP completion backend for Gemini or any OpenAI-compatible endpoint.
pub struct HttpDispatch {
    client: Client,
    config: ProviderConfig,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize)]
struct GenerateContent {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

impl HttpDispatch {
    pub fn new(config: ProviderConfig) -> Result<Self, SyllabusError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub async fn query_model(
        &self,
        req: &ProviderRequest,
    ) -> Result<ProviderResult, SyllabusError> {
        let start = Instant::now();
        let provider = self.config.provider_name();
        let (url, headers, body) = build_request(&self.config, req);

        let mut builder = self
            .client
            .post(&url)
            .timeout(self.config.request_timeout())
            .json(&body);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SyllabusError::Timeout(self.config.request_timeout().as_millis() as u64)
            } else {
                SyllabusError::Request(e)
            }
        })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SyllabusError::RateLimited {
                provider: provider.to_string(),
            });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SyllabusError::AuthFailed {
                provider: provider.to_string(),
                message: format!("{status}"),
            });
        }

        // Cap error body reads to MAX_RESPONSE_BYTES
        if !status.is_success() {
            let error_bytes = response.bytes().await.unwrap_or_default();
            let truncated = &error_bytes[..error_bytes.len().min(MAX_RESPONSE_BYTES)];
            let text = String::from_utf8_lossy(truncated);
            return Err(SyllabusError::Upstream {
                provider: provider.to_string(),
                message: format!("{status}: {text}"),
                status: Some(status.as_u16()),
            });
        }

        if let Some(len) = response.content_length()
            && len as usize > MAX_RESPONSE_BYTES
        {
            return Err(too_large(provider, len as usize));
        }

        let bytes = response.bytes().await.map_err(|e| SyllabusError::Upstream {
            provider: provider.to_string(),
            message: format!("failed to read response body: {e}"),
            status: None,
        })?;

        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(too_large(provider, bytes.len()));
        }

        let text = parse_completion(self.config.api_format, provider, &bytes)?;
        let latency_ms = start.elapsed().as_millis() as u64;

        Ok(ProviderResult {
            text,
            model: req.model.clone(),
            provider: provider.to_string(),
            latency_ms,
        })
    }
}

impl CompletionProvider for HttpDispatch {
    async fn complete(&self, req: &ProviderRequest) -> Result<ProviderResult, SyllabusError> {
        self.query_model(req).await
    }
}

fn too_large(provider: &str, len: usize) -> SyllabusError {
    SyllabusError::Upstream {
        provider: provider.to_string(),
        message: format!("response too large: {len} bytes (max {MAX_RESPONSE_BYTES})"),
        status: None,
    }
}

/// Build the wire request. Returns (url, headers, body).
pub fn build_request(
    config: &ProviderConfig,
    req: &ProviderRequest,
) -> (String, Vec<(String, String)>, serde_json::Value) {
    let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];

    match config.api_format {
        ApiFormat::Gemini => {
            let url = format!(
                "{}/models/{}:generateContent",
                config.base_url().trim_end_matches('/'),
                req.model
            );
            if let Some(key) = &config.api_key {
                headers.push(("x-goog-api-key".to_string(), key.clone()));
            }
            let body = serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": req.prompt}]}],
                "generationConfig": {
                    "temperature": req.temperature,
                    "topP": req.top_p,
                    "topK": req.top_k,
                },
            });
            (url, headers, body)
        }
        ApiFormat::OpenAi => {
            if let Some(key) = &config.api_key {
                headers.push(("Authorization".to_string(), format!("Bearer {key}")));
            }
            // top_k has no chat-completions equivalent
            let body = serde_json::json!({
                "model": req.model,
                "messages": [{"role": "user", "content": req.prompt}],
                "temperature": req.temperature,
                "top_p": req.top_p,
            });
            (config.base_url().to_string(), headers, body)
        }
    }
}

/// Pull the generated text out of a provider envelope.
pub fn parse_completion(
    format: ApiFormat,
    provider: &str,
    body: &[u8],
) -> Result<String, SyllabusError> {
    let text = match format {
        ApiFormat::Gemini => {
            let completion: GenerateContent = serde_json::from_slice(body)
                .map_err(|e| SyllabusError::SchemaParse(format!("failed to parse response: {e}")))?;
            completion
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|c| {
                    c.parts
                        .into_iter()
                        .filter_map(|p| p.text)
                        .collect::<Vec<_>>()
                        .join("")
                })
                .filter(|t| !t.is_empty())
        }
        ApiFormat::OpenAi => {
            let completion: ChatCompletion = serde_json::from_slice(body)
                .map_err(|e| SyllabusError::SchemaParse(format!("failed to parse response: {e}")))?;
            completion
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
        }
    };

    text.ok_or_else(|| SyllabusError::Upstream {
        provider: provider.to_string(),
        message: "empty candidates or null content".to_string(),
        status: None,
    })
}
