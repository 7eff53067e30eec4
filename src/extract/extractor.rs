use serde_json::Value;
use tokio::time::Instant;

use crate::config::Config;
use crate::dispatch::{CompletionProvider, ProviderRequest};
use crate::error::SyllabusError;

use super::{AttemptFailure, Extraction, ExtractionRequest, prompt, sanitize, validate};

/// Defaults applied when a request leaves a sampling field unset.
#[derive(Clone, Debug)]
pub struct ExtractorSettings {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub num_tries: u32,
    pub verbose: bool,
}

impl ExtractorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.provider.model.clone(),
            temperature: config.provider.temperature,
            top_p: config.provider.top_p,
            top_k: config.provider.top_k,
            num_tries: config.extraction.num_tries,
            verbose: config.extraction.verbose,
        }
    }
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Turns free-text completions into schema-conformant JSON.
///
/// Each attempt sends the caller's system prompt plus a format block and the
/// feedback from earlier failures, then sanitizes, parses and validates the
/// reply. Sampling parameters stay fixed across attempts; only the feedback
/// grows.
pub struct StructuredExtractor<P> {
    provider: P,
    settings: ExtractorSettings,
}

impl<P: CompletionProvider> StructuredExtractor<P> {
    pub fn new(provider: P, settings: ExtractorSettings) -> Self {
        Self { provider, settings }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    /// Run the attempt loop.
    ///
    /// # Errors
    ///
    /// Only transport failures from the provider. Output that never passes
    /// validation yields `Ok(Extraction::Empty { .. })`.
    pub async fn extract(&self, request: &ExtractionRequest) -> Result<Extraction, SyllabusError> {
        if request.user.batch_len() == Some(0) {
            return Ok(Extraction::Data(Value::Array(Vec::new())));
        }

        let start = Instant::now();
        let num_tries = request.num_tries.unwrap_or(self.settings.num_tries).max(1);
        let verbose = request.verbose || self.settings.verbose;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.settings.model.clone());
        let temperature = request.temperature.unwrap_or(self.settings.temperature);

        let instructions = prompt::format_instructions(&request.schema, request.user.batch_len());
        let user_text = prompt::render_user_content(&request.user);
        let mut feedback = String::new();
        let mut failures = Vec::new();

        for attempt in 1..=num_tries {
            let full_prompt =
                prompt::assemble(&request.system_prompt, &instructions, &feedback, &user_text);
            if verbose {
                tracing::info!(attempt, prompt = %full_prompt, "extraction prompt");
            } else {
                tracing::debug!(attempt, prompt_chars = full_prompt.len(), "extraction prompt");
            }

            let provider_req = ProviderRequest {
                prompt: full_prompt,
                model: model.clone(),
                temperature,
                top_p: self.settings.top_p,
                top_k: self.settings.top_k,
            };
            let result = self.provider.complete(&provider_req).await?;

            if verbose {
                tracing::info!(attempt, response = %result.text, "model response");
            } else {
                tracing::debug!(
                    attempt,
                    latency_ms = result.latency_ms,
                    response_chars = result.text.len(),
                    "model response"
                );
            }

            match Self::check(&result.text, request) {
                Ok(value) => {
                    tracing::debug!(
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "extraction succeeded"
                    );
                    return Ok(Extraction::Data(value));
                }
                Err(failure) => {
                    tracing::warn!(
                        attempt,
                        num_tries,
                        error = %failure,
                        "extraction attempt failed"
                    );
                    feedback.push_str(&prompt::attempt_feedback(attempt, num_tries, &failure));
                    failures.push(failure.to_string());
                }
            }
        }

        tracing::error!(
            attempts = num_tries,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "all attempts failed to generate valid structured output"
        );
        Ok(Extraction::Empty {
            batch: request.user.is_batch(),
            attempts: num_tries,
            failures,
        })
    }

    fn check(raw: &str, request: &ExtractionRequest) -> Result<Value, AttemptFailure> {
        let text = sanitize::sanitize(raw)?;
        let parsed = sanitize::parse(&text)?;
        validate::normalize(
            parsed,
            &request.schema,
            &request.user,
            request.default_category.as_deref(),
            request.values_only,
        )
    }
}
