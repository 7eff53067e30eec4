//! Scripted completion provider for exercising the extractor and the
//! request queue without network calls.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::dispatch::{CompletionProvider, ProviderRequest, ProviderResult};
use crate::error::SyllabusError;

/// Record of one call made to the provider.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub prompt: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub at: Instant,
}

/// Replays queued replies in order, then `fallback` (if set) forever.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, SyllabusError>>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw model reply.
    pub fn reply(self, text: impl Into<String>) -> Self {
        lock(&self.script).push_back(Ok(text.into()));
        self
    }

    /// Queue a transport failure.
    pub fn fail(self, error: SyllabusError) -> Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    /// Reply used once the script runs out.
    pub fn fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// Simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, req: &ProviderRequest) -> Result<ProviderResult, SyllabusError> {
        lock(&self.calls).push(RecordedCall {
            prompt: req.prompt.clone(),
            model: req.model.clone(),
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            at: Instant::now(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = lock(&self.script).pop_front();
        let text = match (next, &self.fallback) {
            (Some(reply), _) => reply?,
            (None, Some(text)) => text.clone(),
            (None, None) => return Err(SyllabusError::Other("script exhausted".to_string())),
        };

        Ok(ProviderResult {
            text,
            model: req.model.clone(),
            provider: "scripted".to_string(),
            latency_ms: 0,
        })
    }
}
