pub mod http;

use std::future::Future;
use std::sync::Arc;

use crate::error::SyllabusError;

/// One completion call. Everything structural lives in `prompt`; the
/// provider sees plain text in and plain text out.
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    pub prompt: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
}

#[derive(Debug)]
pub struct ProviderResult {
    pub text: String,
    pub model: String,
    pub provider: String,
    pub latency_ms: u64,
}

/// Single-shot text completion backend.
///
/// `Err` is reserved for transport-level failures (connectivity, auth,
/// non-2xx, unreadable envelope). Whatever text the model returns, however
/// malformed, is an `Ok`.
pub trait CompletionProvider: Send + Sync {
    fn complete(
        &self,
        req: &ProviderRequest,
    ) -> impl Future<Output = Result<ProviderResult, SyllabusError>> + Send;
}

impl<P: CompletionProvider> CompletionProvider for Arc<P> {
    fn complete(
        &self,
        req: &ProviderRequest,
    ) -> impl Future<Output = Result<ProviderResult, SyllabusError>> + Send {
        (**self).complete(req)
    }
}
