use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::SyllabusError;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Config file looked up in the working directory when `SYLLABUS_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "syllabus.toml";

/// `KEY=value` file consulted for keys the process environment lacks.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Wire format spoken by the completion endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFormat {
    /// Google `models/{model}:generateContent`.
    #[default]
    Gemini,
    /// OpenAI-compatible chat completions.
    OpenAi,
}

impl FromStr for ApiFormat {
    type Err = SyllabusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            other => Err(SyllabusError::Config(format!("unknown api format: {other}"))),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_format: ApiFormat,
    /// Overrides the endpoint implied by `api_format`.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    /// Upper bound on a single completion call.
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_format: ApiFormat::Gemini,
            base_url: None,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: 1.0,
            top_p: 0.8,
            top_k: 40,
            request_timeout_secs: 60,
        }
    }
}

impl ProviderConfig {
    pub fn base_url(&self) -> &str {
        match (&self.base_url, self.api_format) {
            (Some(url), _) => url,
            (None, ApiFormat::Gemini) => GEMINI_BASE_URL,
            (None, ApiFormat::OpenAi) => OPENAI_BASE_URL,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self.api_format {
            ApiFormat::Gemini => "gemini",
            ApiFormat::OpenAi => "openai",
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_format", &self.api_format)
            .field("base_url", &self.base_url())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("top_k", &self.top_k)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Attempts per extraction before giving up with an empty result.
    pub num_tries: u32,
    /// Log full prompts and responses at info level.
    pub verbose: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            num_tries: 3,
            verbose: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_per_window: u32,
    pub window_secs: u64,
    pub min_spacing_ms: u64,
    /// Per-dispatch bound. 0 disables it.
    pub dispatch_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_per_window: 20,
            window_secs: 60,
            min_spacing_ms: 10_000,
            dispatch_timeout_secs: 300,
        }
    }
}

impl QueueConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        (self.dispatch_timeout_secs > 0).then(|| Duration::from_secs(self.dispatch_timeout_secs))
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub extraction: ExtractionConfig,
    pub queue: QueueConfig,
}

impl Config {
    /// File (if any) first, then environment overrides, with `./.env`
    /// filling in whatever the process environment does not set.
    pub fn load() -> Result<Self, SyllabusError> {
        Self::load_with_env_file(Path::new(DEFAULT_ENV_FILE))
    }

    pub fn load_with_env_file(env_file: &Path) -> Result<Self, SyllabusError> {
        let dotenv = read_env_file(env_file)?;
        let lookup = |key: &str| env::var(key).ok().or_else(|| dotenv.get(key).cloned());

        let path = match lookup("SYLLABUS_CONFIG") {
            Some(p) => Some(PathBuf::from(p)),
            None => {
                let p = PathBuf::from(DEFAULT_CONFIG_FILE);
                p.exists().then_some(p)
            }
        };

        let mut config = match path {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        config.validate()?;

        if config.provider.api_key.is_none() {
            tracing::warn!("no API key configured (GEMINI_API_KEY / SYLLABUS_API_KEY)");
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, SyllabusError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyllabusError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SyllabusError> {
        toml::from_str(text).map_err(|e| SyllabusError::Config(e.to_string()))
    }

    /// Apply `SYLLABUS_*` style overrides from an arbitrary lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SyllabusError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("SYLLABUS_API_KEY").or_else(|| lookup("GEMINI_API_KEY")) {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = lookup("SYLLABUS_BASE_URL") {
            self.provider.base_url = Some(url);
        }
        if let Some(model) = lookup("SYLLABUS_MODEL") {
            self.provider.model = model;
        }
        if let Some(format) = lookup("SYLLABUS_API_FORMAT") {
            self.provider.api_format = format.parse()?;
        }
        if let Some(ms) = lookup("SYLLABUS_MIN_SPACING_MS") {
            self.queue.min_spacing_ms = ms
                .parse()
                .map_err(|e| SyllabusError::Config(format!("SYLLABUS_MIN_SPACING_MS: {e}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SyllabusError> {
        if self.extraction.num_tries == 0 {
            return Err(SyllabusError::Config("extraction.num_tries must be at least 1".into()));
        }
        if self.queue.max_per_window == 0 {
            return Err(SyllabusError::Config("queue.max_per_window must be at least 1".into()));
        }
        if self.queue.window_secs == 0 {
            return Err(SyllabusError::Config("queue.window_secs must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(SyllabusError::Config(format!(
                "provider.temperature out of range: {}",
                self.provider.temperature
            )));
        }
        Ok(())
    }
}

/// Pairs from a dotenv file, without touching the process environment.
/// A missing file reads as empty.
fn read_env_file(path: &Path) -> Result<HashMap<String, String>, SyllabusError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let config_err = |e: dotenvy::Error| SyllabusError::Config(format!("{}: {e}", path.display()));
    dotenvy::from_path_iter(path)
        .map_err(config_err)?
        .map(|item| item.map_err(config_err))
        .collect()
}
