pub mod extractor;
pub mod prompt;
pub mod sanitize;
pub mod schema;
pub mod validate;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::error::SyllabusError;

pub use extractor::{ExtractorSettings, StructuredExtractor};
pub use schema::{FieldSpec, OutputSchema};

/// What the model is asked about: one text, or several texts answered in a
/// single round-trip with one result object each.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserContent {
    Single(String),
    Batch(Vec<String>),
}

impl UserContent {
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    pub fn batch_len(&self) -> Option<usize> {
        match self {
            Self::Single(_) => None,
            Self::Batch(items) => Some(items.len()),
        }
    }
}

impl From<String> for UserContent {
    fn from(text: String) -> Self {
        Self::Single(text)
    }
}

impl From<&str> for UserContent {
    fn from(text: &str) -> Self {
        Self::Single(text.to_string())
    }
}

impl From<Vec<String>> for UserContent {
    fn from(items: Vec<String>) -> Self {
        Self::Batch(items)
    }
}

impl From<Vec<&str>> for UserContent {
    fn from(items: Vec<&str>) -> Self {
        Self::Batch(items.into_iter().map(str::to_string).collect())
    }
}

/// One unit of extraction work. Unset sampling fields fall back to the
/// extractor's settings.
#[derive(Clone, Debug)]
pub struct ExtractionRequest {
    pub system_prompt: String,
    pub user: UserContent,
    pub schema: OutputSchema,
    pub default_category: Option<String>,
    pub values_only: bool,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub num_tries: Option<u32>,
    pub verbose: bool,
}

impl ExtractionRequest {
    pub fn new(
        system_prompt: impl Into<String>,
        user: impl Into<UserContent>,
        schema: OutputSchema,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user: user.into(),
            schema,
            default_category: None,
            values_only: false,
            model: None,
            temperature: None,
            num_tries: None,
            verbose: false,
        }
    }

    /// Empty string means "no default".
    pub fn default_category(mut self, category: impl Into<String>) -> Self {
        let category = category.into();
        self.default_category = (!category.is_empty()).then_some(category);
        self
    }

    pub fn values_only(mut self, values_only: bool) -> Self {
        self.values_only = values_only;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn num_tries(mut self, num_tries: u32) -> Self {
        self.num_tries = Some(num_tries);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Outcome of an extraction that reached the model.
#[derive(Clone, Debug, PartialEq)]
pub enum Extraction {
    /// Schema-conformant output: one value for single input, an array for batch.
    Data(Value),
    /// Every attempt failed validation. `failures` holds one message per attempt.
    Empty {
        batch: bool,
        attempts: u32,
        failures: Vec<String>,
    },
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Data(value) => Some(value),
            Self::Empty { .. } => None,
        }
    }

    /// Collapse to plain JSON: `[]` or `{}` when nothing usable came back.
    pub fn into_value(self) -> Value {
        match self {
            Self::Data(value) => value,
            Self::Empty { batch: true, .. } => Value::Array(Vec::new()),
            Self::Empty { batch: false, .. } => Value::Object(Default::default()),
        }
    }

    /// Deserialize the data into `T`. `Ok(None)` for an empty extraction.
    pub fn parse<T: DeserializeOwned>(self) -> Result<Option<T>, SyllabusError> {
        match self {
            Self::Data(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| SyllabusError::SchemaParse(format!("extraction result: {e}"))),
            Self::Empty { .. } => Ok(None),
        }
    }
}

/// Why a single attempt was rejected. Fed back to the model verbatim.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AttemptFailure {
    #[error("response is not a JSON object or array (starts with {preview:?})")]
    NotJson { preview: String },

    #[error("invalid JSON: {0}")]
    Syntax(String),

    #[error("output format not in an array of json")]
    ExpectedArray,

    #[error("expected {expected} json objects, one per input element, got {found}")]
    WrongCount { expected: usize, found: usize },

    #[error("element {index} is not a json object")]
    NotAnObject { index: usize },

    #[error("{key} not in json output")]
    MissingKey { key: String },

    #[error("{key} must be one of the listed values, got {found}")]
    InvalidChoice { key: String, found: String },
}
