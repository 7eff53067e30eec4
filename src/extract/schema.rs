use serde_json::{Map, Value};

use crate::error::SyllabusError;

/// Declared type of one output field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldSpec {
    /// Free text; the string is the description shown to the model.
    Text(String),
    /// Exactly one of a fixed set of values.
    Choice(Vec<String>),
    /// Any other JSON shape. Only presence is checked.
    Nested(Value),
}

/// Ordered key → field mapping describing the desired result object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputSchema {
    fields: Vec<(String, FieldSpec)>,
}

/// True if `s` holds a `<...>` template slot.
pub fn is_placeholder(s: &str) -> bool {
    s.find('<').is_some_and(|open| s[open + 1..].contains('>'))
}

impl OutputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(self, key: impl Into<String>, description: impl Into<String>) -> Self {
        self.field(key, FieldSpec::Text(description.into()))
    }

    pub fn choice<I, S>(self, key: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field(key, FieldSpec::Choice(options.into_iter().map(Into::into).collect()))
    }

    pub fn nested(self, key: impl Into<String>, shape: Value) -> Self {
        self.field(key, FieldSpec::Nested(shape))
    }

    /// Insert or replace a field, keeping first-insertion order.
    pub fn field(mut self, key: impl Into<String>, spec: FieldSpec) -> Self {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = spec,
            None => self.fields.push((key, spec)),
        }
        self
    }

    /// Build from a JSON object: strings are free text, arrays of strings are
    /// choices, anything else is nested.
    pub fn from_value(value: &Value) -> Result<Self, SyllabusError> {
        let Value::Object(map) = value else {
            return Err(SyllabusError::Config(format!(
                "output schema must be a JSON object, got {value}"
            )));
        };

        let mut schema = Self::new();
        for (key, spec) in map {
            let spec = match spec {
                Value::String(description) => FieldSpec::Text(description.clone()),
                Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_string) => {
                    FieldSpec::Choice(
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                    )
                }
                other => FieldSpec::Nested(other.clone()),
            };
            schema = schema.field(key.clone(), spec);
        }
        Ok(schema)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(k, spec)| (k.as_str(), spec))
    }

    pub fn get(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, spec)| spec)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keys that must appear verbatim in every result object.
    pub fn required_keys(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| !is_placeholder(k))
    }

    pub fn has_choices(&self) -> bool {
        self.fields
            .iter()
            .any(|(_, spec)| matches!(spec, FieldSpec::Choice(_)))
    }

    /// Any key or value mentions a `<...>` slot the model has to fill in.
    pub fn has_placeholders(&self) -> bool {
        is_placeholder(&self.to_value().to_string())
    }

    /// JSON rendering used in the prompt.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (key, spec) in &self.fields {
            let value = match spec {
                FieldSpec::Text(description) => Value::String(description.clone()),
                FieldSpec::Choice(options) => {
                    Value::Array(options.iter().cloned().map(Value::String).collect())
                }
                FieldSpec::Nested(shape) => shape.clone(),
            };
            map.insert(key.clone(), value);
        }
        Value::Object(map)
    }
}

impl TryFrom<Value> for OutputSchema {
    type Error = SyllabusError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(&value)
    }
}
