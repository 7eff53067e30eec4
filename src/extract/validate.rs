use serde_json::{Map, Value};

use super::schema::{FieldSpec, OutputSchema};
use super::{AttemptFailure, UserContent};

/// Check parsed output against the schema and shape it for the caller.
///
/// Batch input must produce an array with one object per input; single
/// input produces one object. Choice fields are coerced in place.
pub fn normalize(
    parsed: Value,
    schema: &OutputSchema,
    user: &UserContent,
    default_category: Option<&str>,
    values_only: bool,
) -> Result<Value, AttemptFailure> {
    let elements = match (user.batch_len(), parsed) {
        (Some(expected), Value::Array(items)) => {
            if items.len() != expected {
                return Err(AttemptFailure::WrongCount {
                    expected,
                    found: items.len(),
                });
            }
            items
        }
        (Some(_), _) => return Err(AttemptFailure::ExpectedArray),
        (None, value) => vec![value],
    };

    let mut shaped = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        let Value::Object(mut object) = element else {
            return Err(AttemptFailure::NotAnObject { index });
        };
        check_fields(&mut object, schema, default_category)?;
        shaped.push(if values_only {
            values_of(object)
        } else {
            Value::Object(object)
        });
    }

    if user.is_batch() {
        Ok(Value::Array(shaped))
    } else {
        Ok(shaped.into_iter().next().unwrap_or(Value::Null))
    }
}

fn check_fields(
    object: &mut Map<String, Value>,
    schema: &OutputSchema,
    default_category: Option<&str>,
) -> Result<(), AttemptFailure> {
    for key in schema.required_keys() {
        let Some(value) = object.get_mut(key) else {
            return Err(AttemptFailure::MissingKey {
                key: key.to_string(),
            });
        };
        if let Some(FieldSpec::Choice(options)) = schema.get(key) {
            coerce_choice(key, value, options, default_category)?;
        }
    }
    Ok(())
}

/// First element of an array answer, default for out-of-set answers, and
/// anything after a `:` dropped (models like to prefix a category label).
pub fn coerce_choice(
    key: &str,
    value: &mut Value,
    options: &[String],
    default_category: Option<&str>,
) -> Result<(), AttemptFailure> {
    if let Value::Array(items) = value {
        let first = items.first().cloned().unwrap_or(Value::Null);
        *value = first;
    }

    let in_set = value
        .as_str()
        .is_some_and(|s| options.iter().any(|o| o == s));
    if !in_set && let Some(default) = default_category {
        *value = Value::String(default.to_string());
    }

    match value {
        Value::String(s) => {
            if let Some((head, _)) = s.split_once(':') {
                *s = head.to_string();
            }
            Ok(())
        }
        other => Err(AttemptFailure::InvalidChoice {
            key: key.to_string(),
            found: other.to_string(),
        }),
    }
}

fn values_of(object: Map<String, Value>) -> Value {
    let mut values: Vec<Value> = object.into_iter().map(|(_, v)| v).collect();
    if values.len() == 1 {
        values.pop().unwrap_or(Value::Null)
    } else {
        Value::Array(values)
    }
}
