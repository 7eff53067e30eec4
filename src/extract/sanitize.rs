use serde_json::Value;

use super::AttemptFailure;

/// Characters of raw output echoed back in a "not JSON" failure.
const PREVIEW_CHARS: usize = 80;

/// Remove ``` fences and the language label that may follow them.
pub fn strip_fences(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(pos) = rest.find("```") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];
        let label_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(rest.len());
        rest = &rest[label_len..];
    }
    out.push_str(rest);
    out
}

/// Slice from the first `{` or `[` to the last matching closer.
pub fn outermost_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}

/// Fences, labels and surrounding commentary stripped. Fails if what is
/// left cannot possibly be a JSON object or array.
pub fn sanitize(raw: &str) -> Result<String, AttemptFailure> {
    let unfenced = strip_fences(raw);
    let trimmed = unfenced.trim();
    let candidate = outermost_span(trimmed).unwrap_or(trimmed);

    if !(candidate.starts_with('{') || candidate.starts_with('[')) {
        return Err(AttemptFailure::NotJson {
            preview: candidate.chars().take(PREVIEW_CHARS).collect(),
        });
    }
    Ok(candidate.to_string())
}

/// Escape quotes inside string literals that the model forgot to escape.
///
/// A `"` inside a string only closes it when the next non-whitespace
/// character is a structural delimiter (`,` `:` `}` `]`) or end of input.
/// Raw control characters inside strings are escaped as well.
pub fn repair_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            i += 1;
            continue;
        }

        match c {
            '\\' => {
                out.push(c);
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                    i += 1;
                }
            }
            '"' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if matches!(next, None | Some(',' | ':' | '}' | ']')) {
                    in_string = false;
                    out.push('"');
                } else {
                    out.push_str("\\\"");
                }
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

/// Parse sanitized text, falling back to quote repair once.
pub fn parse(text: &str) -> Result<Value, AttemptFailure> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(original) => {
            let repaired = repair_quotes(text);
            if repaired != text
                && let Ok(value) = serde_json::from_str(&repaired)
            {
                tracing::debug!("parsed model output after quote repair");
                return Ok(value);
            }
            Err(AttemptFailure::Syntax(original.to_string()))
        }
    }
}
