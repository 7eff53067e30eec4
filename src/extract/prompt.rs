use super::AttemptFailure;
use super::UserContent;
use super::schema::OutputSchema;

/// Format block appended to the caller's system prompt.
pub fn format_instructions(schema: &OutputSchema, batch_len: Option<usize>) -> String {
    let shape = schema.to_value().to_string();
    let mut out = match batch_len {
        Some(n) => format!(
            "\nYou are to output a JSON array of exactly {n} objects, each in the following json format: {shape}"
        ),
        None => format!("\nYou are to output the following json format: {shape}"),
    };

    out.push_str(
        "\nDo not include any markdown formatting, backticks, or json labels in your response.",
    );
    out.push_str("\nEscape any double quote that appears inside a string value as \\\".");

    if schema.has_choices() {
        out.push_str(
            "\nIf an output field is a list, classify output into the single best element of the list.",
        );
    }

    if schema.has_placeholders() {
        out.push_str(
            "\nAny text enclosed by < and > indicates you must generate content to replace it. \
             Example input: Go to <location>, Example output: Go to the garden\
             \nAny output key containing < and > indicates you must generate the key name to replace it.",
        );
    }

    if batch_len.is_some() {
        out.push_str(
            "\nGenerate an array of json objects, one json for each input element, in the same order as the inputs. \
             Each object must contain content unique to its corresponding input; \
             never repeat or copy content between elements.",
        );
    }

    out
}

pub fn render_user_content(user: &UserContent) -> String {
    match user {
        UserContent::Single(text) => text.clone(),
        UserContent::Batch(inputs) => inputs
            .iter()
            .enumerate()
            .map(|(i, input)| format!("Input {}:\n{input}", i + 1))
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

/// System instruction, format block and feedback first; user content last.
pub fn assemble(system: &str, instructions: &str, feedback: &str, user: &str) -> String {
    format!("{system}{instructions}{feedback}\n\n{user}")
}

/// Feedback appended after a failed attempt. The attempt counter keeps
/// each entry distinct.
pub fn attempt_feedback(attempt: u32, max_attempts: u32, failure: &AttemptFailure) -> String {
    format!(
        "\n\nAttempt {attempt}/{max_attempts} failed with error: {failure}\
         \nPlease ensure your response is valid JSON matching the required format exactly."
    )
}
