//! Output cleanup, schema handling and per-field coercion.

use serde_json::json;

use syllabus::extract::sanitize::{outermost_span, parse, repair_quotes, sanitize, strip_fences};
use syllabus::extract::schema::{FieldSpec, OutputSchema, is_placeholder};
use syllabus::extract::validate::{coerce_choice, normalize};
use syllabus::extract::{AttemptFailure, UserContent};

// ---------------------------------------------------------------------------
// Fences and spans
// ---------------------------------------------------------------------------

#[test]
fn strip_fences_removes_language_labels() {
    assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "\n{\"a\": 1}\n");
    assert_eq!(strip_fences("```JSON{\"a\": 1}```"), "{\"a\": 1}");
    assert_eq!(strip_fences("no fences"), "no fences");
}

#[test]
fn outermost_span_picks_first_opener_and_last_closer() {
    assert_eq!(outermost_span("note: {\"a\": {\"b\": 1}} bye"), Some("{\"a\": {\"b\": 1}}"));
    assert_eq!(outermost_span("list [1, [2]] done"), Some("[1, [2]]"));
    assert_eq!(outermost_span("{ unterminated"), None);
    assert_eq!(outermost_span("plain text"), None);
}

#[test]
fn sanitize_rejects_text_without_json() {
    let err = sanitize("I cannot help with that.").unwrap_err();
    assert!(matches!(err, AttemptFailure::NotJson { .. }));
}

#[test]
fn sanitize_keeps_truncated_object_for_the_parser_to_reject() {
    let text = sanitize("```json\n{\"summary\": \"ok\"").unwrap();
    assert_eq!(text, "{\"summary\": \"ok\"");
    assert!(matches!(parse(&text), Err(AttemptFailure::Syntax(_))));
}

// ---------------------------------------------------------------------------
// Quote repair
// ---------------------------------------------------------------------------

#[test]
fn repair_escapes_interior_quotes_only() {
    let broken = r#"{"q": "What does "mitosis" mean?", "a": "cell division"}"#;
    let fixed = repair_quotes(broken);
    let value: serde_json::Value = serde_json::from_str(&fixed).unwrap();
    assert_eq!(value["q"], "What does \"mitosis\" mean?");
    assert_eq!(value["a"], "cell division");
}

#[test]
fn repair_leaves_valid_json_untouched() {
    let valid = r#"{"a": "say \"hi\"", "b": ["x", "y"], "c": {"d": 1}}"#;
    assert_eq!(repair_quotes(valid), valid);
}

#[test]
fn repair_escapes_raw_newlines_in_strings() {
    let broken = "{\"a\": \"line one\nline two\"}";
    assert_eq!(parse(broken).unwrap(), json!({"a": "line one\nline two"}));
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[test]
fn schema_from_value_classifies_fields() {
    let schema = OutputSchema::from_value(&json!({
        "title": "a title",
        "level": ["beginner", "advanced"],
        "chapters": [{"name": "chapter name"}],
        "<dynamic>": "<value>",
    }))
    .unwrap();

    assert_eq!(schema.len(), 4);
    assert_eq!(schema.get("title"), Some(&FieldSpec::Text("a title".to_string())));
    assert!(matches!(schema.get("level"), Some(FieldSpec::Choice(o)) if o.len() == 2));
    assert!(matches!(schema.get("chapters"), Some(FieldSpec::Nested(_))));
    assert_eq!(schema.required_keys().collect::<Vec<_>>(), ["title", "level", "chapters"]);
    assert!(schema.has_choices());
    assert!(schema.has_placeholders());
}

#[test]
fn schema_from_non_object_is_rejected() {
    assert!(OutputSchema::from_value(&json!(["a"])).is_err());
}

#[test]
fn schema_keeps_declaration_order_in_prompt_rendering() {
    let schema = OutputSchema::new().text("zeta", "z").text("alpha", "a");
    assert_eq!(schema.to_value().to_string(), r#"{"zeta":"z","alpha":"a"}"#);
}

#[test]
fn placeholder_detection() {
    assert!(is_placeholder("<topic>"));
    assert!(is_placeholder("Go to <location> now"));
    assert!(!is_placeholder("a > b"));
    assert!(!is_placeholder("plain"));
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn coerce_choice_default_then_colon_truncation() {
    let options = vec!["science".to_string(), "history".to_string()];

    let mut value = json!("Science: physics");
    coerce_choice("topic", &mut value, &options, Some("history")).unwrap();
    assert_eq!(value, json!("history"));

    let mut value = json!("science: physics");
    coerce_choice("topic", &mut value, &options, None).unwrap();
    assert_eq!(value, json!("science"));

    let mut value = json!(42);
    let err = coerce_choice("topic", &mut value, &options, None).unwrap_err();
    assert!(matches!(err, AttemptFailure::InvalidChoice { .. }));

    let mut value = json!([]);
    coerce_choice("topic", &mut value, &options, Some("science")).unwrap();
    assert_eq!(value, json!("science"));
}

#[test]
fn normalize_single_unwraps_to_object() {
    let schema = OutputSchema::new().text("summary", "s");
    let out = normalize(
        json!({"summary": "x"}),
        &schema,
        &UserContent::Single("in".into()),
        None,
        false,
    )
    .unwrap();
    assert_eq!(out, json!({"summary": "x"}));
}

#[test]
fn normalize_rejects_non_object_elements() {
    let schema = OutputSchema::new().text("summary", "s");
    let err = normalize(
        json!(["just a string"]),
        &schema,
        &UserContent::Batch(vec!["in".into()]),
        None,
        false,
    )
    .unwrap_err();
    assert_eq!(err, AttemptFailure::NotAnObject { index: 0 });
}

#[test]
fn normalize_placeholder_keys_are_not_required() {
    let schema = OutputSchema::new()
        .text("summary", "s")
        .text("<aspect>", "<detail>");
    let out = normalize(
        json!({"summary": "x", "history": "y"}),
        &schema,
        &UserContent::Single("in".into()),
        None,
        false,
    )
    .unwrap();
    assert_eq!(out["history"], "y");
}
