//! StructuredExtractor: sanitize → parse → validate → retry with feedback.

use std::sync::Arc;

use serde_json::json;

use syllabus::error::SyllabusError;
use syllabus::extract::{
    Extraction, ExtractionRequest, ExtractorSettings, OutputSchema, StructuredExtractor,
};
use syllabus::testing::ScriptedProvider;

fn extractor(
    provider: ScriptedProvider,
) -> (Arc<ScriptedProvider>, StructuredExtractor<Arc<ScriptedProvider>>) {
    let provider = Arc::new(provider);
    let extractor = StructuredExtractor::new(provider.clone(), ExtractorSettings::default());
    (provider, extractor)
}

fn summary_schema() -> OutputSchema {
    OutputSchema::new().text("summary", "educational summary of the content")
}

// ---------------------------------------------------------------------------
// Happy paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fenced_response_is_stripped_and_parsed() {
    let (provider, extractor) =
        extractor(ScriptedProvider::new().reply("```json\n{\"summary\": \"ok\"}\n```"));
    let req = ExtractionRequest::new("sys", "short transcript text", summary_schema());

    let result = extractor.extract(&req).await.unwrap();

    assert_eq!(result, Extraction::Data(json!({"summary": "ok"})));
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn free_text_values_pass_through_unchanged() {
    let reply = r#"{"title": "  Odd: spacing, kept  ", "body": "Line one\nline two", "extra": 3}"#;
    let (_, extractor) = extractor(ScriptedProvider::new().reply(reply));
    let schema = OutputSchema::new().text("title", "a title").text("body", "a body");
    let req = ExtractionRequest::new("sys", "input", schema);

    let value = extractor.extract(&req).await.unwrap().into_value();

    assert_eq!(value["title"], "  Odd: spacing, kept  ");
    assert_eq!(value["body"], "Line one\nline two");
    assert_eq!(value["extra"], 3);
}

#[tokio::test]
async fn leading_and_trailing_commentary_is_ignored() {
    let reply = "Sure! Here is your JSON:\n{\"summary\": \"ok\"}\nHope this helps.";
    let (_, extractor) = extractor(ScriptedProvider::new().reply(reply));
    let req = ExtractionRequest::new("sys", "input", summary_schema());

    let value = extractor.extract(&req).await.unwrap().into_value();
    assert_eq!(value, json!({"summary": "ok"}));
}

#[tokio::test]
async fn unescaped_interior_quotes_are_repaired() {
    let reply = r#"{"summary": "The teacher said "always check your units" before the test."}"#;
    let (provider, extractor) = extractor(ScriptedProvider::new().reply(reply));
    let req = ExtractionRequest::new("sys", "input", summary_schema());

    let value = extractor.extract(&req).await.unwrap().into_value();

    assert_eq!(
        value["summary"],
        "The teacher said \"always check your units\" before the test."
    );
    assert_eq!(provider.call_count(), 1, "repair must not cost a retry");
}

#[tokio::test]
async fn batch_input_returns_one_object_per_input() {
    let reply = r#"[{"summary": "first"}, {"summary": "second"}, {"summary": "third"}]"#;
    let (_, extractor) = extractor(ScriptedProvider::new().reply(reply));
    let req = ExtractionRequest::new("sys", vec!["a", "b", "c"], summary_schema());

    let value = extractor.extract(&req).await.unwrap().into_value();

    let items = value.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[1]["summary"], "second");
}

#[tokio::test]
async fn empty_batch_skips_the_provider() {
    let (provider, extractor) = extractor(ScriptedProvider::new());
    let req = ExtractionRequest::new("sys", Vec::<String>::new(), summary_schema());

    let result = extractor.extract(&req).await.unwrap();

    assert_eq!(result, Extraction::Data(json!([])));
    assert_eq!(provider.call_count(), 0);
}

// ---------------------------------------------------------------------------
// Choice fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn out_of_set_choice_replaced_by_default() {
    let (_, extractor) = extractor(ScriptedProvider::new().reply(r#"{"level": "expert"}"#));
    let schema = OutputSchema::new().choice("level", ["beginner", "intermediate", "advanced"]);
    let req = ExtractionRequest::new("sys", "input", schema).default_category("beginner");

    let value = extractor.extract(&req).await.unwrap().into_value();
    assert_eq!(value["level"], "beginner");
}

#[tokio::test]
async fn out_of_set_choice_without_default_passes_through() {
    let (provider, extractor) = extractor(ScriptedProvider::new().reply(r#"{"level": "expert"}"#));
    let schema = OutputSchema::new().choice("level", ["beginner", "advanced"]);
    let req = ExtractionRequest::new("sys", "input", schema);

    let value = extractor.extract(&req).await.unwrap().into_value();

    assert_eq!(value["level"], "expert");
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn array_choice_takes_first_and_label_prefix_is_cut() {
    let reply = r#"{"level": ["advanced: deep dive", "beginner"]}"#;
    let (_, extractor) = extractor(ScriptedProvider::new().reply(reply));
    let schema = OutputSchema::new().choice("level", ["beginner", "advanced"]);
    let req = ExtractionRequest::new("sys", "input", schema);

    let value = extractor.extract(&req).await.unwrap().into_value();
    assert_eq!(value["level"], "advanced");
}

#[tokio::test]
async fn values_only_collapses_single_value() {
    let (_, extractor) = extractor(ScriptedProvider::new().reply(r#"{"level": "advanced"}"#));
    let schema = OutputSchema::new().choice("level", ["beginner", "advanced"]);
    let req = ExtractionRequest::new("sys", "input", schema).values_only(true);

    let value = extractor.extract(&req).await.unwrap().into_value();
    assert_eq!(value, json!("advanced"));
}

#[tokio::test]
async fn values_only_keeps_key_order() {
    let reply = r#"[{"b": "1", "a": "2"}, {"b": "3", "a": "4"}]"#;
    let (_, extractor) = extractor(ScriptedProvider::new().reply(reply));
    let schema = OutputSchema::new().text("b", "first").text("a", "second");
    let req = ExtractionRequest::new("sys", vec!["x", "y"], schema).values_only(true);

    let value = extractor.extract(&req).await.unwrap().into_value();
    assert_eq!(value, json!([["1", "2"], ["3", "4"]]));
}

// ---------------------------------------------------------------------------
// Retries and feedback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn truncated_json_then_valid_takes_two_calls() {
    let (provider, extractor) = extractor(
        ScriptedProvider::new()
            .reply(r#"{"summary": "ok""#)
            .reply(r#"{"summary": "ok"}"#),
    );
    let req = ExtractionRequest::new("sys", "input", summary_schema());

    let result = extractor.extract(&req).await.unwrap();

    assert_eq!(result, Extraction::Data(json!({"summary": "ok"})));
    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].prompt.contains("Attempt 1/3 failed"));
    assert!(calls[1].prompt.contains("Attempt 1/3 failed"));
}

#[tokio::test]
async fn missing_key_is_fed_back() {
    let (provider, extractor) = extractor(
        ScriptedProvider::new()
            .reply(r#"{"title": "no summary here"}"#)
            .reply(r#"{"summary": "fixed"}"#),
    );
    let req = ExtractionRequest::new("sys", "input", summary_schema());

    let value = extractor.extract(&req).await.unwrap().into_value();

    assert_eq!(value["summary"], "fixed");
    assert!(provider.calls()[1].prompt.contains("summary not in json output"));
}

#[tokio::test]
async fn batch_requires_array_of_matching_length() {
    let (provider, extractor) = extractor(
        ScriptedProvider::new()
            .reply(r#"{"summary": "not an array"}"#)
            .reply(r#"[{"summary": "only one"}]"#)
            .reply(r#"[{"summary": "one"}, {"summary": "two"}]"#),
    );
    let req = ExtractionRequest::new("sys", vec!["a", "b"], summary_schema());

    let value = extractor.extract(&req).await.unwrap().into_value();

    assert_eq!(value.as_array().unwrap().len(), 2);
    let calls = provider.calls();
    assert!(calls[1].prompt.contains("not in an array of json"));
    assert!(calls[2].prompt.contains("expected 2 json objects"));
}

#[tokio::test]
async fn exhausted_retries_return_empty_and_stop_calling() {
    let (provider, extractor) = extractor(ScriptedProvider::new().fallback("no json at all"));
    let req = ExtractionRequest::new("sys", "input", summary_schema()).num_tries(4);

    let result = extractor.extract(&req).await.unwrap();

    match &result {
        Extraction::Empty { attempts, failures, batch } => {
            assert_eq!(*attempts, 4);
            assert_eq!(failures.len(), 4);
            assert!(!batch);
        }
        other => panic!("expected Empty, got {other:?}"),
    }
    assert_eq!(result.into_value(), json!({}));
    assert_eq!(provider.call_count(), 4);

    // every retry carries strictly more feedback than the previous one
    let calls = provider.calls();
    for pair in calls.windows(2) {
        assert!(pair[1].prompt.len() > pair[0].prompt.len());
        let prefix = &pair[0].prompt[..pair[0].prompt.find("\n\ninput").unwrap()];
        assert!(pair[1].prompt.starts_with(prefix));
    }
    assert!(calls[3].prompt.contains("Attempt 3/4 failed"));
}

#[tokio::test]
async fn exhausted_batch_returns_empty_array() {
    let (_, extractor) = extractor(ScriptedProvider::new().fallback("{}"));
    let req = ExtractionRequest::new("sys", vec!["a"], summary_schema());

    let value = extractor.extract(&req).await.unwrap().into_value();
    assert_eq!(value, json!([]));
}

#[tokio::test]
async fn sampling_parameters_fixed_across_attempts() {
    let (provider, extractor) = extractor(
        ScriptedProvider::new()
            .reply("garbage")
            .reply(r#"{"summary": "ok"}"#),
    );
    let req = ExtractionRequest::new("sys", "input", summary_schema())
        .model("gemini-test")
        .temperature(0.4);

    extractor.extract(&req).await.unwrap();

    for call in provider.calls() {
        assert_eq!(call.model, "gemini-test");
        assert_eq!(call.temperature, 0.4);
        assert_eq!(call.top_p, 0.8);
        assert_eq!(call.top_k, 40);
    }
}

// ---------------------------------------------------------------------------
// Transport failures escape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transport_error_propagates_without_retry() {
    let (provider, extractor) = extractor(
        ScriptedProvider::new()
            .fail(SyllabusError::Upstream {
                provider: "gemini".to_string(),
                message: "503".to_string(),
                status: Some(503),
            })
            .reply(r#"{"summary": "never reached"}"#),
    );
    let req = ExtractionRequest::new("sys", "input", summary_schema());

    let err = extractor.extract(&req).await.unwrap_err();

    assert!(matches!(err, SyllabusError::Upstream { status: Some(503), .. }));
    assert_eq!(provider.call_count(), 1);
}

// ---------------------------------------------------------------------------
// Prompt contents
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prompt_carries_format_and_batch_instructions() {
    let (provider, extractor) =
        extractor(ScriptedProvider::new().reply(r#"[{"<topic>": "x"}, {"<topic>": "y"}]"#));
    let schema = OutputSchema::new().text("<topic>", "<fact about the topic>");
    let req = ExtractionRequest::new("You are a tutor.", vec!["cells", "atoms"], schema);

    let value = extractor.extract(&req).await.unwrap().into_value();
    assert_eq!(value.as_array().unwrap().len(), 2);

    let prompt = &provider.calls()[0].prompt;
    assert!(prompt.starts_with("You are a tutor."));
    assert!(prompt.contains("exactly 2 objects"));
    assert!(prompt.contains("Do not include any markdown formatting"));
    assert!(prompt.contains("generate the key name"));
    assert!(prompt.contains("one json for each input element"));
    assert!(prompt.contains("never repeat or copy content between elements"));
    assert!(prompt.contains("Input 1:\ncells"));
    assert!(prompt.ends_with("Input 2:\natoms"));
}
