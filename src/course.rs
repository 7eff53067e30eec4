//! Course-generation requests built on the extractor: unit outlines for a
//! new course, a cover-image search term, and chapter summaries from video
//! transcripts.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::SyllabusError;
use crate::extract::{Extraction, ExtractionRequest, OutputSchema};

/// Transcripts are cut to this many words before summarizing.
pub const SUMMARY_WORD_LIMIT: usize = 500;

const OUTLINE_SYSTEM_PROMPT: &str = "You are an educational content creator specializing in \
     creating structured learning courses with clear, precise learning objectives";

const IMAGE_SYSTEM_PROMPT: &str = "You are a specialist in educational content visualization";

const SUMMARY_SYSTEM_PROMPT: &str = "You are an educational content summarizer that creates \
     concise, informative summaries";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterOutline {
    pub youtube_search_query: String,
    pub chapter_title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOutline {
    pub title: String,
    pub chapters: Vec<ChapterOutline>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTerm {
    pub image_search_term: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub summary: String,
}

fn unit_prompt(title: &str, unit: &str) -> String {
    format!(
        "Create a detailed unit about \"{unit}\" for a course about \"{title}\". Follow these strict guidelines:
1. The unit must cover this specific subtopic within the main course subject
2. Each chapter title must be descriptive and specific (10 words maximum)
3. Each YouTube search query MUST include:
   - The exact topic name
   - At least one educational keyword (e.g., \"tutorial\", \"explanation\", \"lecture\")
   - Be specific enough to return videos teaching exactly that concept
   - Format: \"topic + educational keyword + specificity\" (e.g., \"mitosis process detailed explanation biology\")
4. Ensure logical progression from basic to advanced concepts
5. No generic or vague titles or search queries allowed"
    )
}

/// One batch request producing one [`UnitOutline`] per unit name.
pub fn outline_request(title: &str, units: &[String]) -> ExtractionRequest {
    let prompts: Vec<String> = units.iter().map(|unit| unit_prompt(title, unit)).collect();
    let schema = OutputSchema::new()
        .text(
            "title",
            "Clear, specific unit title that precisely describes the content (maximum 8 words)",
        )
        .nested(
            "chapters",
            json!([{
                "youtube_search_query": "<highly specific youtube search query>",
                "chapter_title": "<descriptive chapter title>",
            }]),
        );
    ExtractionRequest::new(OUTLINE_SYSTEM_PROMPT, prompts, schema)
}

pub fn image_term_request(title: &str) -> ExtractionRequest {
    let prompt = format!(
        "Provide a precise image search term that would find a high-quality, professional image \
         representing a course about \"{title}\". The search term should be specific, educational \
         in nature, and contain 3-5 words that will yield relevant, professional results."
    );
    let schema = OutputSchema::new().text(
        "image_search_term",
        "Specific, educational, professional image search term (3-5 words)",
    );
    ExtractionRequest::new(IMAGE_SYSTEM_PROMPT, prompt, schema)
}

/// First `limit` whitespace-separated words of `text`.
pub fn truncate_words(text: &str, limit: usize) -> String {
    text.split_whitespace()
        .take(limit)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn summary_request(transcript: &str) -> ExtractionRequest {
    let transcript = truncate_words(transcript, SUMMARY_WORD_LIMIT);
    let prompt = format!(
        "Create a clear, informative summary of this educational content. Keep it under 250 words, \
         focus only on the main educational content, and avoid mentioning sponsors or tangential \
         topics:\n{transcript}"
    );
    let schema = OutputSchema::new().text("summary", "educational summary of the content");
    ExtractionRequest::new(SUMMARY_SYSTEM_PROMPT, prompt, schema)
}

/// Typed units from an outline extraction. Empty when the model never
/// produced a valid outline.
pub fn parse_outline(extraction: Extraction) -> Result<Vec<UnitOutline>, SyllabusError> {
    Ok(extraction.parse()?.unwrap_or_default())
}
