//! Prompts for LLM-based text rewriting.
//!
//! Every prompt lives here so that changing the default instruction means
//! editing one place, and unit tests can inspect prompts without calling a
//! provider.
//!
//! Callers can override the instruction via
//! [`crate::config::ConversionConfig::rewrite_prompt`]; the constant here is
//! used only when no override is provided.

/// Default instruction placed before the batch text.
pub const DEFAULT_REWRITE_PROMPT: &str =
    "Ensure the following text is properly extracted and formatted:";

/// Sentence telling the model which language the text is in.
pub fn language_hint(language: &str) -> String {
    format!(
        "The text is written in language '{}'. Keep it in that language and do not translate it. \
Return only the corrected text.",
        language
    )
}

/// Build the single user message sent for one batch.
pub fn build_rewrite_prompt(text: &str, language: &str, instruction: Option<&str>) -> String {
    let instruction = instruction.unwrap_or(DEFAULT_REWRITE_PROMPT);
    format!("{}\n{}\n\n{}", instruction, language_hint(language), text)
}
