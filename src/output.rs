//! Output types produced by the conversion pipeline.

use crate::config::Method;
use crate::error::PageError;
use crate::ledger::UsageRecord;
use crate::pipeline::dispatch::{BatchResult, StopReason};
use serde::{Deserialize, Serialize};

/// Raw text of one extracted page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-indexed page number.
    pub page_num: usize,
    pub text: String,
}

impl PageText {
    pub fn new(page_num: usize, text: impl Into<String>) -> Self {
        Self {
            page_num,
            text: text.into(),
        }
    }

    /// `true` when the page has no visible text.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Document-level information, available without extracting any text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Result of a full conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Display name of the source (usually the PDF path).
    pub source: String,

    /// Final text: normalised (local) or rewritten (remote).
    pub text: String,

    pub method: Method,

    /// First page extracted (1-indexed).
    pub first_page: usize,

    /// Last page extracted, after clamping to the document length.
    pub last_page: usize,

    /// Pages whose text layer could not be read.
    pub page_errors: Vec<PageError>,

    /// One entry per planned batch (remote only).
    pub batches: Vec<BatchResult>,

    /// One cost record per rewrite call (remote only).
    pub usage: Vec<UsageRecord>,

    pub stop_reason: StopReason,

    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// `true` when the run stopped before every batch was rewritten: the
    /// daily quota was reached, or this is the output carried by a failed run
    /// (see [`crate::Pdf2TxtError::partial_output`]).
    pub fn is_partial(&self) -> bool {
        !matches!(self.stop_reason, StopReason::Completed)
    }
}

/// Aggregate statistics for a conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Pages in the whole document.
    pub total_pages: usize,
    /// Pages extracted for this run.
    pub processed_pages: usize,
    /// Extracted pages without any text.
    pub empty_pages: usize,
    /// Batches sent to the rewrite service.
    pub api_calls: usize,
    /// Batches skipped because they had no text.
    pub skipped_batches: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Sum of the per-call cost estimates in USD.
    pub estimated_cost_usd: f64,
    /// The daily token cap ended the run before every batch was sent.
    pub stopped_early: bool,
    pub total_duration_ms: u64,
    pub extract_duration_ms: u64,
    pub rewrite_duration_ms: u64,
}

impl ConversionStats {
    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_page() {
        assert!(PageText::new(1, "  \n\t").is_blank());
        assert!(!PageText::new(2, "x").is_blank());
    }

    #[test]
    fn stats_total_tokens() {
        let stats = ConversionStats {
            total_input_tokens: 120,
            total_output_tokens: 80,
            ..Default::default()
        };
        assert_eq!(stats.total_tokens(), 200);
    }
}
