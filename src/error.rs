//! Error types for the edgequake-pdf2txt library.
//!
//! Three error types map onto three failure scopes:
//!
//! * [`Pdf2TxtError`]: **Fatal**: the run cannot proceed (bad input file,
//!   invalid page range, provider not configured, a rewrite call that failed
//!   mid-run). Returned as `Err(Pdf2TxtError)` from the `convert*` functions.
//!
//! * [`PageError`]: **Non-fatal**: one page had no readable text layer. The
//!   page contributes an empty string and the run continues; the error is kept
//!   in [`crate::output::ConversionOutput::page_errors`] for reporting.
//!
//! * [`RewriteError`]: a single rewrite-service call failed. The dispatcher
//!   wraps it into [`Pdf2TxtError::RewriteFailed`] / [`Pdf2TxtError::ApiTimeout`]
//!   together with the batch number.
//!
//! Missing or corrupt persisted state (logs, directory memory) never produces
//! an error at all: readers substitute an empty default.

use crate::output::ConversionOutput;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2txt library.
#[derive(Debug, Error)]
pub enum Pdf2TxtError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Page range rejected before the document was opened.
    #[error("Invalid page range {start}-{end}: pages are 1-indexed and start must be <= end")]
    InvalidPageRange { start: usize, end: usize },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The requested start page lies past the end of the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Text extraction needs the pdfium shared library. You can:\n\
  • Install libpdfium system-wide, or\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium (file or directory).\n"
    )]
    PdfiumBindingFailed(String),

    // ── Rewrite service errors ────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A rewrite call failed; remaining batches were not submitted.
    ///
    /// `partial` holds the batches rewritten before the failure, when the
    /// error comes out of a conversion run.
    #[error("Rewrite of batch {batch} failed after {attempts} attempt(s): {detail}")]
    RewriteFailed {
        batch: usize,
        attempts: u32,
        detail: String,
        partial: Option<Box<ConversionOutput>>,
    },

    /// A rewrite call exceeded the configured timeout.
    #[error("API call timed out after {secs}s on batch {batch}")]
    ApiTimeout {
        batch: usize,
        secs: u64,
        partial: Option<Box<ConversionOutput>>,
    },

    /// The remote price table could not be fetched or parsed.
    ///
    /// Only surfaced by [`crate::ledger::PriceTable::fetch`]; the conversion
    /// pipeline falls back to the static table instead of failing.
    #[error("Failed to fetch pricing from '{url}': {reason}")]
    PricingFetchFailed { url: String, reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output text file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write a log or state file.
    #[error("Failed to write state file '{path}': {source}")]
    StateWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2TxtError {
    /// Output of the batches that completed before a failed rewrite call.
    ///
    /// The calls behind it were billed even though the run failed, so their
    /// usage still belongs in the logs (see [`crate::convert::record_failed_run`]).
    pub fn partial_output(&self) -> Option<&ConversionOutput> {
        match self {
            Self::RewriteFailed { partial, .. } | Self::ApiTimeout { partial, .. } => {
                partial.as_deref()
            }
            _ => None,
        }
    }

    /// Attach the output completed so far to a rewrite failure.
    pub(crate) fn with_partial(mut self, output: ConversionOutput) -> Self {
        if let Self::RewriteFailed { partial, .. } | Self::ApiTimeout { partial, .. } = &mut self {
            *partial = Some(Box::new(output));
        }
        self
    }
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// pdfium could not produce a text layer for the page.
    #[error("Page {page}: text extraction failed: {detail}")]
    ExtractionFailed { page: usize, detail: String },
}

/// Failure of one call to a [`crate::pipeline::rewrite::RewriteService`].
#[derive(Debug, Clone, Error)]
pub enum RewriteError {
    /// The provider returned an error (HTTP, auth, quota, …).
    #[error("API error: {0}")]
    Api(String),

    /// The call did not complete within the timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider answered without any content.
    #[error("provider returned an empty response")]
    EmptyResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_page_range_display() {
        let e = Pdf2TxtError::InvalidPageRange { start: 5, end: 2 };
        let msg = e.to_string();
        assert!(msg.contains("5-2"), "got: {msg}");
    }

    #[test]
    fn rewrite_failed_display() {
        let e = Pdf2TxtError::RewriteFailed {
            batch: 2,
            attempts: 1,
            detail: "HTTP 500".into(),
            partial: None,
        };
        let msg = e.to_string();
        assert!(msg.contains("batch 2"));
        assert!(msg.contains("HTTP 500"));
    }

    #[test]
    fn api_timeout_display() {
        let e = Pdf2TxtError::ApiTimeout {
            batch: 3,
            secs: 60,
            partial: None,
        };
        assert!(e.to_string().contains("60s"));
        assert!(e.to_string().contains("batch 3"));
        assert!(e.partial_output().is_none());
    }

    #[test]
    fn page_error_serialises() {
        let e = PageError::ExtractionFailed {
            page: 4,
            detail: "no text layer".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("ExtractionFailed"));
        assert!(e.to_string().starts_with("Page 4"));
    }

    #[test]
    fn rewrite_error_timeout_display() {
        assert_eq!(
            RewriteError::Timeout { secs: 30 }.to_string(),
            "timed out after 30s"
        );
    }
}
