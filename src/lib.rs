//! # edgequake-pdf2txt
//!
//! Extract the text layer of PDF documents as clean, paragraph-structured
//! plain text, optionally polished by an LLM.
//!
//! ## Why this crate?
//!
//! The raw text layer of a typeset PDF is full of layout artefacts: one hard
//! line break per visual line, words hyphenated at the margin, running headers
//! and footers, page numbers, footnote markers, kerning gaps inside words and
//! e-mail addresses. This crate removes them with deterministic rules and can
//! hand the result to an LLM in rate-limited batches for a final pass.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      validate path and %PDF magic
//!  ├─ 2. Extract    text layer per page via pdfium (spawn_blocking)
//!  ├─ 3. Headers    drop header/footer outside separator rules
//!  ├─ 4. Normalize  reflow paragraphs, repair hyphens, splits, bullets, URLs
//!  ├─ 5. Dispatch   (remote) batches of pages under rpm / daily token caps
//!  ├─ 6. Rewrite    (remote) one LLM call per batch
//!  └─ 7. Ledger     usage and cost logs
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2txt::{convert_to_file, ConversionConfig, PageRange};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder()
//!         .pages(PageRange::new(3, Some(15))?)
//!         .build()?;
//!     let (path, stats) = convert_to_file("document.pdf", &config).await?;
//!     eprintln!("{} pages → {}", stats.processed_pages, path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2txt` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2txt = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod ledger;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, LedgerPaths, Method, PageRange};
pub use convert::{convert, convert_pages, convert_sync, convert_to_file, inspect, output_path_for};
pub use error::{PageError, Pdf2TxtError, RewriteError};
pub use ledger::{CostReport, CostSummary, PriceTable, TokenUsage};
pub use output::{ConversionOutput, ConversionStats, DocumentInfo, PageText};
pub use pipeline::dispatch::{RateBudget, RateLimits, StopReason};
pub use pipeline::normalize::{normalize, NativeAlphabet, NormalizeOptions, NormalizePreset};
pub use pipeline::rewrite::{Rewrite, RewriteService};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use state::DirectoryMemory;
