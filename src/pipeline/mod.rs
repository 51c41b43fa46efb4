//! Pipeline stages for PDF text extraction.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ headers ──▶ normalize ──▶ dispatch ──▶ rewrite
//! (path)    (pdfium)    (rules)     (reflow)      (batches)    (LLM)
//! ```
//!
//! 1. [`input`]:     validate the user-supplied path and the `%PDF` magic
//! 2. [`extract`]:   read the text layer of the selected pages; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`headers`]:   drop running headers/footers framed by separator lines
//! 4. [`normalize`]: deterministic rules that rebuild paragraphs and repair
//!    hyphenation, split words, bullets, punctuation and addresses
//! 5. [`dispatch`]:  group pages into batches under per-minute and per-day caps
//! 6. [`rewrite`]:   the LLM call with timeout and retry; the only stage with
//!    network I/O

pub mod dispatch;
pub mod extract;
pub mod headers;
pub mod input;
pub mod normalize;
pub mod rewrite;
