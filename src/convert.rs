//! Conversion entry points.
//!
//! [`convert`] runs the whole pipeline and returns the text in memory;
//! [`convert_to_file`] also writes the text beside the PDF and appends the
//! run to the usage and cost logs. [`convert_pages`] starts from pages that
//! were already extracted, which is how the pipeline is exercised without
//! pdfium.

use crate::config::{ConversionConfig, Method};
use crate::error::Pdf2TxtError;
use crate::ledger::{
    append_json_log, timestamp_now, CostLogEntry, PriceTable, TokenUsage, UsageLogEntry,
    UsageRecord,
};
use crate::output::{ConversionOutput, ConversionStats, DocumentInfo, PageText};
use crate::pipeline::dispatch::{self, batch_count, RateBudget, StopReason};
use crate::pipeline::extract::{self, ExtractedDocument};
use crate::pipeline::headers::strip_headers_footers;
use crate::pipeline::normalize::normalize;
use crate::pipeline::{input, rewrite};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Timeout for the optional pricing download.
const PRICING_TIMEOUT_SECS: u64 = 10;

/// Extract, clean and (for [`Method::Remote`]) rewrite a PDF.
///
/// # Errors
/// Returns `Err(Pdf2TxtError)` only for fatal errors:
/// - file not found, not a PDF, wrong password
/// - start page past the end of the document
/// - a rewrite call that failed (remaining batches are not sent); the
///   batches completed before it are in [`Pdf2TxtError::partial_output`]
///
/// Reaching the daily token cap is not an error: the output holds the
/// batches processed so far and [`ConversionOutput::is_partial`] is `true`.
pub async fn convert(
    pdf_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2TxtError> {
    let total_start = Instant::now();
    let pdf_path = input::resolve_input(pdf_path)?;
    info!("Starting extraction: {}", pdf_path.display());

    let extract_start = Instant::now();
    let extracted =
        extract::extract_pages(&pdf_path, config.pages, config.password.as_deref()).await?;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;
    info!(
        "Extracted pages {}-{} of {} in {}ms ({} unreadable)",
        extracted.first_page,
        extracted.last_page,
        extracted.page_count,
        extract_duration_ms,
        extracted.errors.len()
    );

    let source = pdf_path.display().to_string();
    process(&source, extracted, config, extract_duration_ms, total_start).await
}

/// Run the cleanup and rewrite stages over already-extracted pages.
///
/// `pages` are taken in order; `source` is only used for logs and cost records.
pub async fn convert_pages(
    source: &str,
    pages: Vec<PageText>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2TxtError> {
    let extracted = ExtractedDocument {
        page_count: pages.len(),
        first_page: pages.first().map_or(0, |p| p.page_num),
        last_page: pages.last().map_or(0, |p| p.page_num),
        pages,
        errors: Vec::new(),
    };
    process(source, extracted, config, 0, Instant::now()).await
}

async fn process(
    source: &str,
    extracted: ExtractedDocument,
    config: &ConversionConfig,
    extract_duration_ms: u64,
    total_start: Instant,
) -> Result<ConversionOutput, Pdf2TxtError> {
    let cb = config.progress_callback.as_ref();

    let cleaned: Vec<PageText> = extracted
        .pages
        .iter()
        .map(|p| {
            let text = if config.strip_headers {
                strip_headers_footers(&p.text)
            } else {
                p.text.clone()
            };
            PageText::new(p.page_num, text)
        })
        .collect();
    let empty_pages = cleaned.iter().filter(|p| p.is_blank()).count();

    let rewrite_start = Instant::now();
    let mut failure = None;
    let (text, batches, usage, stop_reason) = match config.method {
        Method::Local => {
            if let Some(cb) = cb {
                cb.on_conversion_start(cleaned.len(), 1);
            }
            let joined = cleaned
                .iter()
                .filter(|p| !p.is_blank())
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let text = normalize(&joined, &config.normalize);
            if let Some(cb) = cb {
                cb.on_batch_complete(1, 1, text.len(), 0);
                cb.on_conversion_complete(1, 0);
            }
            (text, Vec::new(), Vec::new(), StopReason::Completed)
        }
        Method::Remote => {
            let service = rewrite::resolve_service(config)?;
            let normalized: Vec<PageText> = cleaned
                .iter()
                .map(|p| PageText::new(p.page_num, normalize(&p.text, &config.normalize)))
                .collect();

            let total_batches = batch_count(normalized.len(), config.batch_size);
            if let Some(cb) = cb {
                cb.on_conversion_start(normalized.len(), total_batches);
            }

            let mut budget = RateBudget::new();
            let dispatched =
                match dispatch::dispatch(service.as_ref(), &normalized, config, &mut budget).await {
                    Ok(dispatched) => dispatched,
                    Err(aborted) => {
                        failure = Some(aborted.error);
                        aborted.partial
                    }
                };

            let model = service.served_model().unwrap_or(config.model.as_str());
            let prices = PriceTable::load(config.pricing_url.as_deref(), PRICING_TIMEOUT_SECS).await;
            let usage: Vec<UsageRecord> = dispatched
                .batches
                .iter()
                .filter(|b| !b.skipped)
                .map(|b| {
                    UsageRecord::new(
                        source,
                        model,
                        TokenUsage::new(b.input_tokens, b.output_tokens),
                        &prices,
                    )
                })
                .collect();

            if let (Some(cb), None) = (cb, &failure) {
                cb.on_conversion_complete(total_batches, usage.len());
            }
            (dispatched.text, dispatched.batches, usage, dispatched.stop_reason)
        }
    };
    let rewrite_duration_ms = rewrite_start.elapsed().as_millis() as u64;

    let stats = ConversionStats {
        total_pages: extracted.page_count,
        processed_pages: extracted.pages.len(),
        empty_pages,
        api_calls: usage.len(),
        skipped_batches: batches.iter().filter(|b| b.skipped).count(),
        total_input_tokens: batches.iter().map(|b| b.input_tokens).sum(),
        total_output_tokens: batches.iter().map(|b| b.output_tokens).sum(),
        estimated_cost_usd: usage.iter().map(|u| u.cost_usd).sum(),
        stopped_early: matches!(stop_reason, StopReason::DailyQuotaReached { .. }),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        extract_duration_ms,
        rewrite_duration_ms,
    };

    let output = ConversionOutput {
        source: source.to_string(),
        text,
        method: config.method,
        first_page: extracted.first_page,
        last_page: extracted.last_page,
        page_errors: extracted.errors,
        batches,
        usage,
        stop_reason,
        stats,
    };

    if let Some(error) = failure {
        warn!(
            "Conversion aborted after {} API call(s): {}",
            output.stats.api_calls, error
        );
        return Err(error.with_partial(output));
    }

    info!(
        "Conversion complete: {} pages, {} API calls, {} chars, {}ms total",
        output.stats.processed_pages,
        output.stats.api_calls,
        output.text.len(),
        output.stats.total_duration_ms
    );
    Ok(output)
}

/// Convert a PDF, write `<name>-extracted_text_<start>-<end>.txt` beside it
/// and append the run to the usage/cost logs.
///
/// The text file is written through a temp file and renamed into place. A
/// partial (quota-limited) result is still written. When a rewrite call
/// fails, no text file is written but the calls already made are still
/// logged. Log failures are only warnings.
pub async fn convert_to_file(
    pdf_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<(PathBuf, ConversionStats), Pdf2TxtError> {
    let pdf_path = pdf_path.as_ref();
    let output = match convert(pdf_path, config).await {
        Ok(output) => output,
        Err(e) => {
            if config.record_usage {
                record_failed_run(&e, config);
            }
            return Err(e);
        }
    };

    let end = config.pages.end.unwrap_or(output.last_page);
    let out_path = output_path_for(pdf_path, config.pages.start, end);
    write_text(&out_path, &output.text).await?;
    info!("Wrote {}", out_path.display());

    if config.record_usage {
        record_run(&output, Some(&out_path), config);
    }

    Ok((out_path, output.stats))
}

/// Output file name for `pdf_path` and the requested page range.
pub fn output_path_for(pdf_path: &Path, start: usize, end: usize) -> PathBuf {
    let stem = pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    pdf_path.with_file_name(format!("{stem}-extracted_text_{start}-{end}.txt"))
}

/// Write `text` to `path` through a sibling temp file and a rename, so a
/// reader never sees a half-written file.
pub async fn write_text(path: &Path, text: &str) -> Result<(), Pdf2TxtError> {
    let write_err = |source| Pdf2TxtError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("txt.tmp");
    tokio::fs::write(&tmp_path, text).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)
}

/// Append one usage-log entry and, for remote runs, one cost-log entry.
pub fn record_run(output: &ConversionOutput, text_file: Option<&Path>, config: &ConversionConfig) {
    let remote = output.method == Method::Remote;
    let entry = UsageLogEntry {
        timestamp: timestamp_now(),
        task_duration_seconds: output.stats.total_duration_ms as f64 / 1000.0,
        pdf_file: output.source.clone(),
        text_file: text_file.map(|p| p.display().to_string()),
        pages_processed: output.stats.processed_pages,
        method_used: output.method.label().to_string(),
        model_used: remote.then(|| {
            output
                .usage
                .first()
                .map_or_else(|| config.model.clone(), |u| u.model.clone())
        }),
        tokens_used: remote.then(|| output.stats.total_tokens()),
        api_calls_made: remote.then_some(output.stats.api_calls),
    };
    if let Err(e) = append_json_log(&config.ledger.usage_log, &entry) {
        warn!("Usage log not updated: {e}");
    }

    if remote && !output.usage.is_empty() {
        let cost = CostLogEntry::from_records(output.usage.clone());
        debug!("Run cost: ${:.4}", cost.total_cost_usd);
        if let Err(e) = append_json_log(&config.ledger.cost_log, &cost) {
            warn!("Cost log not updated: {e}");
        }
    }
}

/// Log the calls a failed run made before it stopped.
///
/// Does nothing for errors that carry no partial output. Returns `true` when
/// something was recorded.
pub fn record_failed_run(error: &Pdf2TxtError, config: &ConversionConfig) -> bool {
    match error.partial_output() {
        Some(partial) if !partial.usage.is_empty() => {
            record_run(partial, None, config);
            true
        }
        _ => false,
    }
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    pdf_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2TxtError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2TxtError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(pdf_path, config))
}

/// Read PDF metadata without extracting any text.
pub async fn inspect(pdf_path: impl AsRef<Path>) -> Result<DocumentInfo, Pdf2TxtError> {
    let pdf_path = input::resolve_input(pdf_path)?;
    extract::inspect_document(&pdf_path, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_uses_stem_and_range() {
        assert_eq!(
            output_path_for(Path::new("/data/Report.v2.pdf"), 3, 15),
            PathBuf::from("/data/Report.v2-extracted_text_3-15.txt")
        );
        assert_eq!(
            output_path_for(Path::new("book.pdf"), 1, 1),
            PathBuf::from("book-extracted_text_1-1.txt")
        );
    }

    #[tokio::test]
    async fn local_pages_are_stripped_and_normalised() {
        let pages = vec![
            PageText::new(1, "Running head\n-----\nFirst para-\ngraph text\n=====\n1"),
            PageText::new(2, ""),
            PageText::new(3, "Running head\n-----\ncontinues here.\n=====\n3"),
        ];
        let config = ConversionConfig::default();
        let out = convert_pages("mem.pdf", pages, &config).await.unwrap();
        assert_eq!(out.text, "First paragraph text continues here.");
        assert_eq!(out.stats.processed_pages, 3);
        assert_eq!(out.stats.empty_pages, 1);
        assert_eq!(out.stats.api_calls, 0);
        assert!(!out.is_partial());
    }

    #[tokio::test]
    async fn headers_kept_when_disabled() {
        let pages = vec![PageText::new(1, "Head\n-----\nBody")];
        let config = ConversionConfig::builder().strip_headers(false).build().unwrap();
        let out = convert_pages("mem.pdf", pages, &config).await.unwrap();
        assert!(out.text.starts_with("Head"));
    }

    #[tokio::test]
    async fn write_text_replaces_atomically() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("out.txt");

        write_text(&path, "first").await.unwrap();
        write_text(&path, "second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!path.with_extension("txt.tmp").exists());
    }

    #[tokio::test]
    async fn missing_pdf_is_fatal() {
        let err = convert("/no/such/file.pdf", &ConversionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2TxtError::FileNotFound { .. }));
    }
}
