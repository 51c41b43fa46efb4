//! Usage and cost logs written by finished and failed runs.

use async_trait::async_trait;
use edgequake_pdf2txt::convert::{record_failed_run, record_run};
use edgequake_pdf2txt::ledger::{read_json_log, CostLogEntry, UsageLogEntry};
use edgequake_pdf2txt::{
    convert_pages, ConversionConfig, CostReport, LedgerPaths, Method, PageText, Pdf2TxtError,
    Rewrite, RewriteError, RewriteService,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Echo;

/// Like [`Echo`], but fails on the given call.
struct FailsOn {
    call: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl RewriteService for FailsOn {
    async fn rewrite(&self, text: &str, model: &str) -> Result<Rewrite, RewriteError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.call {
            return Err(RewriteError::Api("503 Service Unavailable".into()));
        }
        Echo.rewrite(text, model).await
    }
}

#[async_trait]
impl RewriteService for Echo {
    async fn rewrite(&self, text: &str, _model: &str) -> Result<Rewrite, RewriteError> {
        Ok(Rewrite {
            text: text.to_string(),
            input_tokens: 600,
            output_tokens: 400,
        })
    }
}

fn config(method: Method, dir: &Path) -> ConversionConfig {
    ConversionConfig::builder()
        .method(method)
        .model("gpt-3.5-turbo")
        .rewrite_service(Arc::new(Echo))
        .batch_size(1)
        .ledger(LedgerPaths::in_dir(dir))
        .build()
        .unwrap()
}

fn sample_pages() -> Vec<PageText> {
    vec![
        PageText::new(1, "First page body."),
        PageText::new(2, "Second page body."),
    ]
}

#[tokio::test(start_paused = true)]
async fn remote_run_appends_usage_and_cost() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(Method::Remote, tmp.path());

    let output = convert_pages("doc.pdf", sample_pages(), &config)
        .await
        .unwrap();
    record_run(&output, Some(Path::new("doc-extracted_text_1-2.txt")), &config);

    let usage: Vec<UsageLogEntry> = read_json_log(&config.ledger.usage_log);
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].pdf_file, "doc.pdf");
    assert_eq!(usage[0].pages_processed, 2);
    assert_eq!(usage[0].method_used, "OpenAI API");
    assert_eq!(usage[0].model_used.as_deref(), Some("gpt-3.5-turbo"));
    assert_eq!(usage[0].tokens_used, Some(2_000));
    assert_eq!(usage[0].api_calls_made, Some(2));
    assert_eq!(
        usage[0].text_file.as_deref(),
        Some("doc-extracted_text_1-2.txt")
    );

    let costs: Vec<CostLogEntry> = read_json_log(&config.ledger.cost_log);
    assert_eq!(costs.len(), 1);
    assert_eq!(costs[0].details.len(), 2);
    // 1 000 tokens per call at $0.0015 per 1K
    assert!((costs[0].total_cost_usd - 0.003).abs() < 1e-9);
}

#[tokio::test]
async fn local_run_writes_usage_only() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(Method::Local, tmp.path());

    let output = convert_pages("doc.pdf", sample_pages(), &config)
        .await
        .unwrap();
    record_run(&output, None, &config);

    let raw = std::fs::read_to_string(&config.ledger.usage_log).unwrap();
    assert!(raw.contains("Local Processing (No API)"));
    assert!(!raw.contains("model_used"));
    assert!(!raw.contains("text_file"));
    assert!(!config.ledger.cost_log.exists());
    assert_eq!(CostReport::load(&config.ledger.cost_log), CostReport::Missing);
}

#[tokio::test(start_paused = true)]
async fn runs_accumulate_and_survive_a_corrupt_log() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(Method::Remote, tmp.path());
    std::fs::write(&config.ledger.cost_log, "this is not json").unwrap();
    assert_eq!(CostReport::load(&config.ledger.cost_log), CostReport::Invalid);

    for _ in 0..3 {
        let output = convert_pages("doc.pdf", sample_pages(), &config)
            .await
            .unwrap();
        record_run(&output, None, &config);
    }

    let usage: Vec<UsageLogEntry> = read_json_log(&config.ledger.usage_log);
    assert_eq!(usage.len(), 3);

    match CostReport::load(&config.ledger.cost_log) {
        CostReport::Summary(summary) => {
            assert_eq!(summary.entries.len(), 3);
            assert_eq!(summary.total_tokens(), 6_000);
            assert!((summary.total_cost_usd - 0.009).abs() < 1e-9);
            let report = CostReport::Summary(summary).to_string();
            assert!(report.starts_with("--- API Cost Summary ---\n"));
            assert_eq!(report.matches("| Model: gpt-3.5-turbo |").count(), 6);
            assert!(report.ends_with("Total estimated cost: $0.0090\n"));
        }
        other => panic!("expected a summary, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn calls_before_a_failure_are_still_logged() {
    let tmp = tempfile::tempdir().unwrap();
    let config = ConversionConfig::builder()
        .method(Method::Remote)
        .model("gpt-3.5-turbo")
        .rewrite_service(Arc::new(FailsOn {
            call: 3,
            calls: AtomicUsize::new(0),
        }))
        .batch_size(1)
        .ledger(LedgerPaths::in_dir(tmp.path()))
        .build()
        .unwrap();
    let pages: Vec<PageText> = (1..=4)
        .map(|i| PageText::new(i, format!("Body of page {i}.")))
        .collect();

    let err = convert_pages("doc.pdf", pages, &config).await.unwrap_err();
    assert!(matches!(err, Pdf2TxtError::RewriteFailed { batch: 3, .. }));
    assert!(record_failed_run(&err, &config));

    let usage: Vec<UsageLogEntry> = read_json_log(&config.ledger.usage_log);
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].tokens_used, Some(2_000));
    assert_eq!(usage[0].api_calls_made, Some(2));
    assert!(usage[0].text_file.is_none());

    let costs: Vec<CostLogEntry> = read_json_log(&config.ledger.cost_log);
    assert_eq!(costs.len(), 1);
    assert_eq!(costs[0].details.len(), 2);
    assert!((costs[0].total_cost_usd - 0.003).abs() < 1e-9);
}

#[test]
fn errors_without_billed_calls_log_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(Method::Remote, tmp.path());
    let err = Pdf2TxtError::InvalidConfig("batch_size must be at least 1".into());

    assert!(!record_failed_run(&err, &config));
    assert!(!config.ledger.usage_log.exists());
    assert!(!config.ledger.cost_log.exists());
}
