//! Batch dispatch against a scripted rewrite service.
//!
//! Time is paused, so rate-limit sleeps complete instantly while
//! `tokio::time::Instant` still observes them.

use async_trait::async_trait;
use edgequake_pdf2txt::pipeline::dispatch::dispatch;
use edgequake_pdf2txt::{
    convert_pages, ConversionConfig, ConversionProgressCallback, Method, PageText, Pdf2TxtError,
    RateBudget, RateLimits, Rewrite, RewriteError, RewriteService, StopReason,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Answers `out-<n>` for call n, charging `tokens_per_call` split evenly.
struct Scripted {
    calls: AtomicUsize,
    tokens_per_call: u64,
    fail_on_call: Option<usize>,
    payloads: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(tokens_per_call: u64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            tokens_per_call,
            fail_on_call: None,
            payloads: Mutex::new(Vec::new()),
        })
    }

    fn failing_on(call: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            tokens_per_call: 10,
            fail_on_call: Some(call),
            payloads: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RewriteService for Scripted {
    async fn rewrite(&self, text: &str, _model: &str) -> Result<Rewrite, RewriteError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.payloads.lock().unwrap().push(text.to_string());
        if self.fail_on_call == Some(n) {
            return Err(RewriteError::Api("429 Too Many Requests".into()));
        }
        Ok(Rewrite {
            text: format!("out-{n}"),
            input_tokens: self.tokens_per_call / 2,
            output_tokens: self.tokens_per_call - self.tokens_per_call / 2,
        })
    }
}

/// Records every callback as a short event string.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, e: String) {
        self.events.lock().unwrap().push(e);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ConversionProgressCallback for Recorder {
    fn on_conversion_start(&self, total_pages: usize, total_batches: usize) {
        self.push(format!("start {total_pages}/{total_batches}"));
    }
    fn on_batch_start(&self, batch: usize, _total: usize, first: usize, last: usize) {
        self.push(format!("batch {batch} pages {first}-{last}"));
    }
    fn on_batch_complete(&self, batch: usize, _total: usize, _len: usize, tokens: u64) {
        self.push(format!("done {batch} ({tokens})"));
    }
    fn on_batch_skipped(&self, batch: usize, _total: usize) {
        self.push(format!("skip {batch}"));
    }
    fn on_rate_limit_wait(&self, _wait: Duration) {
        self.push("wait".into());
    }
    fn on_quota_exhausted(&self, tokens_today: u64, limit: u64) {
        self.push(format!("quota {tokens_today}/{limit}"));
    }
    fn on_conversion_complete(&self, total_batches: usize, sent_batches: usize) {
        self.push(format!("complete {sent_batches}/{total_batches}"));
    }
}

fn pages(n: usize) -> Vec<PageText> {
    (1..=n)
        .map(|i| PageText::new(i, format!("Text of page {i}.")))
        .collect()
}

fn remote_config(service: Arc<Scripted>, batch_size: usize, limits: RateLimits) -> ConversionConfig {
    ConversionConfig::builder()
        .method(Method::Remote)
        .model("gpt-4o")
        .rewrite_service(service)
        .batch_size(batch_size)
        .rate_limits(limits)
        .build()
        .unwrap()
}

// ── Batching ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn pages_are_grouped_into_consecutive_batches() {
    let service = Scripted::new(100);
    let config = remote_config(service.clone(), 5, RateLimits::default());
    let mut budget = RateBudget::new();

    let out = dispatch(service.as_ref(), &pages(12), &config, &mut budget)
        .await
        .unwrap();

    assert_eq!(service.calls(), 3);
    assert_eq!(out.text, "out-1\n\nout-2\n\nout-3");
    let ranges: Vec<(usize, usize)> = out
        .batches
        .iter()
        .map(|b| (b.first_page, b.last_page))
        .collect();
    assert_eq!(ranges, vec![(1, 5), (6, 10), (11, 12)]);
    assert_eq!(out.stop_reason, StopReason::Completed);
    assert_eq!(budget.tokens_today(), 300);

    let payloads = service.payloads();
    assert!(payloads[0].starts_with("Text of page 1."));
    assert!(payloads[0].contains("\nText of page 5."));
    assert!(!payloads[0].contains("page 6"));
}

#[tokio::test(start_paused = true)]
async fn empty_batch_is_skipped_without_a_call() {
    let service = Scripted::new(10);
    let config = remote_config(service.clone(), 2, RateLimits::default());
    let mut budget = RateBudget::new();
    let input = vec![
        PageText::new(1, "One."),
        PageText::new(2, "Two."),
        PageText::new(3, "  "),
        PageText::new(4, ""),
        PageText::new(5, "Five."),
    ];

    let out = dispatch(service.as_ref(), &input, &config, &mut budget)
        .await
        .unwrap();

    assert_eq!(service.calls(), 2);
    assert_eq!(out.batches.len(), 3);
    assert!(out.batches[1].skipped);
    assert_eq!(out.batches[1].input_tokens, 0);
    assert_eq!(budget.requests_this_minute(), 2);
    assert_eq!(out.text, "out-1\n\nout-2");
}

// ── Rate limits ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn fourth_request_waits_for_the_minute_to_pass() {
    let service = Scripted::new(10);
    let config = remote_config(service.clone(), 1, RateLimits::default());
    let mut budget = RateBudget::new();

    let started = Instant::now();
    dispatch(service.as_ref(), &pages(3), &config, &mut budget)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    let service = Scripted::new(10);
    let mut budget = RateBudget::new();
    let started = Instant::now();
    dispatch(service.as_ref(), &pages(4), &config, &mut budget)
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(59));
    assert!(started.elapsed() <= Duration::from_secs(61));
    assert_eq!(budget.requests_this_minute(), 1);
}

#[tokio::test(start_paused = true)]
async fn seven_batches_at_three_per_minute_take_two_windows() {
    let service = Scripted::new(10);
    let config = remote_config(service.clone(), 1, RateLimits::default());
    let mut budget = RateBudget::new();

    let started = Instant::now();
    dispatch(service.as_ref(), &pages(7), &config, &mut budget)
        .await
        .unwrap();

    assert_eq!(service.calls(), 7);
    assert!(started.elapsed() >= Duration::from_secs(119));
    assert!(started.elapsed() < Duration::from_secs(180));
}

#[tokio::test(start_paused = true)]
async fn daily_quota_stops_before_next_batch() {
    let service = Scripted::new(1_000);
    let limits = RateLimits {
        requests_per_minute: 100,
        tokens_per_day: 2_500,
        ..RateLimits::default()
    };
    let config = remote_config(service.clone(), 1, limits);
    let mut budget = RateBudget::new();

    let out = dispatch(service.as_ref(), &pages(6), &config, &mut budget)
        .await
        .unwrap();

    assert_eq!(service.calls(), 3);
    assert_eq!(out.text, "out-1\n\nout-2\n\nout-3");
    assert_eq!(
        out.stop_reason,
        StopReason::DailyQuotaReached {
            tokens_today: 3_000,
            limit: 2_500,
            batches_not_sent: 3,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn quota_reached_on_the_last_batch_is_still_complete() {
    let service = Scripted::new(1_000);
    let limits = RateLimits {
        requests_per_minute: 100,
        tokens_per_day: 2_000,
        ..RateLimits::default()
    };
    let config = remote_config(service.clone(), 1, limits);

    let out = convert_pages("two.pdf", pages(2), &config).await.unwrap();

    assert_eq!(service.calls(), 2);
    assert_eq!(out.text, "out-1\n\nout-2");
    assert_eq!(out.stop_reason, StopReason::Completed);
    assert!(!out.is_partial());
    assert!(!out.stats.stopped_early);
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failed_call_aborts_with_batch_number() {
    let service = Scripted::failing_on(2);
    let config = remote_config(service.clone(), 2, RateLimits::default());
    let mut budget = RateBudget::new();

    let err = dispatch(service.as_ref(), &pages(6), &config, &mut budget)
        .await
        .unwrap_err();

    assert_eq!(service.calls(), 2, "no batch after the failure is sent");
    match err.error {
        Pdf2TxtError::RewriteFailed { batch, attempts, .. } => {
            assert_eq!(batch, 2);
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.partial.text, "out-1");
    assert_eq!(err.partial.batches.len(), 1);
    assert_eq!(
        err.partial.stop_reason,
        StopReason::Aborted {
            batch: 2,
            batches_not_sent: 2,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn failed_conversion_carries_the_completed_batches() {
    let service = Scripted::failing_on(3);
    let config = remote_config(service.clone(), 1, RateLimits::default());

    let err = convert_pages("four.pdf", pages(4), &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2TxtError::RewriteFailed { batch: 3, .. }));
    let partial = err.partial_output().expect("completed batches are kept");
    assert_eq!(partial.text, "out-1\n\nout-2");
    assert_eq!(partial.usage.len(), 2);
    assert_eq!(partial.stats.api_calls, 2);
    assert_eq!(partial.stats.total_tokens(), 20);
    assert!(partial.is_partial());
    assert!(!partial.stats.stopped_early);
}

// ── Through convert_pages ────────────────────────────────────────────────────

/// A service pinned to one model regardless of what is requested.
struct Pinned(&'static str);

#[async_trait]
impl RewriteService for Pinned {
    async fn rewrite(&self, text: &str, _model: &str) -> Result<Rewrite, RewriteError> {
        Ok(Rewrite {
            text: text.to_string(),
            input_tokens: 500,
            output_tokens: 500,
        })
    }

    fn served_model(&self) -> Option<&str> {
        Some(self.0)
    }
}

#[tokio::test(start_paused = true)]
async fn usage_is_priced_under_the_served_model() {
    let config = ConversionConfig::builder()
        .method(Method::Remote)
        .model("gpt-4o")
        .rewrite_service(Arc::new(Pinned("gpt-3.5-turbo")))
        .build()
        .unwrap();

    let out = convert_pages("a.pdf", pages(1), &config).await.unwrap();

    assert_eq!(out.usage.len(), 1);
    assert_eq!(out.usage[0].model, "gpt-3.5-turbo");
    // gpt-3.5-turbo at $0.0015 per 1K tokens, not gpt-4o's $0.005
    assert!((out.stats.estimated_cost_usd - 0.0015).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn remote_conversion_reports_usage_and_progress() {
    let service = Scripted::new(200);
    let recorder = Arc::new(Recorder::default());
    let config = ConversionConfig::builder()
        .method(Method::Remote)
        .model("gpt-4o")
        .rewrite_service(service.clone())
        .batch_size(2)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let input = vec![
        PageText::new(3, "Third page."),
        PageText::new(4, "Fourth page."),
        PageText::new(5, ""),
        PageText::new(6, ""),
        PageText::new(7, "Seventh page."),
    ];

    let out = convert_pages("book.pdf", input, &config).await.unwrap();

    assert_eq!(out.text, "out-1\n\nout-2");
    assert_eq!(out.stats.api_calls, 2);
    assert_eq!(out.stats.skipped_batches, 1);
    assert_eq!(out.stats.empty_pages, 2);
    assert_eq!(out.stats.total_tokens(), 400);
    assert!(!out.is_partial());

    assert_eq!(out.usage.len(), 2);
    assert_eq!(out.usage[0].model, "gpt-4o");
    assert_eq!(out.usage[0].tokens, 200);
    // gpt-4o at $0.005 per 1K tokens
    assert!((out.stats.estimated_cost_usd - 0.002).abs() < 1e-9);

    assert_eq!(
        recorder.events(),
        vec![
            "start 5/3",
            "batch 1 pages 3-4",
            "done 1 (200)",
            "skip 2",
            "batch 3 pages 7-7",
            "done 3 (200)",
            "complete 2/3",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn rate_limit_wait_is_reported() {
    let service = Scripted::new(10);
    let recorder = Arc::new(Recorder::default());
    let config = ConversionConfig::builder()
        .method(Method::Remote)
        .rewrite_service(service.clone())
        .batch_size(1)
        .rate_limits(RateLimits {
            requests_per_minute: 1,
            ..RateLimits::default()
        })
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    convert_pages("a.pdf", pages(2), &config).await.unwrap();

    let events = recorder.events();
    let wait_at = events.iter().position(|e| e == "wait").unwrap();
    let second = events.iter().position(|e| e == "batch 2 pages 2-2").unwrap();
    assert!(wait_at < second);
}
