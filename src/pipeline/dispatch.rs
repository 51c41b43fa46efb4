//! Rate-limited batch dispatch to the rewrite service.
//!
//! Pages are grouped into fixed-size batches of consecutive pages and sent
//! one at a time. A [`RateBudget`] enforces the provider's caps:
//!
//! | Cap | Default | Enforcement |
//! |-----|---------|-------------|
//! | requests / minute | 3 | sleep until the minute since the last call has passed |
//! | tokens / minute | 40 000 | tracked and logged only |
//! | tokens / day | 200 000 | stop before the next batch |
//!
//! Batches are strictly sequential: the next batch is not submitted until
//! the previous call has returned, so at most one request is in flight.
//!
//! The budget runs on `tokio::time`, so tests drive it with a paused clock.

use crate::config::ConversionConfig;
use crate::error::Pdf2TxtError;
use crate::output::PageText;
use crate::pipeline::rewrite::{rewrite_with_retry, RewriteService};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

/// Length of the per-minute window.
pub const MINUTE: Duration = Duration::from_secs(60);

/// Length of the daily window.
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Provider usage caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
    pub tokens_per_day: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 3,
            tokens_per_minute: 40_000,
            tokens_per_day: 200_000,
        }
    }
}

/// Usage counters for the current minute and day.
///
/// Owned by a single dispatch run; nothing is persisted between runs.
#[derive(Debug, Clone, Default)]
pub struct RateBudget {
    requests_this_minute: u32,
    tokens_this_minute: u64,
    tokens_today: u64,
    last_request: Option<Instant>,
    day_started: Option<Instant>,
}

impl RateBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests_this_minute(&self) -> u32 {
        self.requests_this_minute
    }

    pub fn tokens_this_minute(&self) -> u64 {
        self.tokens_this_minute
    }

    pub fn tokens_today(&self) -> u64 {
        self.tokens_today
    }

    /// How long to sleep before the next request may be sent.
    ///
    /// `None` when the per-minute request cap has not been reached, or when a
    /// full minute has already passed since the last request.
    pub fn wait_needed(&self, limits: &RateLimits, now: Instant) -> Option<Duration> {
        if self.requests_this_minute < limits.requests_per_minute {
            return None;
        }
        let last = self.last_request?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= MINUTE {
            None
        } else {
            Some(MINUTE - elapsed)
        }
    }

    /// Reset the minute counters when the window has rolled over.
    fn roll_minute(&mut self, now: Instant) {
        let rolled = self
            .last_request
            .is_some_and(|last| now.saturating_duration_since(last) >= MINUTE);
        if rolled {
            self.requests_this_minute = 0;
            self.tokens_this_minute = 0;
        }
    }

    /// Wait until a request is allowed, then open a fresh minute if needed.
    ///
    /// Returns how long the caller slept.
    pub async fn acquire(&mut self, limits: &RateLimits) -> Option<Duration> {
        let waited = self.wait_needed(limits, Instant::now());
        if let Some(wait) = waited {
            info!(
                "Rate limit reached ({} requests/min), waiting {:.1}s",
                limits.requests_per_minute,
                wait.as_secs_f64()
            );
            sleep(wait).await;
        }
        self.roll_minute(Instant::now());
        waited
    }

    /// Record a completed request and the tokens it consumed.
    pub fn record(&mut self, tokens: u64, limits: &RateLimits, now: Instant) {
        match self.day_started {
            Some(started) if now.saturating_duration_since(started) < DAY => {}
            Some(_) => {
                debug!("Daily window rolled over, resetting token count");
                self.tokens_today = 0;
                self.day_started = Some(now);
            }
            None => self.day_started = Some(now),
        }

        self.requests_this_minute += 1;
        self.tokens_this_minute += tokens;
        self.tokens_today += tokens;
        self.last_request = Some(now);

        if self.tokens_this_minute > limits.tokens_per_minute {
            warn!(
                "Token usage this minute ({}) exceeds the {} tokens/min limit",
                self.tokens_this_minute, limits.tokens_per_minute
            );
        }
    }

    /// `true` once today's tokens have reached the daily cap.
    pub fn daily_exhausted(&self, limits: &RateLimits) -> bool {
        self.tokens_today >= limits.tokens_per_day
    }
}

/// Outcome of one planned batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// 1-indexed batch number.
    pub batch: usize,
    pub first_page: usize,
    pub last_page: usize,
    /// `true` when the batch had no text and no call was made.
    pub skipped: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub output_len: usize,
}

/// Why a dispatch run ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Every batch was processed.
    #[default]
    Completed,
    /// The daily token cap was reached; the remaining batches were not sent.
    ///
    /// Only used while at least one batch is still pending.
    DailyQuotaReached {
        tokens_today: u64,
        limit: u64,
        batches_not_sent: usize,
    },
    /// A rewrite call failed on `batch`; it and the later batches were not
    /// rewritten.
    Aborted { batch: usize, batches_not_sent: usize },
}

/// Result of [`dispatch`].
#[derive(Debug, Clone, Default)]
pub struct DispatchOutput {
    /// Rewritten batch outputs, joined by a blank line.
    pub text: String,
    /// One entry per batch that was reached (sent or skipped).
    pub batches: Vec<BatchResult>,
    pub stop_reason: StopReason,
}

/// A dispatch run that stopped on a failed call.
///
/// `partial` holds every batch that completed before the failure, so the
/// calls that were already billed can still be accounted for.
#[derive(Debug)]
pub struct DispatchFailure {
    pub error: Pdf2TxtError,
    pub partial: DispatchOutput,
}

/// Text submitted for a batch: the non-blank pages joined by newlines.
pub fn batch_payload(pages: &[PageText]) -> String {
    pages
        .iter()
        .filter(|p| !p.is_blank())
        .map(|p| p.text.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Number of batches `page_count` pages form with `batch_size` pages each.
pub fn batch_count(page_count: usize, batch_size: usize) -> usize {
    page_count.div_ceil(batch_size.max(1))
}

/// Send `pages` to `service` in rate-limited batches.
///
/// Empty pages still count toward the batch size. A batch with no text is
/// skipped without a call and without touching the budget. A failed call
/// aborts the run with the batch number in the error; the batches completed
/// before it come back in [`DispatchFailure::partial`].
pub async fn dispatch(
    service: &dyn RewriteService,
    pages: &[PageText],
    config: &ConversionConfig,
    budget: &mut RateBudget,
) -> Result<DispatchOutput, DispatchFailure> {
    let limits = config.rate_limits;
    let chunks: Vec<&[PageText]> = pages.chunks(config.batch_size.max(1)).collect();
    let total = chunks.len();
    let cb = config.progress_callback.as_ref();

    let mut outputs: Vec<String> = Vec::with_capacity(total);
    let mut batches = Vec::with_capacity(total);
    let mut stop_reason = StopReason::Completed;

    for (i, chunk) in chunks.iter().enumerate() {
        let batch = i + 1;
        let first_page = chunk.first().map_or(0, |p| p.page_num);
        let last_page = chunk.last().map_or(0, |p| p.page_num);
        let payload = batch_payload(chunk);

        if payload.is_empty() {
            debug!("Batch {}/{}: pages {}-{} are empty, skipped", batch, total, first_page, last_page);
            if let Some(cb) = cb {
                cb.on_batch_skipped(batch, total);
            }
            batches.push(BatchResult {
                batch,
                first_page,
                last_page,
                skipped: true,
                input_tokens: 0,
                output_tokens: 0,
                duration_ms: 0,
                output_len: 0,
            });
            continue;
        }

        if let Some(wait) = budget.wait_needed(&limits, Instant::now()) {
            if let Some(cb) = cb {
                cb.on_rate_limit_wait(wait);
            }
        }
        budget.acquire(&limits).await;

        if let Some(cb) = cb {
            cb.on_batch_start(batch, total, first_page, last_page);
        }
        info!(
            "Batch {}/{}: pages {}-{} ({} chars)",
            batch,
            total,
            first_page,
            last_page,
            payload.len()
        );

        let start = Instant::now();
        let rewrite = match rewrite_with_retry(service, &payload, config, batch).await {
            Ok(rewrite) => rewrite,
            Err(error) => {
                return Err(DispatchFailure {
                    error,
                    partial: DispatchOutput {
                        text: outputs.join("\n\n"),
                        batches,
                        stop_reason: StopReason::Aborted {
                            batch,
                            batches_not_sent: total - batch + 1,
                        },
                    },
                })
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        budget.record(rewrite.total_tokens(), &limits, Instant::now());
        debug!(
            "Batch {}: {} input tokens, {} output tokens, {}ms, {} tokens today",
            batch,
            rewrite.input_tokens,
            rewrite.output_tokens,
            duration_ms,
            budget.tokens_today()
        );

        if let Some(cb) = cb {
            cb.on_batch_complete(batch, total, rewrite.text.len(), rewrite.total_tokens());
        }
        batches.push(BatchResult {
            batch,
            first_page,
            last_page,
            skipped: false,
            input_tokens: rewrite.input_tokens,
            output_tokens: rewrite.output_tokens,
            duration_ms,
            output_len: rewrite.text.len(),
        });
        outputs.push(rewrite.text);

        if budget.daily_exhausted(&limits) && batch < total {
            let batches_not_sent = total - batch;
            warn!(
                "Daily token limit reached ({} / {}), {} batch(es) not sent",
                budget.tokens_today(),
                limits.tokens_per_day,
                batches_not_sent
            );
            if let Some(cb) = cb {
                cb.on_quota_exhausted(budget.tokens_today(), limits.tokens_per_day);
            }
            stop_reason = StopReason::DailyQuotaReached {
                tokens_today: budget.tokens_today(),
                limit: limits.tokens_per_day,
                batches_not_sent,
            };
            break;
        }
    }

    Ok(DispatchOutput {
        text: outputs.join("\n\n"),
        batches,
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_skips_blank_pages() {
        let pages = vec![
            PageText::new(1, "alpha"),
            PageText::new(2, "   "),
            PageText::new(3, "gamma\n"),
        ];
        assert_eq!(batch_payload(&pages), "alpha\ngamma");
    }

    #[test]
    fn batch_count_rounds_up() {
        assert_eq!(batch_count(12, 5), 3);
        assert_eq!(batch_count(10, 5), 2);
        assert_eq!(batch_count(0, 5), 0);
    }

    #[test]
    fn no_wait_below_cap() {
        let limits = RateLimits::default();
        let mut budget = RateBudget::new();
        let now = Instant::now();
        budget.record(10, &limits, now);
        budget.record(10, &limits, now);
        assert_eq!(budget.wait_needed(&limits, now), None);
    }

    #[test]
    fn wait_at_cap() {
        let limits = RateLimits::default();
        let mut budget = RateBudget::new();
        let now = Instant::now();
        for _ in 0..3 {
            budget.record(10, &limits, now);
        }
        assert_eq!(
            budget.wait_needed(&limits, now + Duration::from_secs(20)),
            Some(Duration::from_secs(40))
        );
        assert_eq!(budget.wait_needed(&limits, now + MINUTE), None);
    }

    #[test]
    fn daily_cap() {
        let limits = RateLimits {
            tokens_per_day: 100,
            ..RateLimits::default()
        };
        let mut budget = RateBudget::new();
        let now = Instant::now();
        budget.record(60, &limits, now);
        assert!(!budget.daily_exhausted(&limits));
        budget.record(40, &limits, now);
        assert!(budget.daily_exhausted(&limits));
    }

    #[test]
    fn daily_window_rolls_over() {
        let limits = RateLimits::default();
        let mut budget = RateBudget::new();
        let start = Instant::now();
        budget.record(150_000, &limits, start);
        budget.record(10, &limits, start + DAY);
        assert_eq!(budget.tokens_today(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_sleeps_and_resets_minute() {
        let limits = RateLimits::default();
        let mut budget = RateBudget::new();
        let t0 = Instant::now();
        for _ in 0..3 {
            budget.record(100, &limits, Instant::now());
        }
        let waited = budget.acquire(&limits).await;
        assert_eq!(waited, Some(MINUTE));
        assert!(Instant::now() - t0 >= MINUTE);
        assert_eq!(budget.requests_this_minute(), 0);
        assert_eq!(budget.tokens_this_minute(), 0);
        assert_eq!(budget.tokens_today(), 300);
    }
}
