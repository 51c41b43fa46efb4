//! Configuration types for PDF text extraction.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Every knob lives in one struct so a
//! config can be shared across tasks, logged, and compared between runs.

use crate::error::Pdf2TxtError;
use crate::ledger::{DEFAULT_COST_LOG, DEFAULT_USAGE_LOG};
use crate::pipeline::dispatch::RateLimits;
use crate::pipeline::normalize::{NormalizeOptions, NormalizePreset};
use crate::pipeline::rewrite::RewriteService;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default model used for remote rewriting.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Configuration for a PDF text extraction run.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2txt::{ConversionConfig, Method, PageRange};
///
/// let config = ConversionConfig::builder()
///     .method(Method::Remote)
///     .pages(PageRange::new(3, Some(15)).unwrap())
///     .language("ru")
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Local normalisation only, or normalisation followed by LLM rewriting.
    pub method: Method,

    /// Pages to extract (1-indexed, inclusive). Default: all.
    pub pages: PageRange,

    /// Language code of the document, passed to the rewrite prompt. Default: "en".
    pub language: String,

    /// Model identifier for remote rewriting. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed rewrite service. Takes precedence over `provider_name`.
    pub rewrite_service: Option<Arc<dyn RewriteService>>,

    /// Sampling temperature for rewrite calls. Default: 0.3.
    pub temperature: f32,

    /// Upper bound on `max_tokens` per rewrite request. Default: 1000.
    ///
    /// The request asks for `min(words * 2, max_tokens_cap)` tokens.
    pub max_tokens_cap: usize,

    /// Retries on a failed rewrite call before the run aborts. Default: 0.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Pages per rewrite batch. Default: 5.
    pub batch_size: usize,

    /// Request and token caps for the rewrite service.
    pub rate_limits: RateLimits,

    /// Remove running headers/footers delimited by separator lines. Default: true.
    pub strip_headers: bool,

    /// Text normalisation rules.
    pub normalize: NormalizeOptions,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom rewrite instruction. If None, uses the built-in default.
    pub rewrite_prompt: Option<String>,

    /// Where the usage and cost logs are written.
    pub ledger: LedgerPaths,

    /// Append to the usage/cost logs after a run written to disk. Default: true.
    pub record_usage: bool,

    /// Optional URL serving a JSON price table; falls back to the built-in table.
    pub pricing_url: Option<String>,

    /// Receives per-batch progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            method: Method::default(),
            pages: PageRange::default(),
            language: "en".to_string(),
            model: DEFAULT_MODEL.to_string(),
            provider_name: None,
            rewrite_service: None,
            temperature: 0.3,
            max_tokens_cap: 1000,
            max_retries: 0,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            batch_size: 5,
            rate_limits: RateLimits::default(),
            strip_headers: true,
            normalize: NormalizeOptions::default(),
            password: None,
            rewrite_prompt: None,
            ledger: LedgerPaths::default(),
            record_usage: true,
            pricing_url: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("method", &self.method)
            .field("pages", &self.pages)
            .field("language", &self.language)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field(
                "rewrite_service",
                &self.rewrite_service.as_ref().map(|_| "<dyn RewriteService>"),
            )
            .field("temperature", &self.temperature)
            .field("max_tokens_cap", &self.max_tokens_cap)
            .field("max_retries", &self.max_retries)
            .field("batch_size", &self.batch_size)
            .field("rate_limits", &self.rate_limits)
            .field("strip_headers", &self.strip_headers)
            .field("normalize", &self.normalize)
            .field("ledger", &self.ledger)
            .field("record_usage", &self.record_usage)
            .field("pricing_url", &self.pricing_url)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.config.method = method;
        self
    }

    pub fn pages(mut self, pages: PageRange) -> Self {
        self.config.pages = pages;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = language.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn rewrite_service(mut self, service: Arc<dyn RewriteService>) -> Self {
        self.config.rewrite_service = Some(service);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens_cap(mut self, n: usize) -> Self {
        self.config.max_tokens_cap = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn rate_limits(mut self, limits: RateLimits) -> Self {
        self.config.rate_limits = limits;
        self
    }

    pub fn strip_headers(mut self, v: bool) -> Self {
        self.config.strip_headers = v;
        self
    }

    pub fn normalize(mut self, options: NormalizeOptions) -> Self {
        self.config.normalize = options;
        self
    }

    /// Shorthand for `normalize(NormalizeOptions::from_preset(preset))`.
    pub fn preset(mut self, preset: NormalizePreset) -> Self {
        self.config.normalize = NormalizeOptions::from_preset(preset);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn rewrite_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.rewrite_prompt = Some(prompt.into());
        self
    }

    pub fn ledger(mut self, paths: LedgerPaths) -> Self {
        self.config.ledger = paths;
        self
    }

    pub fn record_usage(mut self, v: bool) -> Self {
        self.config.record_usage = v;
        self
    }

    pub fn pricing_url(mut self, url: impl Into<String>) -> Self {
        self.config.pricing_url = Some(url.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2TxtError> {
        let c = &self.config;
        if c.batch_size == 0 {
            return Err(Pdf2TxtError::InvalidConfig(
                "Batch size must be ≥ 1".into(),
            ));
        }
        if c.rate_limits.requests_per_minute == 0 {
            return Err(Pdf2TxtError::InvalidConfig(
                "Requests per minute must be ≥ 1".into(),
            ));
        }
        if c.max_tokens_cap == 0 {
            return Err(Pdf2TxtError::InvalidConfig(
                "Max tokens cap must be ≥ 1".into(),
            ));
        }
        if c.method == Method::Remote && c.model.trim().is_empty() {
            return Err(Pdf2TxtError::InvalidConfig(
                "Remote method needs a model name".into(),
            ));
        }
        if c.normalize.filter_foreign_runs && c.normalize.foreign_run_threshold == 0 {
            return Err(Pdf2TxtError::InvalidConfig(
                "Foreign run threshold must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Processing method for the extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Method {
    /// Header stripping and normalisation only. No network access. (default)
    #[default]
    Local,
    /// Normalised pages are rewritten in rate-limited batches by an LLM.
    Remote,
}

impl Method {
    /// Label recorded as `method_used` in the usage log.
    pub fn label(&self) -> &'static str {
        match self {
            Method::Local => "Local Processing (No API)",
            Method::Remote => "OpenAI API",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inclusive, 1-indexed page range. `end = None` means "to the last page".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl Default for PageRange {
    fn default() -> Self {
        Self::all()
    }
}

impl PageRange {
    /// Validate and create a range. Rejects `start < 1` and `end < start`.
    pub fn new(start: usize, end: Option<usize>) -> Result<Self, Pdf2TxtError> {
        let invalid = Pdf2TxtError::InvalidPageRange {
            start,
            end: end.unwrap_or(start),
        };
        if start < 1 {
            return Err(invalid);
        }
        if let Some(e) = end {
            if e < start {
                return Err(invalid);
            }
        }
        Ok(Self { start, end })
    }

    /// Every page of the document.
    pub fn all() -> Self {
        Self {
            start: 1,
            end: None,
        }
    }

    /// Resolve against a document of `total_pages` pages.
    ///
    /// An end past the document is clamped to the last page; a start past the
    /// document is [`Pdf2TxtError::PageOutOfRange`].
    pub fn resolve(&self, total_pages: usize) -> Result<(usize, usize), Pdf2TxtError> {
        if self.start > total_pages {
            return Err(Pdf2TxtError::PageOutOfRange {
                page: self.start,
                total: total_pages,
            });
        }
        let end = self.end.unwrap_or(total_pages).min(total_pages);
        Ok((self.start, end))
    }
}

impl std::str::FromStr for PageRange {
    type Err = Pdf2TxtError;

    /// Parse `"7"`, `"3-15"` or `"3-"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || Pdf2TxtError::InvalidConfig(format!("Invalid page range '{s}'"));
        let parse = |p: &str| p.trim().parse::<usize>().map_err(|_| bad());
        match s.split_once('-') {
            None => {
                let page = parse(s)?;
                PageRange::new(page, Some(page))
            }
            Some((start, end)) if end.trim().is_empty() => PageRange::new(parse(start)?, None),
            Some((start, end)) => PageRange::new(parse(start)?, Some(parse(end)?)),
        }
    }
}

/// Locations of the append-only usage and cost logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPaths {
    pub usage_log: PathBuf,
    pub cost_log: PathBuf,
}

impl Default for LedgerPaths {
    fn default() -> Self {
        Self {
            usage_log: PathBuf::from(DEFAULT_USAGE_LOG),
            cost_log: PathBuf::from(DEFAULT_COST_LOG),
        }
    }
}

impl LedgerPaths {
    /// Both logs under `dir` with their default file names.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            usage_log: dir.join(DEFAULT_USAGE_LOG),
            cost_log: dir.join(DEFAULT_COST_LOG),
        }
    }
}
