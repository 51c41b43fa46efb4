//! Cost and usage ledger.
//!
//! Two append-only JSON arrays are kept on disk:
//!
//! * the **usage log** (`pdf_processing_log.json`): one [`UsageLogEntry`]
//!   per finished run, local or remote
//! * the **cost log** (`cost_log.json`): one [`CostLogEntry`] per remote
//!   run, holding a [`UsageRecord`] for every rewrite call
//!
//! Appending reads the whole array, pushes one element and writes the array
//! back through a temp file. A missing or unparsable file reads as an empty
//! array, so a corrupt log is replaced on the next append. Two processes
//! appending to the same file at once can lose one of the updates.
//!
//! Prices are dollars per 1000 tokens. Models with a single blended rate
//! store it as both the input and the output rate. Unknown models cost $0.

use crate::error::Pdf2TxtError;
use chrono::Local;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Default file name of the usage log.
pub const DEFAULT_USAGE_LOG: &str = "pdf_processing_log.json";

/// Default file name of the cost log.
pub const DEFAULT_COST_LOG: &str = "cost_log.json";

/// Timestamp format used in both logs.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Local time formatted with [`TIMESTAMP_FORMAT`].
pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

// ── Pricing ──────────────────────────────────────────────────────────────

/// Dollars per 1000 tokens for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPrice {
    /// One rate for input and output alike.
    pub fn blended(per_1k: f64) -> Self {
        Self {
            input_per_1k: per_1k,
            output_per_1k: per_1k,
        }
    }

    pub fn split(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    pub fn cost(&self, usage: TokenUsage) -> f64 {
        usage.input as f64 / 1000.0 * self.input_per_1k
            + usage.output as f64 / 1000.0 * self.output_per_1k
    }
}

/// Price entry as served by a remote price table: a blended number or an
/// `{input_per_1k, output_per_1k}` object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PriceEntry {
    Blended(f64),
    Split(ModelPrice),
}

impl From<PriceEntry> for ModelPrice {
    fn from(entry: PriceEntry) -> Self {
        match entry {
            PriceEntry::Blended(rate) => ModelPrice::blended(rate),
            PriceEntry::Split(price) => price,
        }
    }
}

/// Model → price lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    models: BTreeMap<String, ModelPrice>,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::static_defaults()
    }
}

impl PriceTable {
    /// Built-in rates.
    pub fn static_defaults() -> Self {
        let models = [
            ("gpt-3.5-turbo", ModelPrice::blended(0.0015)),
            ("gpt-4o", ModelPrice::blended(0.005)),
            ("gpt-4.1-nano", ModelPrice::split(0.0001, 0.0004)),
            ("gpt-4.1-mini", ModelPrice::split(0.0004, 0.0016)),
            ("gpt-4.1", ModelPrice::split(0.002, 0.008)),
        ]
        .into_iter()
        .map(|(name, price)| (name.to_string(), price))
        .collect();
        Self { models }
    }

    /// A table with no models: everything prices at zero.
    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
        }
    }

    pub fn get(&self, model: &str) -> Option<&ModelPrice> {
        self.models.get(model)
    }

    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.models.insert(model.into(), price);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Dollar estimate for `usage` on `model`; 0.0 for unknown models.
    pub fn estimate(&self, model: &str, usage: TokenUsage) -> f64 {
        self.get(model).map_or(0.0, |price| price.cost(usage))
    }

    /// Parse a JSON object of `model → rate | {input_per_1k, output_per_1k}`
    /// and lay it over the built-in rates.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let remote: BTreeMap<String, PriceEntry> = serde_json::from_str(json)?;
        let mut table = Self::static_defaults();
        for (model, entry) in remote {
            table.insert(model, entry.into());
        }
        Ok(table)
    }

    /// Download a price table.
    pub async fn fetch(url: &str, timeout_secs: u64) -> Result<Self, Pdf2TxtError> {
        let fail = |reason: String| Pdf2TxtError::PricingFetchFailed {
            url: url.to_string(),
            reason,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| fail(e.to_string()))?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fail(format!("HTTP {}", response.status())));
        }
        let body = response.text().await.map_err(|e| fail(e.to_string()))?;
        Self::from_json(&body).map_err(|e| fail(e.to_string()))
    }

    /// Fetch from `url` when given, falling back to the built-in rates on any failure.
    pub async fn load(url: Option<&str>, timeout_secs: u64) -> Self {
        let Some(url) = url else {
            return Self::static_defaults();
        };
        match Self::fetch(url, timeout_secs).await {
            Ok(table) => {
                debug!("Loaded {} model prices from {}", table.len(), url);
                table
            }
            Err(e) => {
                warn!("{e}; using built-in prices");
                Self::static_defaults()
            }
        }
    }
}

/// Input/output token counts of one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    /// Split a bare total 50/50; an odd token goes to the output side.
    pub fn from_total(total: u64) -> Self {
        let input = total / 2;
        Self {
            input,
            output: total - input,
        }
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

// ── Log records ──────────────────────────────────────────────────────────

/// Cost of one rewrite call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: String,
    pub file: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tokens: u64,
    pub cost_usd: f64,
}

impl UsageRecord {
    pub fn new(file: &str, model: &str, usage: TokenUsage, prices: &PriceTable) -> Self {
        Self {
            timestamp: timestamp_now(),
            file: file.to_string(),
            model: model.to_string(),
            input_tokens: usage.input,
            output_tokens: usage.output,
            tokens: usage.total(),
            cost_usd: prices.estimate(model, usage),
        }
    }
}

/// One element of the cost log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLogEntry {
    pub timestamp: String,
    pub total_cost_usd: f64,
    pub details: Vec<UsageRecord>,
}

impl CostLogEntry {
    pub fn from_records(details: Vec<UsageRecord>) -> Self {
        Self {
            timestamp: timestamp_now(),
            total_cost_usd: details.iter().map(|r| r.cost_usd).sum(),
            details,
        }
    }
}

/// One element of the usage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub timestamp: String,
    pub task_duration_seconds: f64,
    pub pdf_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_file: Option<String>,
    pub pages_processed: usize,
    pub method_used: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_calls_made: Option<usize>,
}

// ── Persistence ──────────────────────────────────────────────────────────

/// Read a JSON array log. Missing, unreadable or malformed files yield an
/// empty vector; elements that do not match `T` are skipped.
pub fn read_json_log<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    read_raw_log(path)
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect()
}

fn read_raw_log(path: &Path) -> Vec<serde_json::Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Cannot read log {}: {}; treating as empty", path.display(), e);
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<serde_json::Value>>(&content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Log {} is not a JSON array ({}); treating as empty", path.display(), e);
            Vec::new()
        }
    }
}

/// Append `entry` to the JSON array at `path`, keeping every prior element.
pub fn append_json_log<T: Serialize>(path: &Path, entry: &T) -> Result<(), Pdf2TxtError> {
    let state_err = |source: std::io::Error| Pdf2TxtError::StateWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut entries = read_raw_log(path);
    entries.push(serde_json::to_value(entry).map_err(|e| state_err(e.into()))?);
    let json = serde_json::to_string_pretty(&entries).map_err(|e| state_err(e.into()))?;
    write_atomic(path, json.as_bytes()).map_err(state_err)
}

/// Write `contents` to a temp file beside `path`, then rename it into place.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ── Cost report ──────────────────────────────────────────────────────────

/// Totals over the whole cost log.
#[derive(Debug, Clone, PartialEq)]
pub struct CostSummary {
    pub entries: Vec<CostLogEntry>,
    pub total_cost_usd: f64,
}

/// Result of reading the cost log for reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum CostReport {
    /// No cost log exists yet.
    Missing,
    /// The file exists but is not a cost log.
    Invalid,
    Summary(CostSummary),
}

impl CostReport {
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CostReport::Missing,
            Err(_) => return CostReport::Invalid,
        };
        match serde_json::from_str::<Vec<CostLogEntry>>(&content) {
            Ok(entries) => CostReport::Summary(CostSummary::from_entries(entries)),
            Err(_) => CostReport::Invalid,
        }
    }
}

impl CostSummary {
    pub fn from_entries(entries: Vec<CostLogEntry>) -> Self {
        let total_cost_usd = entries.iter().map(|e| e.total_cost_usd).sum();
        Self {
            entries,
            total_cost_usd,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.entries
            .iter()
            .flat_map(|e| &e.details)
            .map(|r| r.tokens)
            .sum()
    }
}

impl fmt::Display for CostReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostReport::Missing => writeln!(f, "No cost log found. Skipping cost calculation."),
            CostReport::Invalid => writeln!(f, "Invalid cost log file."),
            CostReport::Summary(summary) => write!(f, "{summary}"),
        }
    }
}

impl fmt::Display for CostSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- API Cost Summary ---")?;
        for record in self.entries.iter().flat_map(|e| &e.details) {
            writeln!(
                f,
                "{}: {} | Model: {} | Tokens: {} | Cost: ${:.4}",
                record.timestamp, record.file, record.model, record.tokens, record.cost_usd
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Total estimated cost: ${:.4}", self.total_cost_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_is_free() {
        let prices = PriceTable::default();
        assert_eq!(prices.estimate("mystery-model", TokenUsage::new(5000, 5000)), 0.0);
    }

    #[test]
    fn blended_rate() {
        let prices = PriceTable::default();
        let cost = prices.estimate("gpt-3.5-turbo", TokenUsage::from_total(2000));
        assert!((cost - 0.003).abs() < 1e-12);
    }

    #[test]
    fn split_rate() {
        let prices = PriceTable::default();
        let cost = prices.estimate("gpt-4.1", TokenUsage::new(1000, 1000));
        assert!((cost - 0.010).abs() < 1e-12);
    }

    #[test]
    fn from_total_splits_evenly() {
        assert_eq!(TokenUsage::from_total(10), TokenUsage::new(5, 5));
        assert_eq!(TokenUsage::from_total(7), TokenUsage::new(3, 4));
    }

    #[test]
    fn remote_table_overrides_and_extends() {
        let json = r#"{"gpt-4o": 0.01, "custom": {"input_per_1k": 0.001, "output_per_1k": 0.002}}"#;
        let table = PriceTable::from_json(json).unwrap();
        assert_eq!(table.get("gpt-4o"), Some(&ModelPrice::blended(0.01)));
        assert_eq!(table.get("custom"), Some(&ModelPrice::split(0.001, 0.002)));
        assert!(table.get("gpt-3.5-turbo").is_some());
    }

    #[tokio::test]
    async fn load_without_url_uses_static() {
        assert_eq!(PriceTable::load(None, 5).await, PriceTable::static_defaults());
    }

    #[tokio::test]
    async fn unreachable_pricing_url_falls_back_to_static() {
        let url = "http://127.0.0.1:9/prices.json";
        assert!(matches!(
            PriceTable::fetch(url, 1).await,
            Err(Pdf2TxtError::PricingFetchFailed { .. })
        ));
        assert_eq!(PriceTable::load(Some(url), 1).await, PriceTable::static_defaults());
    }

    #[test]
    fn invalid_pricing_json_is_rejected() {
        assert!(PriceTable::from_json("not json").is_err());
        assert!(PriceTable::from_json(r#"{"gpt-4o": "cheap"}"#).is_err());
    }

    #[tokio::test]
    async fn invalid_pricing_body_falls_back_to_static() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let body = "<html>maintenance</html>";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let url = format!("http://{addr}/prices.json");
        assert_eq!(PriceTable::load(Some(&url), 5).await, PriceTable::static_defaults());
    }

    #[test]
    fn cost_entry_total() {
        let prices = PriceTable::default();
        let records = vec![
            UsageRecord::new("a.pdf", "gpt-4o", TokenUsage::from_total(1000), &prices),
            UsageRecord::new("a.pdf", "gpt-4o", TokenUsage::from_total(3000), &prices),
        ];
        let entry = CostLogEntry::from_records(records);
        assert!((entry.total_cost_usd - 0.02).abs() < 1e-12);
        assert_eq!(entry.details.len(), 2);
    }

    #[test]
    fn usage_entry_omits_remote_fields_for_local_runs() {
        let entry = UsageLogEntry {
            timestamp: "2024-01-01 00:00:00".into(),
            task_duration_seconds: 1.5,
            pdf_file: "doc.pdf".into(),
            text_file: Some("doc-extracted_text_1-3.txt".into()),
            pages_processed: 3,
            method_used: "Local Processing (No API)".into(),
            model_used: None,
            tokens_used: None,
            api_calls_made: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("model_used"));
        assert!(json.contains("\"pages_processed\":3"));
    }

    #[test]
    fn timestamp_format() {
        let ts = timestamp_now();
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).is_ok());
    }
}
