//! CLI binary for edgequake-pdf2txt.
//!
//! Maps flags to `ConversionConfig`, asks for anything that was not given on
//! the command line, and prints results. Any invalid answer ends the program
//! with a message and a non-zero exit code.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_pdf2txt::config::DEFAULT_MODEL;
use edgequake_pdf2txt::convert::{record_failed_run, record_run, write_text};
use edgequake_pdf2txt::{
    convert, convert_to_file, ConversionConfig, ConversionProgressCallback, CostReport,
    DirectoryMemory, LedgerPaths, Method, NormalizeOptions, NormalizePreset, PageRange,
    ProgressCallback, RateLimits,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over batches plus a log line per batch.
struct CliProgressCallback {
    bar: ProgressBar,
    first_page: AtomicUsize,
    last_page: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Extracting");
        bar.set_message("Reading PDF text layer…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            first_page: AtomicUsize::new(0),
            last_page: AtomicUsize::new(0),
        })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize, total_batches: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} batches  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");

        self.bar.set_length(total_batches as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Processing");
        self.bar.set_message("");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_pages} pages in {total_batches} batch(es)"))
        ));
    }

    fn on_batch_start(&self, batch: usize, _total: usize, first_page: usize, last_page: usize) {
        self.first_page.store(first_page, Ordering::SeqCst);
        self.last_page.store(last_page, Ordering::SeqCst);
        self.bar.set_message(format!("batch {batch}"));
    }

    fn on_batch_complete(&self, batch: usize, total: usize, output_len: usize, tokens: u64) {
        let pages = match (
            self.first_page.load(Ordering::SeqCst),
            self.last_page.load(Ordering::SeqCst),
        ) {
            (0, _) => String::new(),
            (first, last) => format!("pages {first}-{last}"),
        };
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {:<14}  {}  {}",
            green("✓"),
            batch,
            total,
            pages,
            dim(&format!("{output_len:>6} chars")),
            dim(&format!("{tokens} tokens")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_skipped(&self, batch: usize, total: usize) {
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}",
            dim("–"),
            batch,
            total,
            dim("no text, skipped")
        ));
        self.bar.inc(1);
    }

    fn on_rate_limit_wait(&self, wait: Duration) {
        self.bar.set_message(format!(
            "rate limit, waiting {:.0}s",
            wait.as_secs_f64().ceil()
        ));
    }

    fn on_quota_exhausted(&self, tokens_today: u64, limit: u64) {
        self.bar.println(format!(
            "  {} Daily token limit reached ({tokens_today}/{limit}), saving partial output",
            yellow("⚠"),
        ));
    }

    fn on_conversion_complete(&self, _total_batches: usize, _sent_batches: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ask for everything interactively
  pdf2txt

  # Local cleanup of pages 3-15
  pdf2txt book.pdf --method local --pages 3-15 --language ru

  # LLM rewrite with the default model and limits
  pdf2txt paper.pdf --method remote --pages 1- --language en --model gpt-4o

  # Show the accumulated API cost
  pdf2txt --cost-summary

OUTPUT:
  <name>-extracted_text_<start>-<end>.txt is written next to the PDF
  unless --output is given. Every run is appended to
  pdf_processing_log.json; remote runs also to cost_log.json.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Extract clean text from PDF files, optionally polished by an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2txt",
    version,
    about = "Extract clean text from PDF files, optionally polished by an LLM",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file. Asked for when omitted.
    input: Option<PathBuf>,

    /// Processing method: local or remote.
    #[arg(long, env = "PDF2TXT_METHOD", value_enum)]
    method: Option<MethodArg>,

    /// Page range: 5, 3-15 or 3- (to the end).
    #[arg(long, env = "PDF2TXT_PAGES")]
    pages: Option<String>,

    /// Document language code passed to the LLM (e.g. en, ru).
    #[arg(long, env = "PDF2TXT_LANGUAGE")]
    language: Option<String>,

    /// LLM model ID for the remote method.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Write text to this file instead of next to the PDF.
    #[arg(short, long, env = "PDF2TXT_OUTPUT")]
    output: Option<PathBuf>,

    /// Directory for the usage/cost logs and the last-directory memory.
    #[arg(long, env = "PDF2TXT_STATE_DIR", default_value = ".")]
    state_dir: PathBuf,

    /// Normalisation preset: standard, or filtered (drops page numbers and
    /// foreign-language paragraphs).
    #[arg(long, env = "PDF2TXT_PRESET", value_enum, default_value = "standard")]
    preset: PresetArg,

    /// Do not merge short word fragments into the preceding word.
    #[arg(long, env = "PDF2TXT_NO_WORD_REPAIR")]
    no_word_repair: bool,

    /// Keep running headers/footers.
    #[arg(long, env = "PDF2TXT_KEEP_HEADERS")]
    keep_headers: bool,

    /// Pages per LLM request.
    #[arg(long, env = "PDF2TXT_BATCH_SIZE", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: u64,

    /// Requests per minute allowed by the provider.
    #[arg(long, env = "PDF2TXT_RPM", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    rpm: u32,

    /// Tokens per day allowed by the provider.
    #[arg(long, env = "PDF2TXT_TPD", default_value_t = 200_000)]
    tpd: u64,

    /// URL of a JSON price table (model → $ per 1K tokens).
    #[arg(long, env = "PDF2TXT_PRICING_URL")]
    pricing_url: Option<String>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2TXT_PASSWORD")]
    password: Option<String>,

    /// Retries per batch on LLM failure.
    #[arg(long, env = "PDF2TXT_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Per-request LLM timeout in seconds.
    #[arg(long, env = "PDF2TXT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Print the cost log summary and exit.
    #[arg(long)]
    cost_summary: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2TXT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2TXT_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2TXT_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MethodArg {
    Local,
    Remote,
}

impl From<MethodArg> for Method {
    fn from(v: MethodArg) -> Self {
        match v {
            MethodArg::Local => Method::Local,
            MethodArg::Remote => Method::Remote,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PresetArg {
    Standard,
    Filtered,
}

impl From<PresetArg> for NormalizePreset {
    fn from(v: PresetArg) -> Self {
        match v {
            PresetArg::Standard => NormalizePreset::Standard,
            PresetArg::Filtered => NormalizePreset::Filtered,
        }
    }
}

/// Answers gathered from flags or prompts.
struct Choices {
    input: PathBuf,
    method: Method,
    pages: PageRange,
    language: String,
    model: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let ledger = LedgerPaths::in_dir(&cli.state_dir);

    // ── Cost summary mode ────────────────────────────────────────────────
    if cli.cost_summary {
        print!("{}", CostReport::load(&ledger.cost_log));
        return Ok(());
    }

    // ── Gather choices ───────────────────────────────────────────────────
    let memory = DirectoryMemory::in_dir(&cli.state_dir);
    let choices = gather_choices(&cli, &memory)?;
    if let Err(e) = memory.remember_file(&choices.input) {
        tracing::warn!("Could not remember directory: {e}");
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, &choices, ledger, progress_cb)?;

    // ── Run conversion ───────────────────────────────────────────────────
    let (out_path, stats) = if let Some(ref output_path) = cli.output {
        let output = match convert(&choices.input, &config).await {
            Ok(output) => output,
            Err(e) => {
                if config.record_usage {
                    record_failed_run(&e, &config);
                }
                return Err(e).context("Conversion failed");
            }
        };
        write_text(output_path, &output.text)
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        if config.record_usage {
            record_run(&output, Some(output_path), &config);
        }
        (output_path.clone(), output.stats)
    } else {
        convert_to_file(&choices.input, &config)
            .await
            .context("Conversion failed")?
    };

    if !cli.quiet {
        eprintln!(
            "{}  {} pages  {}ms  →  {}",
            if stats.stopped_early {
                yellow("⚠")
            } else {
                green("✔")
            },
            stats.processed_pages,
            stats.total_duration_ms,
            bold(&out_path.display().to_string()),
        );
        if stats.empty_pages > 0 {
            eprintln!("   {}", dim(&format!("{} page(s) without text", stats.empty_pages)));
        }
        if choices.method == Method::Remote {
            eprintln!(
                "   {} API calls  /  {} tokens  /  ${:.4}",
                stats.api_calls,
                stats.total_tokens(),
                stats.estimated_cost_usd,
            );
            if stats.stopped_early {
                eprintln!(
                    "   {}",
                    yellow("Daily token limit reached: output covers the batches sent so far")
                );
            }
            eprintln!();
            eprint!("{}", CostReport::load(&config.ledger.cost_log));
        }
    }

    Ok(())
}

/// Take each choice from its flag, or ask for it on stdin.
fn gather_choices(cli: &Cli, memory: &DirectoryMemory) -> Result<Choices> {
    let stdin = io::stdin();
    let mut input = stdin.lock();

    let pdf = match cli.input {
        Some(ref path) => path.clone(),
        None => {
            let dir = memory.load_or_cwd();
            let answer = prompt(
                &mut input,
                &format!("PDF file (relative to {}): ", dir.display()),
            )?;
            if answer.is_empty() {
                eprintln!("No file selected.");
                std::process::exit(1);
            }
            let path = PathBuf::from(answer);
            if path.is_absolute() {
                path
            } else {
                dir.join(path)
            }
        }
    };

    let method = match cli.method {
        Some(m) => m.into(),
        None => parse_method(&prompt(
            &mut input,
            "Processing method: 1) local  2) remote (LLM) [1]: ",
        )?)?,
    };

    let pages = match cli.pages {
        Some(ref s) => s.parse::<PageRange>().context("Invalid --pages")?,
        None => {
            let start = prompt(&mut input, "Start page [1]: ")?;
            let end = prompt(&mut input, "End page [last]: ")?;
            parse_page_answers(&start, &end)?
        }
    };

    let language = match cli.language {
        Some(ref l) => l.clone(),
        None => parse_language(&prompt(&mut input, "Document language code [en]: ")?)?,
    };

    let model = match (&cli.model, method) {
        (Some(m), _) => m.clone(),
        (None, Method::Local) => DEFAULT_MODEL.to_string(),
        (None, Method::Remote) => parse_model(&prompt(
            &mut input,
            "Model: 1) gpt-3.5-turbo  2) gpt-4o [1]: ",
        )?)?,
    };

    Ok(Choices {
        input: pdf,
        method,
        pages,
        language,
        model,
    })
}

fn prompt(input: &mut impl BufRead, question: &str) -> Result<String> {
    eprint!("{question}");
    io::stderr().flush().ok();
    let mut line = String::new();
    input.read_line(&mut line).context("Failed to read answer")?;
    Ok(line.trim().to_string())
}

fn parse_method(answer: &str) -> Result<Method> {
    match answer.to_lowercase().as_str() {
        "" | "1" | "local" => Ok(Method::Local),
        "2" | "remote" => Ok(Method::Remote),
        other => bail!("Invalid processing method '{other}'"),
    }
}

fn parse_model(answer: &str) -> Result<String> {
    match answer {
        "" | "1" => Ok("gpt-3.5-turbo".to_string()),
        "2" => Ok("gpt-4o".to_string()),
        other => bail!("Invalid model choice '{other}'"),
    }
}

fn parse_language(answer: &str) -> Result<String> {
    if answer.is_empty() {
        return Ok("en".to_string());
    }
    if answer.len() > 8 || !answer.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
        bail!("Invalid language code '{answer}'");
    }
    Ok(answer.to_lowercase())
}

fn parse_page_answers(start: &str, end: &str) -> Result<PageRange> {
    let start: usize = if start.is_empty() {
        1
    } else {
        start
            .parse()
            .with_context(|| format!("Invalid start page '{start}'"))?
    };
    let end: Option<usize> = if end.is_empty() {
        None
    } else {
        Some(
            end.parse()
                .with_context(|| format!("Invalid end page '{end}'"))?,
        )
    };
    PageRange::new(start, end).context("Invalid page range")
}

/// Map CLI args and answers to `ConversionConfig`.
fn build_config(
    cli: &Cli,
    choices: &Choices,
    ledger: LedgerPaths,
    progress: Option<ProgressCallback>,
) -> Result<ConversionConfig> {
    let mut normalize = NormalizeOptions::from_preset(cli.preset.into());
    normalize.repair_word_splits = !cli.no_word_repair;

    let mut builder = ConversionConfig::builder()
        .method(choices.method)
        .pages(choices.pages)
        .language(&choices.language)
        .model(&choices.model)
        .normalize(normalize)
        .strip_headers(!cli.keep_headers)
        .batch_size(usize::try_from(cli.batch_size).context("Batch size too large")?)
        .rate_limits(RateLimits {
            requests_per_minute: cli.rpm,
            tokens_per_day: cli.tpd,
            ..RateLimits::default()
        })
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .ledger(ledger);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref url) = cli.pricing_url {
        builder = builder.pricing_url(url);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
