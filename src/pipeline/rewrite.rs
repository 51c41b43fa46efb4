//! LLM rewriting: send one batch of normalised text and get corrected text back.
//!
//! The dispatcher only knows the [`RewriteService`] trait. [`LlmRewriter`]
//! implements it on top of any `edgequake-llm` provider; tests substitute a
//! scripted fake.
//!
//! ## Retry Strategy
//!
//! Retries are off by default: a failed call aborts the run so that no batch
//! is silently lost. With `max_retries > 0` the wait doubles after each
//! attempt (`retry_backoff_ms * 2^attempt`).

use crate::config::ConversionConfig;
use crate::error::{Pdf2TxtError, RewriteError};
use crate::prompts::build_rewrite_prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Corrected text plus the tokens the call consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rewrite {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Rewrite {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A service that rewrites a block of text with a named model.
#[async_trait]
pub trait RewriteService: Send + Sync {
    async fn rewrite(&self, text: &str, model: &str) -> Result<Rewrite, RewriteError>;

    /// The model that actually answers, for services bound to one model.
    ///
    /// Usage is priced and logged under this name when it is `Some`;
    /// otherwise under the model passed to [`RewriteService::rewrite`].
    fn served_model(&self) -> Option<&str> {
        None
    }
}

/// [`RewriteService`] backed by an `edgequake-llm` chat provider.
pub struct LlmRewriter {
    provider: Arc<dyn LLMProvider>,
    language: String,
    instruction: Option<String>,
    temperature: f32,
    max_tokens_cap: usize,
    timeout_secs: u64,
}

impl LlmRewriter {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ConversionConfig) -> Self {
        Self {
            provider,
            language: config.language.clone(),
            instruction: config.rewrite_prompt.clone(),
            temperature: config.temperature,
            max_tokens_cap: config.max_tokens_cap,
            timeout_secs: config.api_timeout_secs,
        }
    }

    fn build_options(&self, text: &str) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(response_budget(text, self.max_tokens_cap)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl RewriteService for LlmRewriter {
    async fn rewrite(&self, text: &str, model: &str) -> Result<Rewrite, RewriteError> {
        let prompt = build_rewrite_prompt(text, &self.language, self.instruction.as_deref());
        let messages = vec![ChatMessage::user(prompt)];
        let options = self.build_options(text);

        let served = self.provider.model();
        if served != model {
            debug!("Requested model {} is served by {}", model, served);
        }
        debug!(
            "Rewrite request: model={}, {} chars, max_tokens={:?}",
            served,
            text.len(),
            options.max_tokens
        );

        let response = timeout(
            Duration::from_secs(self.timeout_secs),
            self.provider.chat(&messages, Some(&options)),
        )
        .await
        .map_err(|_| RewriteError::Timeout {
            secs: self.timeout_secs,
        })?
        .map_err(|e| RewriteError::Api(e.to_string()))?;

        if response.content.trim().is_empty() {
            return Err(RewriteError::EmptyResponse);
        }

        Ok(Rewrite {
            text: response.content.trim().to_string(),
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }

    fn served_model(&self) -> Option<&str> {
        Some(self.provider.model())
    }
}

/// `max_tokens` for a request: twice the word count, capped, at least 1.
pub fn response_budget(text: &str, cap: usize) -> usize {
    let words = text.split_whitespace().count();
    words.saturating_mul(2).min(cap).max(1)
}

/// Call `service` with retry/backoff and map the final failure to a fatal error.
pub async fn rewrite_with_retry(
    service: &dyn RewriteService,
    text: &str,
    config: &ConversionConfig,
    batch: usize,
) -> Result<Rewrite, Pdf2TxtError> {
    let mut last_err = RewriteError::EmptyResponse;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Batch {}: retry {}/{} after {}ms",
                batch, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match service.rewrite(text, &config.model).await {
            Ok(rewrite) => return Ok(rewrite),
            Err(e) => {
                warn!("Batch {}: attempt {} failed: {}", batch, attempt + 1, e);
                last_err = e;
            }
        }
    }

    Err(match last_err {
        RewriteError::Timeout { secs } => Pdf2TxtError::ApiTimeout {
            batch,
            secs,
            partial: None,
        },
        other => Pdf2TxtError::RewriteFailed {
            batch,
            attempts: config.max_retries + 1,
            detail: other.to_string(),
            partial: None,
        },
    })
}

// ── Service resolution ───────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Pdf2TxtError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2TxtError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Named provider** (`config.provider_name`).
/// 2. **Environment provider** (`EDGEQUAKE_LLM_PROVIDER`).
/// 3. **OpenAI** when `OPENAI_API_KEY` is set.
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// Branches 1-3 are bound to `config.model`. `EDGEQUAKE_MODEL` only matters
/// through the CLI, which reads it into the config. An auto-detected provider
/// keeps its own model; usage is then logged under that model (see
/// [`RewriteService::served_model`]).
pub fn resolve_provider(config: &ConversionConfig) -> Result<Arc<dyn LLMProvider>, Pdf2TxtError> {
    if let Some(ref name) = config.provider_name {
        return create_provider(name, &config.model);
    }

    if let Ok(prov) = std::env::var("EDGEQUAKE_LLM_PROVIDER") {
        if !prov.is_empty() {
            if let Ok(env_model) = std::env::var("EDGEQUAKE_MODEL") {
                if !env_model.is_empty() && env_model != config.model {
                    warn!(
                        "EDGEQUAKE_MODEL={} ignored, using configured model {}",
                        env_model, config.model
                    );
                }
            }
            return create_provider(&prov, &config.model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", &config.model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2TxtError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// The configured rewrite service, or an [`LlmRewriter`] over the resolved provider.
pub fn resolve_service(config: &ConversionConfig) -> Result<Arc<dyn RewriteService>, Pdf2TxtError> {
    if let Some(ref service) = config.rewrite_service {
        return Ok(Arc::clone(service));
    }
    let provider = resolve_provider(config)?;
    if provider.model() != config.model {
        warn!(
            "Provider {} serves {} instead of {}",
            provider.name(),
            provider.model(),
            config.model
        );
    }
    Ok(Arc::new(LlmRewriter::new(provider, config)))
}
