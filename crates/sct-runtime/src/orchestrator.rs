//! Sequential generation run.
//!
//! One item at a time moves through
//! `Idle -> Generating(i) -> Validating(i) -> Routing(i) -> ... -> Done`.
//!
//! - Domains and guidelines are assigned deterministically from the item index
//! - Each provider call is bounded by the configured timeout
//! - A failing item is retried up to the retry policy, then skipped; it never
//!   aborts the run
//! - All copies of one item are persisted in a single store call, so an
//!   interrupt never leaves an item half-written

use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use sct_core::{
    guideline_for, route, ArtifactKey, ClinicalDomain, DomainSchedule, Guideline, ValidationResult,
    Validator,
};

use crate::config::RunConfig;
use crate::prompts::{PromptBuilder, PromptError, PromptSpec};
use crate::providers::{CompletionConfig, Generation, GenerationError, LlmProvider, ProviderError, TokenUsage};
use crate::retry::RetryPolicy;
use crate::store::{OutcomeStore, StoreError, StoredArtifact};

/// Run-level failures. Per-item failures never surface here.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Orchestrator not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to build prompt for item {item}: {source}")]
    Prompt {
        item: usize,
        #[source]
        source: PromptError,
    },

    #[error("Failed to persist item {item}: {source}")]
    Persistence {
        item: usize,
        #[source]
        source: StoreError,
    },
}

/// Where the run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Generating { item: usize, attempt: u32 },
    Validating { item: usize },
    Routing { item: usize },
    Done,
}

/// Final outcome of one requested item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Validated,
    ValidationFailed,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Validated => "validated",
            ItemStatus::ValidationFailed => "validation_failed",
            ItemStatus::Skipped => "skipped",
        }
    }
}

/// What happened to one requested item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    /// 1-based position in the run
    pub index: usize,
    pub domain: ClinicalDomain,
    pub guideline: Option<Guideline>,
    pub attempts: u32,
    pub status: ItemStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Last generation error for skipped items
    pub failure: Option<String>,
    #[serde(skip)]
    pub stored: Vec<StoredArtifact>,
}

/// Accumulated LLM usage for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LlmUsage {
    /// Number of provider calls made, including failed ones
    pub llm_calls: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl LlmUsage {
    pub fn record(&mut self, usage: TokenUsage) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub requested: usize,
    /// Items that parsed and were persisted
    pub generated: usize,
    pub validated: usize,
    pub validation_failed: usize,
    pub skipped: usize,
    /// Attempts that ended in a provider or schema error
    pub failed_attempts: u32,
    pub usage: LlmUsage,
    /// The run stopped early on an external interrupt
    pub interrupted: bool,
    pub items: Vec<ItemReport>,
}

/// Mutable bookkeeping for one run.
#[derive(Debug)]
struct RunContext {
    state: RunState,
    summary: RunSummary,
}

impl RunContext {
    fn new(requested: usize) -> Self {
        Self {
            state: RunState::Idle,
            summary: RunSummary {
                requested,
                ..Default::default()
            },
        }
    }

    fn transition(&mut self, next: RunState) {
        tracing::trace!(from = ?self.state, to = ?next, "Run state");
        self.state = next;
    }

    fn finish(mut self) -> RunSummary {
        self.transition(RunState::Done);
        self.summary
    }
}

enum AttemptOutcome {
    Generated(Generation, u32),
    Exhausted { attempts: u32, last: GenerationError },
    Interrupted,
}

/// Drives N generation-validation-routing cycles.
pub struct GenerationOrchestrator {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptBuilder>,
    store: Arc<dyn OutcomeStore>,
    validator: Validator,
    schedule: DomainSchedule,
    guidelines: Vec<Guideline>,
    completion: CompletionConfig,
    retry: RetryPolicy,
    count: usize,
}

impl std::fmt::Debug for GenerationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationOrchestrator")
            .field("provider", &self.provider.name())
            .field("model", &self.completion.model)
            .field("count", &self.count)
            .field("retry", &self.retry)
            .finish()
    }
}

impl GenerationOrchestrator {
    pub fn builder() -> GenerationOrchestratorBuilder {
        GenerationOrchestratorBuilder::new()
    }

    /// Build from resolved configuration.
    pub fn from_config(
        config: RunConfig,
        store: Arc<dyn OutcomeStore>,
    ) -> Result<Self, RuntimeError> {
        Self::builder()
            .provider(config.provider)
            .prompts(config.prompts)
            .store(store)
            .validator(Validator::new(config.validator))
            .schedule(config.schedule)
            .guidelines(config.guidelines)
            .completion(config.completion)
            .retry(config.retry)
            .count(config.count)
            .build()
    }

    /// Run all items to completion.
    pub async fn run(&self) -> Result<RunSummary, RuntimeError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until done or until `shutdown` resolves.
    ///
    /// Shutdown is observed while waiting on the provider or a retry delay.
    /// Items already persisted stay intact; the in-flight item is dropped
    /// before anything of it is written.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<RunSummary, RuntimeError>
    where
        F: Future<Output = ()>,
    {
        if !self.provider.health_check().await {
            return Err(RuntimeError::NotConfigured(format!(
                "Provider '{}' is not ready",
                self.provider.name()
            )));
        }

        tokio::pin!(shutdown);
        let mut ctx = RunContext::new(self.count);

        tracing::info!(
            provider = self.provider.name(),
            model = %self.completion.model,
            items = self.count,
            domains = ?self.schedule.entries(),
            guidelines = ?self.guidelines,
            max_retries = self.retry.max_retries,
            "Starting generation run"
        );

        for index in 0..self.count {
            let sequence = index + 1;
            let domain = self.schedule.domain_for(index).clone();
            let guideline = guideline_for(&self.guidelines, index);

            let prompt = self
                .prompts
                .build(&domain, guideline)
                .map_err(|source| RuntimeError::Prompt {
                    item: sequence,
                    source,
                })?;

            let outcome = self
                .generate_with_retry(&mut ctx, sequence, &prompt, shutdown.as_mut())
                .await;

            let report = match outcome {
                AttemptOutcome::Interrupted => {
                    tracing::warn!(item = sequence, "Run interrupted; in-flight item discarded");
                    ctx.summary.interrupted = true;
                    break;
                }
                AttemptOutcome::Exhausted { attempts, last } => {
                    ctx.summary.skipped += 1;
                    tracing::info!(
                        item = sequence,
                        of = self.count,
                        domain = %domain,
                        status = ItemStatus::Skipped.as_str(),
                        attempts,
                        error = %last,
                        "Item complete"
                    );
                    ItemReport {
                        index: sequence,
                        domain,
                        guideline,
                        attempts,
                        status: ItemStatus::Skipped,
                        errors: Vec::new(),
                        warnings: Vec::new(),
                        failure: Some(last.to_string()),
                        stored: Vec::new(),
                    }
                }
                AttemptOutcome::Generated(generation, attempts) => {
                    let item = generation.item.with_guideline(guideline);

                    ctx.transition(RunState::Validating { item: sequence });
                    let result = self.validator.validate(&item);

                    ctx.transition(RunState::Routing { item: sequence });
                    let key = ArtifactKey::new(domain.clone(), Utc::now(), sequence as u32);
                    let stored = self
                        .store
                        .persist(&key, &route(&item, &result))
                        .map_err(|source| RuntimeError::Persistence {
                            item: sequence,
                            source,
                        })?;

                    let status = self.record_validation(&mut ctx, &result);
                    tracing::info!(
                        item = sequence,
                        of = self.count,
                        domain = %domain,
                        status = status.as_str(),
                        attempts,
                        errors = result.errors.len(),
                        warnings = result.warnings.len(),
                        file = %key,
                        "Item complete"
                    );
                    for error in &result.errors {
                        tracing::debug!(item = sequence, "Validation error: {}", error);
                    }

                    ItemReport {
                        index: sequence,
                        domain,
                        guideline,
                        attempts,
                        status,
                        errors: result.errors,
                        warnings: result.warnings,
                        failure: None,
                        stored,
                    }
                }
            };
            ctx.summary.items.push(report);
        }

        let summary = ctx.finish();
        tracing::info!(
            requested = summary.requested,
            generated = summary.generated,
            validated = summary.validated,
            validation_failed = summary.validation_failed,
            skipped = summary.skipped,
            failed_attempts = summary.failed_attempts,
            llm_calls = summary.usage.llm_calls,
            tokens = summary.usage.total_tokens(),
            interrupted = summary.interrupted,
            "Generation run complete"
        );
        Ok(summary)
    }

    fn record_validation(&self, ctx: &mut RunContext, result: &ValidationResult) -> ItemStatus {
        ctx.summary.generated += 1;
        if result.is_valid {
            ctx.summary.validated += 1;
            ItemStatus::Validated
        } else {
            ctx.summary.validation_failed += 1;
            ItemStatus::ValidationFailed
        }
    }

    /// Attempt one item up to the retry policy's bound.
    async fn generate_with_retry(
        &self,
        ctx: &mut RunContext,
        sequence: usize,
        prompt: &PromptSpec,
        mut shutdown: std::pin::Pin<&mut impl Future<Output = ()>>,
    ) -> AttemptOutcome {
        let max_attempts = self.retry.attempts();
        let mut delays = self.retry.schedule();
        let mut attempt = 0;

        loop {
            attempt += 1;
            ctx.transition(RunState::Generating {
                item: sequence,
                attempt,
            });
            ctx.summary.usage.llm_calls += 1;

            let call = tokio::time::timeout(
                self.completion.timeout,
                self.provider.generate(prompt, &self.completion),
            );
            let outcome = tokio::select! {
                biased;
                _ = shutdown.as_mut() => return AttemptOutcome::Interrupted,
                outcome = call => outcome,
            };

            let error = match outcome {
                Ok(Ok(generation)) => {
                    ctx.summary.usage.record(generation.usage);
                    return AttemptOutcome::Generated(generation, attempt);
                }
                Ok(Err(e)) => e,
                Err(_) => GenerationError::from(ProviderError::Timeout(self.completion.timeout)),
            };

            ctx.summary.usage.record(error.usage());
            ctx.summary.failed_attempts += 1;

            let delay = if attempt < max_attempts {
                delays.next_delay(&error)
            } else {
                None
            };

            match delay {
                Some(delay) => {
                    tracing::warn!(
                        item = sequence,
                        attempt,
                        max_attempts,
                        kind = error.kind(),
                        error = %error,
                        retry_in = ?delay,
                        "Generation attempt failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.as_mut() => return AttemptOutcome::Interrupted,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    tracing::error!(
                        item = sequence,
                        attempt,
                        max_attempts,
                        kind = error.kind(),
                        error = %error,
                        "Generation failed, skipping item"
                    );
                    return AttemptOutcome::Exhausted {
                        attempts: attempt,
                        last: error,
                    };
                }
            }
        }
    }
}

/// Builder for [`GenerationOrchestrator`].
pub struct GenerationOrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    prompts: Option<Arc<dyn PromptBuilder>>,
    store: Option<Arc<dyn OutcomeStore>>,
    validator: Validator,
    schedule: Option<DomainSchedule>,
    guidelines: Vec<Guideline>,
    completion: Option<CompletionConfig>,
    retry: RetryPolicy,
    count: usize,
}

impl GenerationOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            prompts: None,
            store: None,
            validator: Validator::default(),
            schedule: None,
            guidelines: Vec::new(),
            completion: None,
            retry: RetryPolicy::default(),
            count: 1,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn prompts(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn store(mut self, store: Arc<dyn OutcomeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn schedule(mut self, schedule: DomainSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn guidelines(mut self, guidelines: Vec<Guideline>) -> Self {
        self.guidelines = guidelines;
        self
    }

    pub fn completion(mut self, completion: CompletionConfig) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Build the orchestrator, rejecting anything that makes a run impossible.
    pub fn build(self) -> Result<GenerationOrchestrator, RuntimeError> {
        let provider = self
            .provider
            .ok_or_else(|| RuntimeError::NotConfigured("No provider set".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| RuntimeError::NotConfigured("No outcome store set".to_string()))?;
        let schedule = self
            .schedule
            .ok_or_else(|| RuntimeError::NotConfigured("No domains configured".to_string()))?;
        if self.count == 0 {
            return Err(RuntimeError::NotConfigured(
                "Item count must be positive".to_string(),
            ));
        }

        let prompts = self.prompts.unwrap_or_else(|| {
            Arc::new(
                crate::prompts::TemplatePromptBuilder::new()
                    .with_limits(self.validator.config().clone()),
            )
        });
        let completion = self
            .completion
            .unwrap_or_else(|| CompletionConfig::new(provider.default_model()));

        Ok(GenerationOrchestrator {
            provider,
            prompts,
            store,
            validator: self.validator,
            schedule,
            guidelines: self.guidelines,
            completion,
            retry: self.retry,
            count: self.count,
        })
    }
}

impl Default for GenerationOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
