//! # sct-runtime
//!
//! LLM-backed generation runs for Script Concordance Test items.
//!
//! This crate owns everything that talks to the outside world: provider
//! HTTP calls, prompt templates, configuration, and artifact storage. The
//! deterministic parts (schema, validation, routing) live in `sct-core`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sct_runtime::{FsOutcomeStore, GenerationOrchestrator, GeneratorConfig, ProviderRegistry};
//!
//! let config = GeneratorConfig::default().apply_env(|k| std::env::var(k).ok())?;
//! let run = config.resolve(&ProviderRegistry::with_defaults(), |k| std::env::var(k).ok())?;
//! let store = Arc::new(FsOutcomeStore::new(&run.output_dir));
//!
//! let summary = GenerationOrchestrator::from_config(run, store)?.run().await?;
//! println!("{} validated, {} skipped", summary.validated, summary.skipped);
//! ```

pub mod config;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod retry;
pub mod store;

pub use config::{ConfigError, ConfigOverrides, ConfigSecret, GeneratorConfig, RunConfig};
pub use orchestrator::{
    GenerationOrchestrator, GenerationOrchestratorBuilder, ItemReport, ItemStatus, LlmUsage,
    RunState, RunSummary, RuntimeError,
};
pub use prompts::{PromptBuilder, PromptError, PromptSpec, TemplatePromptBuilder};
pub use providers::{
    ApiCredential, CompletionConfig, CompletionResponse, CredentialSource, Generation,
    GenerationError, LlmProvider, ProviderError, ProviderFactory, ProviderRegistry, TokenUsage,
};
pub use retry::{RetryPolicy, RetrySchedule};
pub use store::{
    load_artifact, load_dir, FsOutcomeStore, MemoryOutcomeStore, OutcomeStore, StoreError,
    StoredArtifact,
};
