//! LLM provider abstractions for sct-runtime.
//!
//! This module defines the trait for LLM providers and includes
//! implementations for OpenAI and Gemini. Both request a response
//! constrained to the item schema; neither parses free text.
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.
//! See [`ApiCredential`] for the recommended patterns.

use async_trait::async_trait;
use sct_core::{ItemSchema, SchemaError, SctItem};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

use crate::prompts::PromptSpec;

pub(crate) mod factory;
pub mod secrets;

#[cfg(any(feature = "openai", feature = "gemini"))]
mod http;

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "gemini")]
mod gemini;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "openai")]
pub use openai::{strict_schema, OpenAiProvider, OpenAiProviderFactory, OPENAI_API_KEY_ENV};

#[cfg(feature = "gemini")]
pub use gemini::{gemini_schema, GeminiProvider, GeminiProviderFactory, GEMINI_API_KEY_ENV};

/// Errors from LLM providers.
///
/// Transport details never leak past this type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The call completed but produced nothing usable. `usage` holds
    /// whatever the provider billed for it.
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String, usage: TokenUsage },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub fn malformed(message: impl Into<String>) -> Self {
        ProviderError::MalformedResponse {
            message: message.into(),
            usage: TokenUsage::default(),
        }
    }

    /// Tokens billed for a call that still failed.
    pub fn usage(&self) -> TokenUsage {
        match self {
            ProviderError::MalformedResponse { usage, .. } => *usage,
            _ => TokenUsage::default(),
        }
    }

    /// Whether another attempt with the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProviderError::AuthError(_) | ProviderError::NotConfigured(_)
        )
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate; provider default when unset
    pub max_tokens: Option<u32>,

    pub temperature: f32,

    /// Request timeout
    pub timeout: Duration,
}

impl CompletionConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: None,
            temperature: 0.7,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Raw response from a structured completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// JSON text conforming (if the provider honoured it) to the requested schema
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model used
    pub model: String,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A parsed item plus what it cost.
#[derive(Debug, Clone)]
pub struct Generation {
    pub item: SctItem,
    pub usage: TokenUsage,
    pub model: String,
}

/// Failure of one generation attempt.
#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The provider answered but the answer is not an item.
    #[error("{source}")]
    Schema {
        #[source]
        source: SchemaError,
        usage: TokenUsage,
    },
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Provider(e) => e.is_retryable(),
            GenerationError::Schema { .. } => true,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerationError::Provider(e) => e.retry_after(),
            GenerationError::Schema { .. } => None,
        }
    }

    /// Tokens consumed by the failed attempt, when the provider reported them.
    pub fn usage(&self) -> TokenUsage {
        match self {
            GenerationError::Provider(e) => e.usage(),
            GenerationError::Schema { usage, .. } => *usage,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Provider(ProviderError::RateLimited { .. }) => "rate_limited",
            GenerationError::Provider(ProviderError::AuthError(_)) => "auth_error",
            GenerationError::Provider(ProviderError::ProviderUnavailable(_)) => "provider_unavailable",
            GenerationError::Provider(ProviderError::MalformedResponse { .. }) => "malformed_response",
            GenerationError::Provider(ProviderError::Timeout(_)) => "timeout",
            GenerationError::Provider(ProviderError::NotConfigured(_)) => "not_configured",
            GenerationError::Schema { .. } => "schema",
        }
    }
}

/// Provider abstraction allows swapping LLM backends.
///
/// The orchestrator depends only on this trait. Adapters request output
/// constrained to `schema` and report failures as [`ProviderError`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute one structured completion.
    async fn complete(
        &self,
        prompt: &PromptSpec,
        schema: &JsonValue,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Check if provider is usable (credential present).
    async fn health_check(&self) -> bool;

    /// Get provider name for logs.
    fn name(&self) -> &str;

    /// Model used when none is configured.
    fn default_model(&self) -> &str;

    /// Generate one item: structured completion, then structural parse.
    async fn generate(
        &self,
        prompt: &PromptSpec,
        config: &CompletionConfig,
    ) -> Result<Generation, GenerationError> {
        let schema = ItemSchema::load().map_err(|source| GenerationError::Schema {
            source,
            usage: TokenUsage::default(),
        })?;

        let response = self.complete(prompt, schema.document(), config).await?;

        match schema.parse_str(&response.content) {
            Ok(item) => Ok(Generation {
                item,
                usage: response.usage,
                model: response.model,
            }),
            Err(source) => Err(GenerationError::Schema {
                source,
                usage: response.usage,
            }),
        }
    }
}

/// Remove keys from every object in a JSON schema tree.
#[cfg_attr(not(any(feature = "openai", feature = "gemini")), allow(dead_code))]
pub(crate) fn strip_keys(value: &mut JsonValue, keys: &[&str]) {
    match value {
        JsonValue::Object(map) => {
            for key in keys {
                map.remove(*key);
            }
            for child in map.values_mut() {
                strip_keys(child, keys);
            }
        }
        JsonValue::Array(items) => {
            for child in items {
                strip_keys(child, keys);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sct_core::ClinicalDomain;
    use serde_json::json;

    struct CannedProvider {
        content: String,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn complete(
            &self,
            _prompt: &PromptSpec,
            schema: &JsonValue,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            assert!(schema["properties"]["scenarios"].is_object());
            Ok(CompletionResponse {
                content: self.content.clone(),
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 50,
                },
                model: config.model.clone(),
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "canned"
        }

        fn default_model(&self) -> &str {
            "canned-1"
        }
    }

    fn prompt() -> PromptSpec {
        PromptSpec {
            instructions: "instructions".to_string(),
            input: "input".to_string(),
            domain: ClinicalDomain::from_raw("HCC"),
            guideline: None,
        }
    }

    fn item_json() -> String {
        let scenario = |kind: &str, phrase: &str| {
            json!({
                "scenario_type": kind,
                "hypothesis": "The lesion represents hepatocellular carcinoma in this cirrhotic liver",
                "new_information": "Contrast MRI shows arterial enhancement with portal venous washout.",
                "effect_phrase": phrase,
                "options": ["+2", "+1", "0", "-1", "-2"]
            })
        };
        json!({
            "domain": "HCC",
            "vignette": "A patient presents.",
            "scenarios": [
                scenario("diagnosis", "this hypothesis becomes"),
                scenario("management", "this action becomes"),
                scenario("followup", "this plan becomes")
            ]
        })
        .to_string()
    }

    #[test]
    fn test_retry_classification() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProviderError::ProviderUnavailable("503".into()).is_retryable());
        assert!(ProviderError::malformed("refusal").is_retryable());
        assert!(!ProviderError::AuthError("401".into()).is_retryable());

        let schema_err = GenerationError::Schema {
            source: SchemaError::InvalidJson("eof".into()),
            usage: TokenUsage::default(),
        };
        assert!(schema_err.is_retryable());
        assert_eq!(schema_err.kind(), "schema");
    }

    #[test]
    fn test_retry_after_only_for_rate_limits() {
        let delay = Duration::from_secs(7);
        let err: GenerationError = ProviderError::RateLimited {
            retry_after: Some(delay),
        }
        .into();
        assert_eq!(err.retry_after(), Some(delay));
        assert_eq!(
            GenerationError::from(ProviderError::Timeout(delay)).retry_after(),
            None
        );
    }

    #[tokio::test]
    async fn test_generate_parses_structured_response() {
        let provider = CannedProvider {
            content: item_json(),
        };
        let generation = provider
            .generate(&prompt(), &CompletionConfig::new("canned-1"))
            .await
            .unwrap();
        assert_eq!(generation.item.domain.as_str(), "HCC");
        assert_eq!(generation.usage.total(), 150);
        assert_eq!(generation.model, "canned-1");
    }

    #[tokio::test]
    async fn test_generate_reports_schema_error_with_usage() {
        let provider = CannedProvider {
            content: "{\"domain\": \"HCC\"}".to_string(),
        };
        let err = provider
            .generate(&prompt(), &CompletionConfig::new("canned-1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Schema {
                source: SchemaError::Violations(_),
                ..
            }
        ));
        assert_eq!(err.usage().prompt_tokens, 100);
    }

    #[test]
    fn test_strip_keys_recursive() {
        let mut schema = json!({
            "title": "x",
            "properties": {"a": {"description": "d", "type": "string"}},
            "items": [{"title": "t"}]
        });
        strip_keys(&mut schema, &["title", "description"]);
        assert_eq!(
            schema,
            json!({"properties": {"a": {"type": "string"}}, "items": [{}]})
        );
    }
}
