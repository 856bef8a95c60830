//! Generator configuration.
//!
//! Layers, lowest to highest precedence:
//! 1. built-in defaults
//! 2. optional YAML file
//! 3. environment (`LLM_PROVIDER`, `NUM_SCTS_TO_GENERATE`, ...)
//! 4. command-line overrides
//!
//! Configuration is resolved once, before the run, into a [`RunConfig`].
//! Nothing reads the environment after that.

use sct_core::{parse_distribution, parse_guidelines, DomainSchedule, Guideline, ScheduleError, ValidatorConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::prompts::{PromptBuilder, PromptError, TemplatePromptBuilder};
use crate::providers::{
    ApiCredential, CompletionConfig, CredentialSource, LlmProvider, ProviderError, ProviderRegistry,
};
use crate::retry::RetryPolicy;

pub const ENV_PROVIDER: &str = "LLM_PROVIDER";
pub const ENV_MODEL: &str = "MODEL";
pub const ENV_COUNT: &str = "NUM_SCTS_TO_GENERATE";
pub const ENV_DOMAINS: &str = "DOMAIN_DISTRIBUTION";
pub const ENV_GUIDELINES: &str = "GUIDELINES";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_OUTPUT_DIR: &str = "SCT_OUTPUT_DIR";
pub const ENV_MAX_RETRIES: &str = "SCT_MAX_RETRIES";
pub const ENV_CALL_TIMEOUT: &str = "SCT_CALL_TIMEOUT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid LLM_PROVIDER '{provider}': must be one of {available:?}")]
    UnknownProvider {
        provider: String,
        available: Vec<String>,
    },

    #[error("Number of items to generate must be a positive integer")]
    ZeroCount,

    #[error("Domain configuration: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Credential: {0}")]
    Credential(#[source] ProviderError),

    #[error("Prompt: {0}")]
    Prompt(#[from] PromptError),
}

/// Raw, layered configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Provider type (`openai` or `gemini`)
    pub provider: String,

    /// Model identifier; provider default when unset
    pub model: Option<String>,

    /// Number of items to generate
    pub count: usize,

    /// Ordered domain list; entries may carry a `:weight` suffix
    pub domains: Vec<String>,

    /// Guidelines cycled per item; none means no guideline context
    pub guidelines: Vec<Guideline>,

    /// Root of the generated/validated/validation_failed directories
    pub output_dir: PathBuf,

    pub log_level: String,

    /// Per-call timeout
    #[serde(with = "humantime_duration")]
    pub call_timeout: Duration,

    pub temperature: f32,

    pub max_tokens: Option<u32>,

    pub retry: RetryPolicy,

    pub validator: ValidatorConfig,

    /// Custom template with a `{{PARAMETERS}}` placeholder
    pub prompt_template: Option<PathBuf>,

    /// Directory of `<guideline>_guideline[_summary].xml` files
    pub guideline_dir: Option<PathBuf>,

    /// API key for the selected provider; wins over its environment variable
    #[serde(skip_serializing)]
    pub api_key: Option<ConfigSecret>,
}

/// A secret read from a config file. Never printed or written back out.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            count: 1,
            domains: Vec::new(),
            guidelines: Vec::new(),
            output_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            call_timeout: Duration::from_secs(120),
            temperature: 0.7,
            max_tokens: None,
            retry: RetryPolicy::default(),
            validator: ValidatorConfig::default(),
            prompt_template: None,
            guideline_dir: None,
            api_key: None,
        }
    }
}

/// Values given on the command line. `None` leaves the lower layer alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub count: Option<usize>,
    pub domains: Option<String>,
    pub guidelines: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub max_retries: Option<u32>,
    pub log_level: Option<String>,
}

impl GeneratorConfig {
    /// Load a YAML file over the defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment values. Blank variables count as unset.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(provider) = get(ENV_PROVIDER) {
            self.provider = provider.to_lowercase();
        }
        if let Some(model) = get(ENV_MODEL) {
            self.model = Some(model);
        }
        if let Some(count) = get(ENV_COUNT) {
            self.count = parse_number(ENV_COUNT, &count)?;
        }
        if let Some(domains) = get(ENV_DOMAINS) {
            self.domains = split_list(&domains);
        }
        if let Some(guidelines) = get(ENV_GUIDELINES) {
            self.guidelines = parse_guidelines(&guidelines)?;
        }
        if let Some(level) = get(ENV_LOG_LEVEL) {
            self.log_level = level.to_lowercase();
        }
        if let Some(dir) = get(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(retries) = get(ENV_MAX_RETRIES) {
            self.retry.max_retries = parse_number(ENV_MAX_RETRIES, &retries)?;
        }
        if let Some(timeout) = get(ENV_CALL_TIMEOUT) {
            self.call_timeout =
                humantime::parse_duration(&timeout).map_err(|e| ConfigError::InvalidValue {
                    key: ENV_CALL_TIMEOUT,
                    value: timeout.clone(),
                    reason: e.to_string(),
                })?;
        }

        Ok(self)
    }

    /// Apply command-line overrides.
    pub fn apply_overrides(mut self, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        if let Some(provider) = &overrides.provider {
            self.provider = provider.trim().to_lowercase();
        }
        if let Some(model) = &overrides.model {
            self.model = Some(model.clone());
        }
        if let Some(count) = overrides.count {
            self.count = count;
        }
        if let Some(domains) = &overrides.domains {
            self.domains = split_list(domains);
        }
        if let Some(guidelines) = &overrides.guidelines {
            self.guidelines = parse_guidelines(guidelines)?;
        }
        if let Some(dir) = &overrides.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(retries) = overrides.max_retries {
            self.retry.max_retries = retries;
        }
        if let Some(level) = &overrides.log_level {
            self.log_level = level.to_lowercase();
        }
        Ok(self)
    }

    /// Domain schedule for this configuration.
    pub fn schedule(&self) -> Result<DomainSchedule, ConfigError> {
        let entries = parse_distribution(&self.domains.join(","))?;
        Ok(DomainSchedule::new(&entries)?)
    }

    /// Check everything that makes a run impossible and build its collaborators.
    ///
    /// `lookup` supplies credential environment variables.
    pub fn resolve<F>(&self, registry: &ProviderRegistry, lookup: F) -> Result<RunConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let factory = registry
            .get_factory(&self.provider)
            .map_err(|_| ConfigError::UnknownProvider {
                provider: self.provider.clone(),
                available: registry.available_types().iter().map(|s| s.to_string()).collect(),
            })?;

        let schedule = self.schedule()?;

        if self.count == 0 {
            return Err(ConfigError::ZeroCount);
        }

        let config_layer = match &self.api_key {
            Some(key) => serde_json::json!({ "api_key": key.expose() }),
            None => serde_json::json!({}),
        };
        let credential = ApiCredential::resolve(
            &config_layer,
            "api_key",
            factory.credential_env(),
            "API key",
            lookup,
        )
        .map_err(ConfigError::Credential)?;

        let provider_config = serde_json::json!({ "api_key": credential.expose() });
        registry
            .validate(&self.provider, &provider_config)
            .map_err(ConfigError::Credential)?;
        let provider = factory
            .create(&provider_config)
            .map_err(ConfigError::Credential)?;

        let mut prompts = TemplatePromptBuilder::new().with_limits(self.validator.clone());
        if let Some(path) = &self.prompt_template {
            prompts = prompts.with_template_file(path)?;
        }
        if let Some(dir) = &self.guideline_dir {
            prompts = prompts.with_guideline_dir(dir);
        }

        let model = self
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());

        Ok(RunConfig {
            credential_source: credential.source(),
            completion: CompletionConfig {
                model,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                timeout: self.call_timeout,
            },
            provider,
            prompts: Arc::new(prompts),
            schedule,
            guidelines: self.guidelines.clone(),
            count: self.count,
            retry: self.retry.clone(),
            validator: self.validator.clone(),
            output_dir: self.output_dir.clone(),
        })
    }
}

/// Fully resolved run inputs.
pub struct RunConfig {
    pub provider: Arc<dyn LlmProvider>,
    /// Where the API key came from
    pub credential_source: CredentialSource,
    pub prompts: Arc<dyn PromptBuilder>,
    pub completion: CompletionConfig,
    pub schedule: DomainSchedule,
    pub guidelines: Vec<Guideline>,
    pub count: usize,
    pub retry: RetryPolicy,
    pub validator: ValidatorConfig,
    pub output_dir: PathBuf,
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("provider", &self.provider.name())
            .field("credential_source", &self.credential_source)
            .field("model", &self.completion.model)
            .field("schedule", &self.schedule.entries())
            .field("guidelines", &self.guidelines)
            .field("count", &self.count)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Serde helper for human-readable durations (`90s`, `2m`, `500ms`).
pub mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::factory::tests::MockProviderFactory;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProviderFactory));
        registry
    }

    fn mock_config() -> GeneratorConfig {
        GeneratorConfig {
            provider: "mock".to_string(),
            domains: vec!["HCC".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_env_layer() {
        let config = GeneratorConfig::default()
            .apply_env(env(&[
                (ENV_PROVIDER, "Gemini"),
                (ENV_COUNT, "6"),
                (ENV_DOMAINS, "HCC:2, Cirrhosis_Complications"),
                (ENV_GUIDELINES, "american,british"),
                (ENV_MODEL, ""),
                (ENV_CALL_TIMEOUT, "90s"),
                (ENV_MAX_RETRIES, "1"),
            ]))
            .unwrap();

        assert_eq!(config.provider, "gemini");
        assert_eq!(config.count, 6);
        assert_eq!(config.domains, vec!["HCC:2", "Cirrhosis_Complications"]);
        assert_eq!(config.guidelines, vec![Guideline::American, Guideline::British]);
        assert_eq!(config.model, None);
        assert_eq!(config.call_timeout, Duration::from_secs(90));
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.schedule().unwrap().cycle_len(), 3);
    }

    #[test]
    fn test_env_bad_values() {
        assert!(matches!(
            GeneratorConfig::default().apply_env(env(&[(ENV_COUNT, "ten")])),
            Err(ConfigError::InvalidValue { key: ENV_COUNT, .. })
        ));
        assert!(matches!(
            GeneratorConfig::default().apply_env(env(&[(ENV_CALL_TIMEOUT, "soon")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            GeneratorConfig::default().apply_env(env(&[(ENV_GUIDELINES, "asian")])),
            Err(ConfigError::Schedule(ScheduleError::Guideline(_)))
        ));
    }

    #[test]
    fn test_overrides_win() {
        let config = GeneratorConfig::default()
            .apply_env(env(&[(ENV_COUNT, "6"), (ENV_DOMAINS, "HCC")]))
            .unwrap()
            .apply_overrides(&ConfigOverrides {
                count: Some(2),
                domains: Some("Cirrhosis_Complications".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.count, 2);
        assert_eq!(config.domains, vec!["Cirrhosis_Complications"]);
    }

    #[test]
    fn test_yaml_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sctgen.yaml");
        std::fs::write(
            &path,
            "provider: gemini\ncount: 4\ndomains: [HCC, Cirrhosis_Complications]\n\
             call_timeout: 45s\nretry:\n  max_retries: 5\nvalidator:\n  overlap_min_words: 6\n",
        )
        .unwrap();

        let config = GeneratorConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.provider, "gemini");
        assert_eq!(config.count, 4);
        assert_eq!(config.call_timeout, Duration::from_secs(45));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.min_delay, RetryPolicy::default().min_delay);
        assert_eq!(config.validator.overlap_min_words, 6);
        assert_eq!(config.validator.vignette_words.min, 120);
    }

    #[test]
    fn test_resolve_success() {
        let run = mock_config()
            .resolve(&registry(), env(&[("MOCK_API_KEY", "secret")]))
            .unwrap();
        assert_eq!(run.provider.name(), "mock");
        assert_eq!(run.completion.model, "mock-1");
        assert_eq!(run.count, 1);
    }

    #[test]
    fn test_config_key_wins_over_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sctgen.yaml");
        std::fs::write(&path, "provider: mock\ndomains: [HCC]\napi_key: from-yaml\n").unwrap();
        let config = GeneratorConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.api_key, Some(ConfigSecret::new("from-yaml")));

        let run = config.resolve(&registry(), env(&[])).unwrap();
        assert_eq!(run.credential_source, CredentialSource::Config);

        let run = config
            .resolve(&registry(), env(&[("MOCK_API_KEY", "from-env")]))
            .unwrap();
        assert_eq!(run.credential_source, CredentialSource::Config);

        let run = mock_config()
            .resolve(&registry(), env(&[("MOCK_API_KEY", "from-env")]))
            .unwrap();
        assert_eq!(run.credential_source, CredentialSource::Environment);
    }

    #[test]
    fn test_config_key_is_never_written_out() {
        let config = GeneratorConfig {
            api_key: Some(ConfigSecret::new("sk-hidden")),
            ..mock_config()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("sk-hidden"));
        assert!(!yaml.contains("api_key"));
        assert!(!format!("{:?}", config).contains("sk-hidden"));
    }

    #[test]
    fn test_resolve_unknown_provider_is_fatal() {
        let config = GeneratorConfig {
            provider: "anthropic".to_string(),
            ..mock_config()
        };
        match config.resolve(&registry(), env(&[])) {
            Err(ConfigError::UnknownProvider { provider, available }) => {
                assert_eq!(provider, "anthropic");
                assert_eq!(available, vec!["mock"]);
            }
            other => panic!("Expected UnknownProvider, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_resolve_empty_domains_is_fatal() {
        let config = GeneratorConfig {
            domains: Vec::new(),
            ..mock_config()
        };
        assert!(matches!(
            config.resolve(&registry(), env(&[("MOCK_API_KEY", "secret")])),
            Err(ConfigError::Schedule(ScheduleError::Empty))
        ));
    }

    #[test]
    fn test_resolve_missing_or_empty_credential_is_fatal() {
        assert!(matches!(
            mock_config().resolve(&registry(), env(&[])),
            Err(ConfigError::Credential(ProviderError::NotConfigured(_)))
        ));
        assert!(matches!(
            mock_config().resolve(&registry(), env(&[("MOCK_API_KEY", "")])),
            Err(ConfigError::Credential(ProviderError::NotConfigured(_)))
        ));
    }

    #[test]
    fn test_resolve_zero_count_is_fatal() {
        let config = GeneratorConfig {
            count: 0,
            ..mock_config()
        };
        assert!(matches!(
            config.resolve(&registry(), env(&[("MOCK_API_KEY", "secret")])),
            Err(ConfigError::ZeroCount)
        ));
    }
}
