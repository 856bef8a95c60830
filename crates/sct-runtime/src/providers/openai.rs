//! OpenAI provider (Chat Completions with structured outputs).
//!
//! The item schema is sent as a strict `json_schema` response format, so a
//! successful completion is already shaped like an item. A refusal comes back
//! as [`ProviderError::MalformedResponse`].

use super::{
    factory::ProviderFactory,
    http,
    secrets::{ApiCredential, CredentialSource},
    strip_keys, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use crate::prompts::PromptSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-2024-08-06";
const SCHEMA_NAME: &str = "sct_item";

/// OpenAI provider.
pub struct OpenAiProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_credential(ApiCredential::new(
            api_key,
            CredentialSource::Programmatic,
            "OpenAI API key",
        ))
    }

    fn with_credential(credential: ApiCredential) -> Result<Self, ProviderError> {
        if credential.is_empty() {
            return Err(ProviderError::NotConfigured(
                "OpenAI API key is empty".to_string(),
            ));
        }
        Ok(Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: http::build_client()?,
        })
    }

    /// Create from JSON configuration with environment fallback.
    ///
    /// Reads `api_key` (falling back to `OPENAI_API_KEY`) and `base_url`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            OPENAI_API_KEY_ENV,
            "OpenAI API key",
        )?;
        let mut provider = Self::with_credential(credential)?;
        if let Some(url) = config["base_url"].as_str() {
            provider.base_url = url.trim_end_matches('/').to_string();
        }
        Ok(provider)
    }

    fn build_request(
        &self,
        prompt: &PromptSpec,
        schema: &JsonValue,
        config: &CompletionConfig,
    ) -> ChatRequest {
        ChatRequest {
            model: config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt.instructions.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt.input.clone(),
                },
            ],
            temperature: config.temperature,
            max_completion_tokens: config.max_tokens,
            response_format: ResponseFormat {
                type_: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: SCHEMA_NAME,
                    strict: true,
                    schema: strict_schema(schema),
                },
            },
        }
    }
}

/// Rewrite a JSON schema for OpenAI strict mode.
///
/// Strict mode requires every property to be listed in `required` and
/// `additionalProperties: false` on every object. Optional fields in the item
/// schema are already nullable, so requiring them only means the model must
/// send `null` explicitly.
pub fn strict_schema(schema: &JsonValue) -> JsonValue {
    let mut schema = schema.clone();
    strip_keys(&mut schema, &["$schema", "$id"]);
    require_all(&mut schema);
    schema
}

fn require_all(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            if let Some(JsonValue::Object(props)) = map.get("properties") {
                let names: Vec<JsonValue> = props.keys().cloned().map(JsonValue::String).collect();
                map.insert("required".to_string(), JsonValue::Array(names));
                map.insert("additionalProperties".to_string(), JsonValue::Bool(false));
            }
            for child in map.values_mut() {
                require_all(child);
            }
        }
        JsonValue::Array(items) => {
            for child in items {
                require_all(child);
            }
        }
        _ => {}
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    type_: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: JsonValue,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn into_completion(body: ChatResponse, requested_model: &str) -> Result<CompletionResponse, ProviderError> {
    let usage = body
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse {
            message: "Response has no choices".to_string(),
            usage,
        })?;

    if let Some(refusal) = choice.message.refusal {
        return Err(ProviderError::MalformedResponse {
            message: format!("Model refused the request: {}", refusal),
            usage,
        });
    }

    if choice.finish_reason.as_deref() == Some("length") {
        return Err(ProviderError::MalformedResponse {
            message: "Response truncated at the token limit".to_string(),
            usage,
        });
    }

    let content = choice
        .message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ProviderError::MalformedResponse {
            message: "Response has no content".to_string(),
            usage,
        })?;

    Ok(CompletionResponse {
        content,
        usage,
        model: body.model.unwrap_or_else(|| requested_model.to_string()),
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        prompt: &PromptSpec,
        schema: &JsonValue,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = self.build_request(prompt, schema, config);

        tracing::debug!(
            provider = "openai",
            model = %config.model,
            domain = %prompt.domain,
            "Sending structured completion request"
        );

        // Credential exposed only here
        let body: ChatResponse = http::send_json(
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(self.credential.expose())
                .json(&request),
            config.timeout,
        )
        .await?;

        into_completion(body, &config.model)
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }
}

/// Factory for creating OpenAI providers from configuration.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-...",               // Optional, falls back to OPENAI_API_KEY
///   "base_url": "https://...",         // Optional, custom API endpoint
///   "model": "gpt-4o-2024-08-06"       // Optional, default model
/// }
/// ```
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OpenAiProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", OPENAI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "OpenAI API key required: set 'api_key' in config or {} env",
                OPENAI_API_KEY_ENV
            )));
        }
        super::factory::check_base_url(config)
    }

    fn credential_env(&self) -> &'static str {
        OPENAI_API_KEY_ENV
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sct_core::{ClinicalDomain, ItemSchema};
    use serde_json::json;

    fn prompt() -> PromptSpec {
        PromptSpec {
            instructions: "Generate one SCT item.".to_string(),
            input: "<domain>HCC</domain>".to_string(),
            domain: ClinicalDomain::from_raw("HCC"),
            guideline: None,
        }
    }

    #[test]
    fn test_strict_schema_requires_every_property() {
        let document = ItemSchema::load().unwrap().document();
        let strict = strict_schema(document);

        assert!(strict.get("$schema").is_none());
        let required = strict["required"].as_array().unwrap();
        assert!(required.contains(&json!("guideline")));

        let scenario = &strict["properties"]["scenarios"]["items"];
        let required = scenario["required"].as_array().unwrap();
        assert!(required.contains(&json!("author_notes")));
        assert_eq!(scenario["additionalProperties"], false);
    }

    #[test]
    fn test_request_shape() {
        let provider = OpenAiProvider::new("sk-test").unwrap();
        let document = ItemSchema::load().unwrap().document();
        let config = CompletionConfig::new("gpt-4o-2024-08-06");
        let request = serde_json::to_value(provider.build_request(&prompt(), document, &config)).unwrap();

        assert_eq!(request["model"], "gpt-4o-2024-08-06");
        assert_eq!(request["messages"][0]["role"], "system");
        assert_eq!(request["messages"][1]["content"], "<domain>HCC</domain>");
        assert_eq!(request["response_format"]["type"], "json_schema");
        assert_eq!(request["response_format"]["json_schema"]["strict"], true);
        assert!(request.get("max_completion_tokens").is_none());
    }

    #[test]
    fn test_response_content_and_usage() {
        let body: ChatResponse = serde_json::from_value(json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{"message": {"content": "{\"domain\":\"HCC\"}", "refusal": null}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 400, "total_tokens": 1300}
        }))
        .unwrap();
        let completion = into_completion(body, "requested").unwrap();
        assert_eq!(completion.content, "{\"domain\":\"HCC\"}");
        assert_eq!(completion.usage.total(), 1300);
        assert_eq!(completion.model, "gpt-4o-2024-08-06");
    }

    #[test]
    fn test_refusal_is_malformed_response() {
        let body: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": null, "refusal": "I can't help with that."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 12}
        }))
        .unwrap();
        match into_completion(body, "gpt") {
            Err(ProviderError::MalformedResponse { message, usage }) => {
                assert!(message.contains("refused"));
                assert_eq!(usage.total(), 912);
            }
            other => panic!("Expected MalformedResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_choices_and_truncation() {
        let empty: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            into_completion(empty, "gpt"),
            Err(ProviderError::MalformedResponse { .. })
        ));

        let truncated: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "{\"dom"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 4096}
        }))
        .unwrap();
        let err = into_completion(truncated, "gpt").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
        assert_eq!(err.usage().completion_tokens, 4096);
    }

    #[test]
    fn test_factory_uses_config_key() {
        let provider = OpenAiProviderFactory
            .create(&json!({"api_key": "sk-config"}))
            .unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            OpenAiProvider::new(""),
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
