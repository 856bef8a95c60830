//! Google Gemini provider (generateContent with a response schema).
//!
//! Gemini accepts an OpenAPI-style subset of JSON Schema, so the item schema
//! is rewritten by [`gemini_schema`] before it is sent.

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

/// Environment variable name for the Gemini API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Keywords the Gemini response schema rejects.
const UNSUPPORTED_KEYWORDS: [&str; 6] = [
    "$schema",
    "$id",
    "title",
    "description",
    "examples",
    "additionalProperties",
];

/// Gemini provider.
pub struct GeminiProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_credential(ApiCredential::new(
            api_key,
            CredentialSource::Programmatic,
            "Gemini API key",
        ))
    }

    fn with_credential(credential: ApiCredential) -> Result<Self, ProviderError> {
        if credential.is_empty() {
            return Err(ProviderError::NotConfigured(
                "Gemini API key is empty".to_string(),
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
    /// Reads `api_key` (falling back to `GEMINI_API_KEY`) and `base_url`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            GEMINI_API_KEY_ENV,
            "Gemini API key",
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
    ) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPart {
                    text: prompt.input.clone(),
                }],
            }],
            system_instruction: GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: prompt.instructions.clone(),
                }],
            },
            generation_config: GeminiGenerationConfig {
                response_mime_type: "application/json",
                response_schema: gemini_schema(schema),
                temperature: config.temperature,
                max_output_tokens: config.max_tokens,
            },
        }
    }
}

/// Rewrite a JSON schema into Gemini's response-schema dialect.
///
/// Unsupported keywords are dropped and `["T", "null"]` union types become
/// `"T"` with `nullable: true` (and `null` leaves any `enum`).
pub fn gemini_schema(schema: &JsonValue) -> JsonValue {
    let mut schema = schema.clone();
    strip_keys(&mut schema, &UNSUPPORTED_KEYWORDS);
    rewrite_nullable(&mut schema);
    schema
}

fn rewrite_nullable(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            let union = match map.get("type") {
                Some(JsonValue::Array(types)) => Some(types.clone()),
                _ => None,
            };
            if let Some(types) = union {
                let non_null: Vec<JsonValue> =
                    types.into_iter().filter(|t| t != "null").collect();
                if non_null.len() == 1 {
                    map.insert("type".to_string(), non_null[0].clone());
                    map.insert("nullable".to_string(), JsonValue::Bool(true));
                }
                if let Some(JsonValue::Array(values)) = map.get_mut("enum") {
                    values.retain(|v| !v.is_null());
                }
            }
            for child in map.values_mut() {
                rewrite_nullable(child);
            }
        }
        JsonValue::Array(items) => {
            for child in items {
                rewrite_nullable(child);
            }
        }
        _ => {}
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction")]
    system_instruction: GeminiSystemInstruction,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
    #[serde(rename = "responseSchema")]
    response_schema: JsonValue,
    temperature: f32,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion")]
    model_version: Option<String>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

fn into_completion(body: GeminiResponse, requested_model: &str) -> Result<CompletionResponse, ProviderError> {
    let usage = body
        .usage_metadata
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
        })
        .unwrap_or_default();

    if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::MalformedResponse {
            message: format!("Prompt blocked: {}", reason),
            usage,
        });
    }

    let candidate = body
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse {
            message: "Response has no candidates".to_string(),
            usage,
        })?;

    match candidate.finish_reason.as_deref() {
        None | Some("STOP") => {}
        Some(reason) => {
            return Err(ProviderError::MalformedResponse {
                message: format!("Generation stopped early: {}", reason),
                usage,
            })
        }
    }

    let content: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if content.trim().is_empty() {
        return Err(ProviderError::MalformedResponse {
            message: "Response has no content".to_string(),
            usage,
        });
    }

    Ok(CompletionResponse {
        content,
        usage,
        model: body
            .model_version
            .unwrap_or_else(|| requested_model.to_string()),
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(
        &self,
        prompt: &PromptSpec,
        schema: &JsonValue,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = self.build_request(prompt, schema, config);

        tracing::debug!(
            provider = "gemini",
            model = %config.model,
            domain = %prompt.domain,
            "Sending structured completion request"
        );

        // Credential exposed only here
        let body: GeminiResponse = http::send_json(
            self.client
                .post(format!(
                    "{}/models/{}:generateContent",
                    self.base_url, config.model
                ))
                .header("x-goog-api-key", self.credential.expose())
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
        "gemini"
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }
}

/// Factory for creating Gemini providers from configuration.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "AIza...",              // Optional, falls back to GEMINI_API_KEY
///   "base_url": "https://...",         // Optional, custom API endpoint
///   "model": "gemini-2.5-flash"        // Optional, default model
/// }
/// ```
pub struct GeminiProviderFactory;

impl ProviderFactory for GeminiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "gemini"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(GeminiProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", GEMINI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Gemini API key required: set 'api_key' in config or {} env",
                GEMINI_API_KEY_ENV
            )));
        }
        super::factory::check_base_url(config)
    }

    fn credential_env(&self) -> &'static str {
        GEMINI_API_KEY_ENV
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
    fn test_schema_drops_unsupported_keywords() {
        let document = ItemSchema::load().unwrap().document();
        let schema = gemini_schema(document);
        let text = schema.to_string();
        for keyword in UNSUPPORTED_KEYWORDS {
            assert!(!text.contains(&format!("\"{}\"", keyword)), "{} left in schema", keyword);
        }
        assert_eq!(schema["properties"]["scenarios"]["minItems"], 3);
    }

    #[test]
    fn test_schema_rewrites_nullable_unions() {
        let document = ItemSchema::load().unwrap().document();
        let schema = gemini_schema(document);
        let guideline = &schema["properties"]["guideline"];
        assert_eq!(guideline["type"], "string");
        assert_eq!(guideline["nullable"], true);
        assert_eq!(guideline["enum"], json!(["american", "british", "european"]));

        let notes = &schema["properties"]["scenarios"]["items"]["properties"]["author_notes"];
        assert_eq!(notes["type"], "string");
        assert_eq!(notes["nullable"], true);
    }

    #[test]
    fn test_request_shape() {
        let provider = GeminiProvider::new("AIza-test").unwrap();
        let document = ItemSchema::load().unwrap().document();
        let request = serde_json::to_value(provider.build_request(
            &prompt(),
            document,
            &CompletionConfig::new(DEFAULT_MODEL),
        ))
        .unwrap();

        assert_eq!(request["contents"][0]["parts"][0]["text"], "<domain>HCC</domain>");
        assert_eq!(
            request["systemInstruction"]["parts"][0]["text"],
            "Generate one SCT item."
        );
        assert_eq!(
            request["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert!(request["generationConfig"]["responseSchema"].is_object());
        assert!(request["generationConfig"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn test_response_content_and_usage() {
        let body: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"domain\":"}, {"text": "\"HCC\"}"}], "role": "model"},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 700, "candidatesTokenCount": 350},
            "modelVersion": "gemini-2.5-flash"
        }))
        .unwrap();
        let completion = into_completion(body, "requested").unwrap();
        assert_eq!(completion.content, "{\"domain\":\"HCC\"}");
        assert_eq!(completion.usage.total(), 1050);
        assert_eq!(completion.model, "gemini-2.5-flash");
    }

    #[test]
    fn test_blocked_and_early_stop_are_malformed() {
        let blocked: GeminiResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert!(matches!(
            into_completion(blocked, "g"),
            Err(ProviderError::MalformedResponse { message, .. }) if message.contains("SAFETY")
        ));

        let stopped: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "{"}]}, "finishReason": "MAX_TOKENS"}],
            "usageMetadata": {"promptTokenCount": 850, "candidatesTokenCount": 8192}
        }))
        .unwrap();
        match into_completion(stopped, "g") {
            Err(ProviderError::MalformedResponse { message, usage }) => {
                assert!(message.contains("MAX_TOKENS"));
                assert_eq!(usage.prompt_tokens, 850);
                assert_eq!(usage.completion_tokens, 8192);
            }
            other => panic!("Expected MalformedResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_factory_uses_config_key() {
        let provider = GeminiProviderFactory
            .create(&json!({"api_key": "AIza-config", "base_url": "http://localhost:8080/"}))
            .unwrap();
        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
    }
}
