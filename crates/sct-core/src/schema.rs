//! Structural parsing of provider responses.
//!
//! Provider output is checked against `schema/sct_item.schema.json` before it
//! becomes an [`SctItem`]. The same document is sent to providers as the
//! response schema, so a conforming provider can never fail this step.
//!
//! A response that fails here is a provider/integration fault. Content rules
//! (word counts, ordering, phrasing) belong to the validator and never make an
//! item fail to parse.

use std::sync::OnceLock;
use thiserror::Error;

use crate::types::SctItem;

/// Embedded target schema (loaded at compile time).
const ITEM_SCHEMA_JSON: &str = include_str!("../../../schema/sct_item.schema.json");

/// Compiled schema (initialized once, reused).
static ITEM_SCHEMA: OnceLock<Result<ItemSchema, String>> = OnceLock::new();

/// Errors from structural parsing.
#[derive(Error, Debug, Clone)]
pub enum SchemaError {
    #[error("Failed to load item schema: {0}")]
    LoadError(String),

    #[error("Response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Response does not conform to the item schema: {}", .0.join("; "))]
    Violations(Vec<String>),

    #[error("Response has the wrong shape: {0}")]
    Shape(String),
}

/// The target schema for one generated item.
pub struct ItemSchema {
    document: serde_json::Value,
    validator: jsonschema::Validator,
}

impl ItemSchema {
    /// Get the shared compiled schema.
    pub fn load() -> Result<&'static ItemSchema, SchemaError> {
        let result = ITEM_SCHEMA.get_or_init(|| {
            let document: serde_json::Value = match serde_json::from_str(ITEM_SCHEMA_JSON) {
                Ok(v) => v,
                Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
            };

            match jsonschema::options().build(&document) {
                Ok(validator) => Ok(ItemSchema {
                    document,
                    validator,
                }),
                Err(e) => Err(format!("Failed to compile schema: {}", e)),
            }
        });

        match result {
            Ok(schema) => Ok(schema),
            Err(e) => Err(SchemaError::LoadError(e.clone())),
        }
    }

    /// The schema document, as sent to providers.
    pub fn document(&self) -> &serde_json::Value {
        &self.document
    }

    /// Collect every schema violation in a JSON value.
    pub fn violations(&self, value: &serde_json::Value) -> Vec<String> {
        self.validator
            .iter_errors(value)
            .map(|e| format!("{} at '{}'", e, e.instance_path))
            .collect()
    }

    /// Parse a raw provider response into an item.
    pub fn parse_str(&self, raw: &str) -> Result<SctItem, SchemaError> {
        let value: serde_json::Value =
            serde_json::from_str(raw.trim()).map_err(|e| SchemaError::InvalidJson(e.to_string()))?;
        self.parse_value(value)
    }

    /// Parse an already-decoded JSON value into an item.
    pub fn parse_value(&self, value: serde_json::Value) -> Result<SctItem, SchemaError> {
        let violations = self.violations(&value);
        if !violations.is_empty() {
            return Err(SchemaError::Violations(violations));
        }

        let item: SctItem =
            serde_json::from_value(value).map_err(|e| SchemaError::Shape(e.to_string()))?;

        // Guaranteed by minItems/maxItems; kept so the invariant holds even if
        // the schema document is edited.
        if item.scenarios.len() != 3 {
            return Err(SchemaError::Shape(format!(
                "expected 3 scenarios, got {}",
                item.scenarios.len()
            )));
        }

        Ok(item)
    }
}

/// Parse a raw provider response using the shared schema.
pub fn parse_item(raw: &str) -> Result<SctItem, SchemaError> {
    ItemSchema::load()?.parse_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClinicalDomain, Guideline, ScenarioType};
    use serde_json::json;

    fn scenario(kind: &str) -> serde_json::Value {
        json!({
            "scenario_type": kind,
            "hypothesis": "The presentation is consistent with spontaneous bacterial peritonitis in cirrhosis",
            "new_information": "Ascitic fluid neutrophil count is 320 cells per microlitre on paracentesis.",
            "effect_phrase": "this hypothesis becomes",
            "options": ["+2", "+1", "0", "-1", "-2"],
            "author_notes": null
        })
    }

    fn item() -> serde_json::Value {
        json!({
            "domain": "Cirrhosis_Complications",
            "guideline": "american",
            "vignette": "A 58-year-old man with alcohol-related cirrhosis presents with abdominal pain.",
            "scenarios": [scenario("diagnosis"), scenario("management"), scenario("followup")]
        })
    }

    #[test]
    fn test_valid_response_parses() {
        let parsed = parse_item(&item().to_string()).unwrap();
        assert_eq!(parsed.domain, ClinicalDomain::from_raw("Cirrhosis_Complications"));
        assert_eq!(parsed.guideline, Some(Guideline::American));
        assert_eq!(parsed.scenarios[2].scenario_type, ScenarioType::Followup);
        assert_eq!(parsed.scenarios[0].author_notes, None);
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let mut value = item();
        value.as_object_mut().unwrap().remove("guideline");
        value["scenarios"][1]
            .as_object_mut()
            .unwrap()
            .remove("author_notes");
        let parsed = ItemSchema::load().unwrap().parse_value(value).unwrap();
        assert_eq!(parsed.guideline, None);
    }

    #[test]
    fn test_invalid_json_fails() {
        let result = parse_item("{\"domain\": ");
        assert!(matches!(result, Err(SchemaError::InvalidJson(_))));
    }

    #[test]
    fn test_missing_required_field_fails() {
        let mut value = item();
        value.as_object_mut().unwrap().remove("vignette");
        let result = ItemSchema::load().unwrap().parse_value(value);
        assert!(matches!(result, Err(SchemaError::Violations(_))));
    }

    #[test]
    fn test_wrong_scenario_count_fails() {
        let mut value = item();
        value["scenarios"] = json!([scenario("diagnosis"), scenario("management")]);
        let result = ItemSchema::load().unwrap().parse_value(value);
        assert!(matches!(result, Err(SchemaError::Violations(_))));
    }

    #[test]
    fn test_unknown_scenario_type_fails() {
        let mut value = item();
        value["scenarios"][1]["scenario_type"] = json!("prognosis");
        let result = ItemSchema::load().unwrap().parse_value(value);
        assert!(matches!(result, Err(SchemaError::Violations(_))));
    }

    #[test]
    fn test_wrong_type_fails() {
        let mut value = item();
        value["vignette"] = json!(42);
        let result = ItemSchema::load().unwrap().parse_value(value);
        match result {
            Err(SchemaError::Violations(errors)) => {
                assert!(errors.iter().any(|e| e.contains("/vignette")));
            }
            other => panic!("Expected Violations, got {:?}", other),
        }
    }

    #[test]
    fn test_reordered_scenarios_still_parse() {
        // Ordering is a content rule, checked by the validator.
        let mut value = item();
        value["scenarios"] = json!([scenario("management"), scenario("diagnosis"), scenario("followup")]);
        assert!(ItemSchema::load().unwrap().parse_value(value).is_ok());
    }

    #[test]
    fn test_permuted_options_still_parse() {
        let mut value = item();
        value["scenarios"][0]["options"] = json!(["+1", "+2", "0", "-1", "-2"]);
        assert!(ItemSchema::load().unwrap().parse_value(value).is_ok());
    }
}
