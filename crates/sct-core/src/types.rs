//! Core types for SCT items.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The fixed Likert scale every scenario carries, in order.
pub const LIKERT_OPTIONS: [&str; 5] = ["+2", "+1", "0", "-1", "-2"];

lazy_static! {
    /// Domain identifier pattern.
    pub static ref DOMAIN_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_]{3,40}$").unwrap();
}

/// Errors from constructing a checked [`ClinicalDomain`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Domain is empty")]
    Empty,

    /// Holds the trimmed input
    #[error("Domain '{0}' must match ^[A-Za-z0-9_]{{3,40}}$")]
    InvalidFormat(String),
}

/// A clinical subdomain identifier (e.g. `Cirrhosis_Complications`).
///
/// Deserialization does not check the identifier: a provider may return a
/// malformed domain and that is a content problem for the validator, not a
/// structural one. Configured domains go through [`ClinicalDomain::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClinicalDomain(String);

impl ClinicalDomain {
    /// Parse a configured domain, enforcing the identifier invariant.
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::Empty);
        }
        if !DOMAIN_PATTERN.is_match(trimmed) {
            return Err(DomainError::InvalidFormat(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Wrap a raw value without checking it.
    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase, dash-separated form used in artifact file names.
    pub fn slug(&self) -> String {
        self.0
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect()
    }
}

impl fmt::Display for ClinicalDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Regional clinical guideline an item is written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Guideline {
    American,
    British,
    European,
}

impl Guideline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Guideline::American => "american",
            Guideline::British => "british",
            Guideline::European => "european",
        }
    }

    /// Parse a guideline name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "american" => Some(Guideline::American),
            "british" => Some(Guideline::British),
            "european" => Some(Guideline::European),
            _ => None,
        }
    }
}

impl fmt::Display for Guideline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of evaluation a scenario performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioType {
    Diagnosis,
    Management,
    Followup,
}

impl ScenarioType {
    /// The required positional order of scenarios within an item.
    pub const ORDER: [ScenarioType; 3] = [
        ScenarioType::Diagnosis,
        ScenarioType::Management,
        ScenarioType::Followup,
    ];

    /// The fixed effect phrase shown after the new information.
    pub fn effect_phrase(&self) -> &'static str {
        match self {
            ScenarioType::Diagnosis => "this hypothesis becomes",
            ScenarioType::Management => "this action becomes",
            ScenarioType::Followup => "this plan becomes",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioType::Diagnosis => "diagnosis",
            ScenarioType::Management => "management",
            ScenarioType::Followup => "followup",
        }
    }
}

impl fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One independent evaluation unit within an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub scenario_type: ScenarioType,

    /// Short affirmative clinical proposition
    pub hypothesis: String,

    /// Finding(s) that modulate the hypothesis
    pub new_information: String,

    pub effect_phrase: String,

    /// Likert scale; verified, never generated
    pub options: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_notes: Option<String>,
}

impl Scenario {
    /// Build a scenario with the fixed effect phrase and options for its type.
    pub fn new(
        scenario_type: ScenarioType,
        hypothesis: impl Into<String>,
        new_information: impl Into<String>,
    ) -> Self {
        Self {
            scenario_type,
            hypothesis: hypothesis.into(),
            new_information: new_information.into(),
            effect_phrase: scenario_type.effect_phrase().to_string(),
            options: LIKERT_OPTIONS.iter().map(|o| o.to_string()).collect(),
            author_notes: None,
        }
    }

    pub fn with_author_notes(mut self, notes: impl Into<String>) -> Self {
        self.author_notes = Some(notes.into());
        self
    }
}

/// A generated Script Concordance Test item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SctItem {
    pub domain: ClinicalDomain,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guideline: Option<Guideline>,

    /// Shared single-paragraph clinical narrative
    pub vignette: String,

    /// Diagnosis, management and followup scenarios, in that order
    pub scenarios: Vec<Scenario>,
}

impl SctItem {
    /// Set the guideline the item was requested with.
    ///
    /// Only called before validation; items are immutable afterwards.
    pub fn with_guideline(mut self, guideline: Option<Guideline>) -> Self {
        if guideline.is_some() {
            self.guideline = guideline;
        }
        self
    }
}
