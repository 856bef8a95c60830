//! Content validation for generated SCT items.
//!
//! The validator is a pure function of the item and its configuration. Every
//! rule runs, nothing short-circuits across rules, and messages are emitted in
//! a fixed order:
//!
//! 1. domain
//! 2. vignette
//! 3. scenario array (count and positional order)
//! 4. each scenario: hypothesis, new information, effect phrase, options,
//!    author notes
//! 5. cross-scenario independence (warnings only)
//!
//! `is_valid` is true iff no errors were recorded. Warnings never change it.

mod text;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Scenario, ScenarioType, SctItem, DOMAIN_PATTERN, LIKERT_OPTIONS};

pub use text::{has_line_break, longest_shared_run, normalized_words, sentence_count, word_count};

/// Outcome of validating one item.
///
/// Persisted next to validated/failed artifacts as the `_validation` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn new(validated_at: DateTime<Utc>) -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            validated_at,
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Whether two results report the same findings, ignoring the timestamp.
    pub fn same_findings(&self, other: &ValidationResult) -> bool {
        self.is_valid == other.is_valid
            && self.errors == other.errors
            && self.warnings == other.warnings
    }
}

/// Inclusive word-count bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordRange {
    pub min: usize,
    pub max: usize,
}

impl WordRange {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, count: usize) -> bool {
        count >= self.min && count <= self.max
    }
}

/// Thresholds for content validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Hard bounds for the vignette
    pub vignette_words: WordRange,

    /// Advisory sub-range; outside it only a warning is emitted
    pub vignette_preferred_words: WordRange,

    pub hypothesis_words: WordRange,

    pub new_information_words: WordRange,

    pub new_information_max_sentences: usize,

    /// Measured in characters, not bytes
    pub author_notes_max_chars: usize,

    pub author_notes_max_sentences: usize,

    /// Shared consecutive words between one scenario's new information and
    /// another scenario's hypothesis that trigger an independence warning.
    /// Zero disables the check.
    pub overlap_min_words: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            vignette_words: WordRange::new(120, 240),
            vignette_preferred_words: WordRange::new(150, 200),
            hypothesis_words: WordRange::new(8, 25),
            new_information_words: WordRange::new(8, 30),
            new_information_max_sentences: 2,
            author_notes_max_chars: 300,
            author_notes_max_sentences: 3,
            overlap_min_words: 4,
        }
    }
}

/// Validator for SCT items.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate an item, stamping the result with the current time.
    pub fn validate(&self, item: &SctItem) -> ValidationResult {
        self.validate_at(item, Utc::now())
    }

    /// Validate an item with an explicit timestamp.
    pub fn validate_at(&self, item: &SctItem, validated_at: DateTime<Utc>) -> ValidationResult {
        let mut result = ValidationResult::new(validated_at);

        self.check_domain(item.domain.as_str(), &mut result);
        self.check_vignette(&item.vignette, &mut result);
        self.check_scenario_array(&item.scenarios, &mut result);

        for (index, scenario) in item.scenarios.iter().enumerate() {
            let prefix = format!("Scenario {} ({})", index + 1, scenario.scenario_type);
            self.check_hypothesis(&scenario.hypothesis, &prefix, &mut result);
            self.check_new_information(&scenario.new_information, &prefix, &mut result);
            self.check_effect_phrase(scenario, &prefix, &mut result);
            self.check_options(&scenario.options, &prefix, &mut result);
            self.check_author_notes(scenario.author_notes.as_deref(), &prefix, &mut result);
        }

        self.check_independence(&item.scenarios, &mut result);

        tracing::debug!(
            domain = %item.domain,
            is_valid = result.is_valid,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Item validated"
        );

        result
    }

    fn check_domain(&self, domain: &str, result: &mut ValidationResult) {
        if domain.trim().is_empty() {
            result.add_error("Domain is required and cannot be empty");
            return;
        }

        if !DOMAIN_PATTERN.is_match(domain) {
            result.add_error(format!(
                "Domain '{}' format invalid. Must match: ^[A-Za-z0-9_]{{3,40}}$",
                domain
            ));
        }

        let length = domain.chars().count();
        if !(3..=40).contains(&length) {
            result.add_error(format!(
                "Domain length must be between 3-40 characters (got {})",
                length
            ));
        }
    }

    fn check_vignette(&self, vignette: &str, result: &mut ValidationResult) {
        if vignette.trim().is_empty() {
            result.add_error("Vignette is required and cannot be empty");
            return;
        }

        if has_line_break(vignette) {
            result.add_error("Vignette must be a single paragraph (no line breaks)");
        }

        let bounds = self.config.vignette_words;
        let words = word_count(vignette);
        if words < bounds.min {
            result.add_error(format!(
                "Vignette too short: {} words (minimum: {})",
                words, bounds.min
            ));
        } else if words > bounds.max {
            result.add_error(format!(
                "Vignette too long: {} words (maximum: {})",
                words, bounds.max
            ));
        } else if !self.config.vignette_preferred_words.contains(words) {
            let preferred = self.config.vignette_preferred_words;
            result.add_warning(format!(
                "Vignette has {} words, outside the preferred range {}-{}",
                words, preferred.min, preferred.max
            ));
        }
    }

    fn check_scenario_array(&self, scenarios: &[Scenario], result: &mut ValidationResult) {
        if scenarios.is_empty() {
            result.add_error("Scenarios array is required and cannot be empty");
            return;
        }

        if scenarios.len() != ScenarioType::ORDER.len() {
            result.add_error(format!(
                "Must have exactly 3 scenarios (diagnosis, management, followup). Got {}",
                scenarios.len()
            ));
            return;
        }

        let actual: Vec<ScenarioType> = scenarios.iter().map(|s| s.scenario_type).collect();
        if actual != ScenarioType::ORDER {
            let names: Vec<&str> = actual.iter().map(|t| t.as_str()).collect();
            result.add_error(format!(
                "Scenarios must be in order: diagnosis, management, followup. Got: [{}]",
                names.join(", ")
            ));
        }
    }

    fn check_hypothesis(&self, hypothesis: &str, prefix: &str, result: &mut ValidationResult) {
        if hypothesis.trim().is_empty() {
            result.add_error(format!("{}: Hypothesis is required and cannot be empty", prefix));
            return;
        }

        let bounds = self.config.hypothesis_words;
        let words = word_count(hypothesis);
        if words < bounds.min {
            result.add_error(format!(
                "{}: Hypothesis too short: {} words (minimum: {})",
                prefix, words, bounds.min
            ));
        } else if words > bounds.max {
            result.add_error(format!(
                "{}: Hypothesis too long: {} words (maximum: {})",
                prefix, words, bounds.max
            ));
        }

        if hypothesis.contains('?') {
            result.add_error(format!(
                "{}: Hypothesis must be an affirmative statement, not a question",
                prefix
            ));
        }
    }

    fn check_new_information(&self, new_info: &str, prefix: &str, result: &mut ValidationResult) {
        if new_info.trim().is_empty() {
            result.add_error(format!(
                "{}: New information is required and cannot be empty",
                prefix
            ));
            return;
        }

        let bounds = self.config.new_information_words;
        let words = word_count(new_info);
        if words < bounds.min {
            result.add_error(format!(
                "{}: New information too short: {} words (minimum: {})",
                prefix, words, bounds.min
            ));
        } else if words > bounds.max {
            result.add_error(format!(
                "{}: New information too long: {} words (maximum: {})",
                prefix, words, bounds.max
            ));
        }

        if new_info.contains('?') {
            result.add_error(format!(
                "{}: New information must be declarative, not a question",
                prefix
            ));
        }

        let sentences = sentence_count(new_info);
        if sentences > self.config.new_information_max_sentences {
            result.add_error(format!(
                "{}: New information has {} sentences (maximum: {})",
                prefix, sentences, self.config.new_information_max_sentences
            ));
        }
    }

    fn check_effect_phrase(&self, scenario: &Scenario, prefix: &str, result: &mut ValidationResult) {
        let expected = scenario.scenario_type.effect_phrase();
        if !scenario.effect_phrase.trim().eq_ignore_ascii_case(expected) {
            result.add_error(format!(
                "{}: Effect phrase must be '{}' (got '{}')",
                prefix, expected, scenario.effect_phrase
            ));
        }
    }

    fn check_options(&self, options: &[String], prefix: &str, result: &mut ValidationResult) {
        if options.is_empty() {
            result.add_error(format!("{}: Options are required and cannot be empty", prefix));
            return;
        }

        if options.len() != LIKERT_OPTIONS.len() {
            result.add_error(format!(
                "{}: Options must have exactly 5 elements (got {})",
                prefix,
                options.len()
            ));
            return;
        }

        if options.iter().map(String::as_str).ne(LIKERT_OPTIONS) {
            result.add_error(format!(
                "{}: Options must be exactly {:?} in that order (got {:?})",
                prefix, LIKERT_OPTIONS, options
            ));

            let mut seen = std::collections::BTreeSet::new();
            if !options.iter().all(|o| seen.insert(o)) {
                result.add_error(format!("{}: Options contain duplicates", prefix));
            }
        }
    }

    fn check_author_notes(&self, notes: Option<&str>, prefix: &str, result: &mut ValidationResult) {
        // Optional field
        let Some(notes) = notes.filter(|n| !n.trim().is_empty()) else {
            return;
        };

        let length = notes.chars().count();
        if length > self.config.author_notes_max_chars {
            result.add_error(format!(
                "{}: Author notes too long: {} characters (maximum: {})",
                prefix, length, self.config.author_notes_max_chars
            ));
        }

        let sentences = sentence_count(notes);
        if sentences > self.config.author_notes_max_sentences {
            result.add_error(format!(
                "{}: Author notes has {} sentences (maximum: {})",
                prefix, sentences, self.config.author_notes_max_sentences
            ));
        }
    }

    /// Best-effort lexical check that no scenario's new information leaks
    /// another scenario's hypothesis.
    fn check_independence(&self, scenarios: &[Scenario], result: &mut ValidationResult) {
        let threshold = self.config.overlap_min_words;
        if threshold == 0 {
            return;
        }

        let hypotheses: Vec<Vec<String>> = scenarios
            .iter()
            .map(|s| normalized_words(&s.hypothesis))
            .collect();

        for (i, scenario) in scenarios.iter().enumerate() {
            let info = normalized_words(&scenario.new_information);
            for (j, other) in scenarios.iter().enumerate() {
                if i == j {
                    continue;
                }
                let shared = longest_shared_run(&info, &hypotheses[j]);
                if shared >= threshold {
                    result.add_warning(format!(
                        "Scenario {} ({}): New information shares {} consecutive words with the hypothesis of scenario {} ({}); scenarios should be independent",
                        i + 1,
                        scenario.scenario_type,
                        shared,
                        j + 1,
                        other.scenario_type
                    ));
                }
            }
        }
    }
}

/// Validate an item with the default configuration.
pub fn validate(item: &SctItem) -> ValidationResult {
    Validator::default().validate(item)
}
