//! Prompt construction for item generation.
//!
//! The builder only decides wording. The provider adapter turns a
//! [`PromptSpec`] into a structured request against the item schema.
//!
//! The default template is an XML document with a single `{{PARAMETERS}}`
//! placeholder that receives `<domain>` and `<guideline_source>` tags. Word
//! limits are rendered from the active [`ValidatorConfig`] so the prompt
//! always asks for what the validator will accept.

use parking_lot::Mutex;
use sct_core::{ClinicalDomain, Guideline, ValidatorConfig, LIKERT_OPTIONS};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Built-in generation template.
pub const DEFAULT_TEMPLATE: &str = include_str!("../../../prompts/sct_item_prompt.xml");

const PARAMETERS_PLACEHOLDER: &str = "{{PARAMETERS}}";

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Prompt template not found: {0}")]
    TemplateNotFound(PathBuf),

    #[error("Prompt template has no {{{{PARAMETERS}}}} placeholder")]
    MissingPlaceholder,

    #[error("Guideline '{guideline}' not found in {dir} (expected {guideline}_guideline_summary.xml or {guideline}_guideline.xml)")]
    GuidelineNotFound { guideline: Guideline, dir: PathBuf },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What to ask a provider for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSpec {
    /// System-level instructions
    pub instructions: String,

    /// Rendered user prompt
    pub input: String,

    pub domain: ClinicalDomain,

    pub guideline: Option<Guideline>,
}

/// Builds the prompt for one (domain, guideline) pair.
pub trait PromptBuilder: Send + Sync {
    fn build(
        &self,
        domain: &ClinicalDomain,
        guideline: Option<Guideline>,
    ) -> Result<PromptSpec, PromptError>;
}

/// Template-driven prompt builder.
pub struct TemplatePromptBuilder {
    template: String,
    limits: ValidatorConfig,
    guideline_dir: Option<PathBuf>,
    guideline_cache: Mutex<HashMap<Guideline, String>>,
}

impl std::fmt::Debug for TemplatePromptBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplatePromptBuilder")
            .field("template_chars", &self.template.len())
            .field("guideline_dir", &self.guideline_dir)
            .finish()
    }
}

impl Default for TemplatePromptBuilder {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            limits: ValidatorConfig::default(),
            guideline_dir: None,
            guideline_cache: Mutex::new(HashMap::new()),
        }
    }
}

impl TemplatePromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom template string.
    pub fn with_template(mut self, template: impl Into<String>) -> Result<Self, PromptError> {
        let template = template.into();
        if !template.contains(PARAMETERS_PLACEHOLDER) {
            return Err(PromptError::MissingPlaceholder);
        }
        self.template = template;
        Ok(self)
    }

    /// Load a custom template from disk.
    pub fn with_template_file(self, path: impl AsRef<Path>) -> Result<Self, PromptError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PromptError::TemplateNotFound(path.to_path_buf()));
        }
        let template = std::fs::read_to_string(path).map_err(|source| PromptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.with_template(template)
    }

    /// Directory holding `<guideline>_guideline[_summary].xml` files.
    pub fn with_guideline_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.guideline_dir = Some(dir.into());
        self
    }

    /// Word and sentence limits to render into the prompt.
    pub fn with_limits(mut self, limits: ValidatorConfig) -> Self {
        self.limits = limits;
        self
    }

    fn instructions(&self) -> String {
        let l = &self.limits;
        format!(
            "Generate a complete SCT item in English about hepatology following EXACTLY the \
             format and quality criteria provided. Ensure all fields meet the quality \
             specifications. CRITICAL REQUIREMENTS: \
             1. The 'options' field MUST be exactly {:?} - DO NOT modify these fixed scale values. \
             2. The 'vignette' MUST be {}-{} words (aim for {}-{} words for optimal depth). COUNT CAREFULLY. \
             3. The 'scenarios' MUST be exactly diagnosis, management, followup in that order.",
            LIKERT_OPTIONS,
            l.vignette_words.min,
            l.vignette_words.max,
            l.vignette_preferred_words.min,
            l.vignette_preferred_words.max,
        )
    }

    fn render(&self, parameters: &str) -> String {
        let l = &self.limits;
        self.template
            .replace(PARAMETERS_PLACEHOLDER, parameters)
            .replace("{{VIGNETTE_MIN}}", &l.vignette_words.min.to_string())
            .replace("{{VIGNETTE_MAX}}", &l.vignette_words.max.to_string())
            .replace("{{VIGNETTE_PREFERRED_MIN}}", &l.vignette_preferred_words.min.to_string())
            .replace("{{VIGNETTE_PREFERRED_MAX}}", &l.vignette_preferred_words.max.to_string())
            .replace("{{HYPOTHESIS_MIN}}", &l.hypothesis_words.min.to_string())
            .replace("{{HYPOTHESIS_MAX}}", &l.hypothesis_words.max.to_string())
            .replace("{{NEW_INFO_MIN}}", &l.new_information_words.min.to_string())
            .replace("{{NEW_INFO_MAX}}", &l.new_information_words.max.to_string())
            .replace("{{NOTES_MAX_CHARS}}", &l.author_notes_max_chars.to_string())
            .replace("{{NOTES_MAX_SENTENCES}}", &l.author_notes_max_sentences.to_string())
    }

    fn guideline_context(&self, guideline: Guideline) -> Result<Option<String>, PromptError> {
        let Some(dir) = &self.guideline_dir else {
            return Ok(None);
        };

        if let Some(cached) = self.guideline_cache.lock().get(&guideline) {
            return Ok(Some(cached.clone()));
        }

        let summary = dir.join(format!("{}_guideline_summary.xml", guideline));
        let full = dir.join(format!("{}_guideline.xml", guideline));
        let path = if summary.exists() {
            summary
        } else if full.exists() {
            tracing::warn!(
                guideline = %guideline,
                path = %full.display(),
                "Using full guideline document; a *_guideline_summary.xml would use fewer tokens"
            );
            full
        } else {
            return Err(PromptError::GuidelineNotFound {
                guideline,
                dir: dir.clone(),
            });
        };

        let content = std::fs::read_to_string(&path).map_err(|source| PromptError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(guideline = %guideline, chars = content.len(), "Loaded guideline context");

        self.guideline_cache.lock().insert(guideline, content.clone());
        Ok(Some(content))
    }
}

impl PromptBuilder for TemplatePromptBuilder {
    fn build(
        &self,
        domain: &ClinicalDomain,
        guideline: Option<Guideline>,
    ) -> Result<PromptSpec, PromptError> {
        let mut parameters = vec![format!("<domain>{}</domain>", domain)];
        if let Some(g) = guideline {
            parameters.push(format!(
                "<guideline_source>{} Clinical Guidelines</guideline_source>",
                capitalize(g.as_str())
            ));
        }
        let rendered = self.render(&parameters.join("\n      "));

        let input = match guideline.map(|g| self.guideline_context(g)).transpose()?.flatten() {
            Some(context) => format!(
                "<clinical_guideline_context>\n\
                 The following clinical guideline should inform the generation of realistic, guideline-based scenarios:\n\n\
                 {}\n\n\
                 Use this guideline as reference to ensure clinical accuracy and reflect real-world practice patterns.\n\
                 </clinical_guideline_context>\n\n{}",
                context, rendered
            ),
            None => rendered,
        };

        Ok(PromptSpec {
            instructions: self.instructions(),
            input,
            domain: domain.clone(),
            guideline,
        })
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> ClinicalDomain {
        ClinicalDomain::parse("Cirrhosis_Complications").unwrap()
    }

    #[test]
    fn test_default_template_renders_parameters() {
        let spec = TemplatePromptBuilder::new().build(&domain(), None).unwrap();
        assert!(spec.input.contains("<domain>Cirrhosis_Complications</domain>"));
        assert!(!spec.input.contains("{{"));
        assert!(!spec.input.contains("guideline_source"));
        assert!(spec.instructions.contains("120-240 words"));
    }

    #[test]
    fn test_guideline_source_tag() {
        let spec = TemplatePromptBuilder::new()
            .build(&domain(), Some(Guideline::British))
            .unwrap();
        assert!(spec
            .input
            .contains("<guideline_source>British Clinical Guidelines</guideline_source>"));
        assert_eq!(spec.guideline, Some(Guideline::British));
    }

    #[test]
    fn test_limits_follow_validator_config() {
        let mut limits = ValidatorConfig::default();
        limits.vignette_words.min = 100;
        let spec = TemplatePromptBuilder::new()
            .with_limits(limits)
            .build(&domain(), None)
            .unwrap();
        assert!(spec.input.contains("Between 100 and"));
        assert!(spec.instructions.contains("100-240 words"));
    }

    #[test]
    fn test_custom_template_requires_placeholder() {
        let result = TemplatePromptBuilder::new().with_template("<prompt/>");
        assert!(matches!(result, Err(PromptError::MissingPlaceholder)));

        let builder = TemplatePromptBuilder::new()
            .with_template("<prompt>{{PARAMETERS}}</prompt>")
            .unwrap();
        let spec = builder.build(&domain(), None).unwrap();
        assert_eq!(spec.input, "<prompt><domain>Cirrhosis_Complications</domain></prompt>");
    }

    #[test]
    fn test_missing_template_file() {
        let result = TemplatePromptBuilder::new().with_template_file("/nonexistent/prompt.xml");
        assert!(matches!(result, Err(PromptError::TemplateNotFound(_))));
    }

    #[test]
    fn test_guideline_summary_preferred() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("european_guideline.xml"), "<full/>").unwrap();
        std::fs::write(
            dir.path().join("european_guideline_summary.xml"),
            "<summary/>",
        )
        .unwrap();

        let builder = TemplatePromptBuilder::new().with_guideline_dir(dir.path());
        let spec = builder.build(&domain(), Some(Guideline::European)).unwrap();
        assert!(spec.input.starts_with("<clinical_guideline_context>"));
        assert!(spec.input.contains("<summary/>"));
        assert!(!spec.input.contains("<full/>"));
    }

    #[test]
    fn test_guideline_full_fallback_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("american_guideline.xml"), "<full/>").unwrap();
        let builder = TemplatePromptBuilder::new().with_guideline_dir(dir.path());

        let spec = builder.build(&domain(), Some(Guideline::American)).unwrap();
        assert!(spec.input.contains("<full/>"));

        let result = builder.build(&domain(), Some(Guideline::British));
        assert!(matches!(result, Err(PromptError::GuidelineNotFound { .. })));
    }
}
