//! # sct-core
//!
//! Deterministic schema, validation and routing for generated Script
//! Concordance Test (SCT) items.
//!
//! This crate answers, for one generated item:
//! - Is it structurally an SCT item at all?
//! - Does its content meet the authoring rules?
//! - Where should it be stored?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: the same item always produces the same findings
//! 2. **No I/O**: no network, filesystem or environment access
//! 3. **Total**: every rule runs; every finding is reported in rule order
//!
//! ## Example
//!
//! ```rust,ignore
//! use sct_core::{parse_item, route, Validator};
//!
//! let item = parse_item(&raw_response)?;
//! let result = Validator::default().validate(&item);
//! for routed in route(&item, &result) {
//!     println!("{} -> {}", item.domain, routed.destination);
//! }
//! ```

pub mod routing;
pub mod schedule;
pub mod schema;
pub mod types;
pub mod validator;

// Re-export main types at crate root
pub use routing::{
    destinations, route, ArtifactKey, Destination, PersistedArtifact, RoutedArtifact,
};
pub use schedule::{
    guideline_for, parse_distribution, parse_guidelines, DomainSchedule, ScheduleError,
    WeightedDomain,
};
pub use schema::{parse_item, ItemSchema, SchemaError};
pub use types::{
    ClinicalDomain, DomainError, Guideline, Scenario, ScenarioType, SctItem, LIKERT_OPTIONS,
};
pub use validator::{validate, ValidationResult, Validator, ValidatorConfig, WordRange};
