//! Outcome routing: which stores an item lands in, and in what form.
//!
//! Routing is total and fixed:
//! 1. Every item goes to [`Destination::Generated`], bare.
//! 2. Valid items also go to [`Destination::Validated`].
//! 3. Invalid items also go to [`Destination::ValidationFailed`].
//!
//! Items in the validated/failed stores carry the full [`ValidationResult`]
//! as a sibling `_validation` object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::types::{ClinicalDomain, SctItem};
use crate::validator::ValidationResult;

/// A store category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Generated,
    Validated,
    ValidationFailed,
}

impl Destination {
    pub const ALL: [Destination; 3] = [
        Destination::Generated,
        Destination::Validated,
        Destination::ValidationFailed,
    ];

    /// Directory (or collection) name for this destination.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Destination::Generated => "generated",
            Destination::Validated => "validated",
            Destination::ValidationFailed => "validation_failed",
        }
    }

    /// Whether artifacts here carry validation metadata.
    pub fn carries_validation(&self) -> bool {
        !matches!(self, Destination::Generated)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Collision-free identity of one generated item across all destinations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub domain: ClinicalDomain,
    pub timestamp: DateTime<Utc>,
    /// Position of the item within its run, starting at 1
    pub sequence: u32,
}

impl ArtifactKey {
    pub fn new(domain: ClinicalDomain, timestamp: DateTime<Utc>, sequence: u32) -> Self {
        Self {
            domain,
            timestamp,
            sequence,
        }
    }

    /// `sct_<domain-slug>_<YYYYMMDD_HHMMSS_mmm>_<seq>.json`
    pub fn file_name(&self) -> String {
        format!(
            "sct_{}_{}_{:04}.json",
            self.domain.slug(),
            self.timestamp.format("%Y%m%d_%H%M%S_%3f"),
            self.sequence
        )
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// On-disk form of an item: the canonical fields plus optional metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedArtifact {
    #[serde(flatten)]
    pub item: SctItem,

    #[serde(
        rename = "_validation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub validation: Option<ValidationResult>,
}

impl PersistedArtifact {
    pub fn bare(item: SctItem) -> Self {
        Self {
            item,
            validation: None,
        }
    }

    pub fn with_validation(item: SctItem, validation: ValidationResult) -> Self {
        Self {
            item,
            validation: Some(validation),
        }
    }
}

/// One destination and the artifact it should receive.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedArtifact {
    pub destination: Destination,
    pub artifact: PersistedArtifact,
}

/// Destinations for a validation outcome.
pub fn destinations(result: &ValidationResult) -> BTreeSet<Destination> {
    let mut set = BTreeSet::new();
    set.insert(Destination::Generated);
    if result.is_valid {
        set.insert(Destination::Validated);
    } else {
        set.insert(Destination::ValidationFailed);
    }
    set
}

/// Route an item and its result to the artifacts each destination receives.
pub fn route(item: &SctItem, result: &ValidationResult) -> Vec<RoutedArtifact> {
    destinations(result)
        .into_iter()
        .map(|destination| {
            let artifact = if destination.carries_validation() {
                PersistedArtifact::with_validation(item.clone(), result.clone())
            } else {
                PersistedArtifact::bare(item.clone())
            };
            RoutedArtifact {
                destination,
                artifact,
            }
        })
        .collect()
}
