//! Outcome stores: where routed artifacts are persisted.
//!
//! A store receives every destination of one item in a single synchronous
//! call, so cancelling the run between awaits can never leave an item
//! half-written across destinations.

use parking_lot::Mutex;
use sct_core::{ArtifactKey, Destination, ItemSchema, PersistedArtifact, RoutedArtifact, SchemaError, ValidationResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize artifact {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} is not an SCT artifact: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },

    #[error("{path} has an unreadable _validation object: {message}")]
    Metadata { path: PathBuf, message: String },
}

/// Where one destination's copy ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub destination: Destination,
    pub location: String,
}

/// Persists routed artifacts.
pub trait OutcomeStore: Send + Sync {
    /// Write every routed copy of one item under `key`.
    ///
    /// Persisting the same key again replaces the previous copies.
    fn persist(
        &self,
        key: &ArtifactKey,
        routed: &[RoutedArtifact],
    ) -> Result<Vec<StoredArtifact>, StoreError>;
}

/// Filesystem store: `<root>/{generated,validated,validation_failed}/<key>.json`.
#[derive(Debug, Clone)]
pub struct FsOutcomeStore {
    root: PathBuf,
}

impl FsOutcomeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, destination: Destination) -> PathBuf {
        self.root.join(destination.dir_name())
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let io = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{}.tmp", file_name));
        fs::write(&tmp, bytes).map_err(io)?;
        fs::rename(&tmp, path).map_err(io)
    }
}

impl OutcomeStore for FsOutcomeStore {
    fn persist(
        &self,
        key: &ArtifactKey,
        routed: &[RoutedArtifact],
    ) -> Result<Vec<StoredArtifact>, StoreError> {
        let file_name = key.file_name();
        let mut stored = Vec::with_capacity(routed.len());

        for entry in routed {
            let mut bytes = serde_json::to_vec_pretty(&entry.artifact).map_err(|source| {
                StoreError::Serialize {
                    key: file_name.clone(),
                    source,
                }
            })?;
            bytes.push(b'\n');

            let path = self.dir(entry.destination).join(&file_name);
            Self::write_atomic(&path, &bytes)?;

            tracing::debug!(destination = %entry.destination, path = %path.display(), "Artifact written");
            stored.push(StoredArtifact {
                destination: entry.destination,
                location: path.display().to_string(),
            });
        }

        Ok(stored)
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryOutcomeStore {
    records: Mutex<BTreeMap<(Destination, String), PersistedArtifact>>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, destination: Destination, key: &ArtifactKey) -> Option<PersistedArtifact> {
        self.records
            .lock()
            .get(&(destination, key.file_name()))
            .cloned()
    }

    /// Artifacts in one destination, ordered by key.
    pub fn artifacts(&self, destination: Destination) -> Vec<PersistedArtifact> {
        self.records
            .lock()
            .iter()
            .filter(|((d, _), _)| *d == destination)
            .map(|(_, a)| a.clone())
            .collect()
    }

    pub fn count(&self, destination: Destination) -> usize {
        self.records
            .lock()
            .keys()
            .filter(|(d, _)| *d == destination)
            .count()
    }
}

impl OutcomeStore for MemoryOutcomeStore {
    fn persist(
        &self,
        key: &ArtifactKey,
        routed: &[RoutedArtifact],
    ) -> Result<Vec<StoredArtifact>, StoreError> {
        let file_name = key.file_name();
        let mut records = self.records.lock();
        Ok(routed
            .iter()
            .map(|entry| {
                records.insert(
                    (entry.destination, file_name.clone()),
                    entry.artifact.clone(),
                );
                StoredArtifact {
                    destination: entry.destination,
                    location: format!("memory://{}/{}", entry.destination, file_name),
                }
            })
            .collect())
    }
}

/// Load one persisted artifact.
///
/// The item part goes through the same structural parse as provider output;
/// `_validation` is read separately when present.
pub fn load_artifact(path: impl AsRef<Path>) -> Result<PersistedArtifact, StoreError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let parse_err = |source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let mut value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| parse_err(SchemaError::InvalidJson(e.to_string())))?;

    let validation = match value.as_object_mut().and_then(|o| o.remove("_validation")) {
        Some(meta) => Some(
            serde_json::from_value::<ValidationResult>(meta).map_err(|e| StoreError::Metadata {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
        ),
        None => None,
    };

    let schema = ItemSchema::load().map_err(parse_err)?;
    let item = schema.parse_value(value).map_err(parse_err)?;

    Ok(PersistedArtifact { item, validation })
}

/// Load every `*.json` file in a directory, in file-name order.
///
/// Unreadable files are reported per entry rather than failing the listing.
pub fn load_dir(
    dir: impl AsRef<Path>,
) -> Result<Vec<(PathBuf, Result<PersistedArtifact, StoreError>)>, StoreError> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    Ok(paths
        .into_iter()
        .map(|p| {
            let loaded = load_artifact(&p);
            (p, loaded)
        })
        .collect())
}
