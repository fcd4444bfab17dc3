// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dataset database management and manipulation.
//!
//! Tracerepo keeps track of every dataset in a repository through the
//! __dataset database__. The database maps each dataset identity to the
//! dataset's file path, area, validity state, and tags.
//!
//! # Database Layout
//!
//! The database is a TOML file at the repository root, `database.toml` by
//! default. Each dataset is its own table keyed by identity:
//!
//! ```toml
//! [dataset."kb11/kb11_traces"]
//! area = "kb11"
//! path = "data/kb11/kb11_traces.geojson"
//! validity = "valid"
//! tags = ["traces"]
//! ```
//!
//! Identities are kept in sorted order, so the file diffs cleanly when kept
//! under version control.
//!
//! # Validity States
//!
//! New datasets start out [`Validity::Unvalidated`]. Validation moves them to
//! any of the other states, and re-validation may move them again. Only an
//! explicit reset returns a dataset to `unvalidated`. Entries are never
//! dropped unless their backing file is gone, and even then only on request.

use crate::path::replace_file;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument};

/// Stable identity of a dataset.
///
/// Derived from the dataset's path relative to the data directory, without
/// extension, e.g., `kb11/traces/kb11_traces`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    /// Construct new dataset identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for DatasetId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.0)
    }
}

/// Outcome of validating a dataset against its schema contract.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    /// Dataset has not been validated yet.
    #[default]
    Unvalidated,

    /// Dataset satisfies its schema contract.
    Valid,

    /// Dataset breaks one or more schema checks.
    Invalid,

    /// Dataset has no rows.
    Empty,

    /// Dataset could not be loaded at all.
    CriticalError,
}

impl Validity {
    /// All validity states in display order.
    pub const ALL: [Validity; 5] = [
        Self::Unvalidated,
        Self::Valid,
        Self::Invalid,
        Self::Empty,
        Self::CriticalError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unvalidated => "unvalidated",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Empty => "empty",
            Self::CriticalError => "critical_error",
        }
    }
}

impl Display for Validity {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for Validity {
    type Err = UnknownValidity;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|validity| validity.as_str() == data)
            .ok_or_else(|| UnknownValidity(data.into()))
    }
}

/// Validity state name that does not exist.
#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown validity state {0:?}, expected one of unvalidated, valid, invalid, empty, critical_error")]
pub struct UnknownValidity(String);

/// Database record of a single dataset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatasetEntry {
    /// Area the dataset belongs to.
    pub area: String,

    /// Dataset file path relative to repository root.
    pub path: PathBuf,

    /// Current validity state.
    pub validity: Validity,

    /// Free-form tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl DatasetEntry {
    /// Construct new unvalidated entry.
    pub fn new(area: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            area: area.into(),
            path: path.into(),
            validity: Validity::Unvalidated,
            tags: BTreeSet::new(),
        }
    }

    /// Check if backing file is missing relative to repository root.
    pub fn is_dangling(&self, root: impl AsRef<Path>) -> bool {
        !root.as_ref().join(&self.path).exists()
    }
}

/// Dataset database.
///
/// # Invariant
///
/// - No two entries share the same file path.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Database {
    #[serde(default, rename = "dataset", skip_serializing_if = "BTreeMap::is_empty")]
    datasets: BTreeMap<DatasetId, DatasetEntry>,
}

impl Database {
    /// Construct new empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load database from file.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadDatabase`] if file cannot be read.
    /// - Return [`StoreError::CorruptDatabase`] if file is not a valid
    ///   database, or if two entries share a path.
    #[instrument(skip(path), level = "debug")]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("load database {:?}", path.display());
        let content = read_to_string(path).map_err(|err| StoreError::ReadDatabase {
            source: err,
            path: path.to_path_buf(),
        })?;

        let database: Database =
            toml::de::from_str(&content).map_err(|err| StoreError::CorruptDatabase {
                source: Corruption::Parse(err),
                path: path.to_path_buf(),
            })?;

        // INVARIANT: Paths are unique across all entries.
        let mut owners: BTreeMap<&Path, &DatasetId> = BTreeMap::new();
        for (id, entry) in &database.datasets {
            if let Some(owner) = owners.insert(entry.path.as_path(), id) {
                return Err(StoreError::CorruptDatabase {
                    source: Corruption::SharedPath {
                        path: entry.path.clone(),
                        first: owner.clone(),
                        second: id.clone(),
                    },
                    path: path.to_path_buf(),
                });
            }
        }

        Ok(database)
    }

    /// Write database to file.
    ///
    /// Writes to a temporary file next to the target first, and then renames
    /// it over the target. The previous database stays intact if writing
    /// fails midway.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Serialize`] if database cannot be serialized.
    /// - Return [`StoreError::WriteDatabase`] if file cannot be replaced.
    #[instrument(skip(self, path), level = "debug")]
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::ser::to_string_pretty(self)?;
        replace_file(path, content).map_err(|err| StoreError::WriteDatabase {
            source: err,
            path: path.to_path_buf(),
        })?;
        info!("wrote {} dataset entries to {:?}", self.len(), path.display());

        Ok(())
    }

    /// Register new dataset.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::DuplicatePath`] if path is already registered
    ///   under a different identity.
    /// - Return [`StoreError::DuplicateIdentity`] if identity is already
    ///   registered.
    pub fn add(&mut self, id: DatasetId, entry: DatasetEntry) -> Result<()> {
        if let Some(owner) = self.find_by_path(&entry.path) {
            if *owner != id {
                return Err(StoreError::DuplicatePath {
                    path: entry.path,
                    owner: owner.clone(),
                });
            }
        }

        if self.datasets.contains_key(&id) {
            return Err(StoreError::DuplicateIdentity(id));
        }

        debug!("register dataset {id} at {:?}", entry.path.display());
        self.datasets.insert(id, entry);

        Ok(())
    }

    /// Set validity state of a dataset.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::UnknownIdentity`] if dataset is not registered.
    pub fn update_validity(&mut self, id: &DatasetId, validity: Validity) -> Result<()> {
        self.entry_mut(id)?.validity = validity;
        Ok(())
    }

    /// Replace tags of a dataset.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::UnknownIdentity`] if dataset is not registered.
    pub fn set_tags(&mut self, id: &DatasetId, tags: BTreeSet<String>) -> Result<()> {
        self.entry_mut(id)?.tags = tags;
        Ok(())
    }

    /// Return dataset to unvalidated state.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::UnknownIdentity`] if dataset is not registered.
    pub fn reset(&mut self, id: &DatasetId) -> Result<()> {
        self.update_validity(id, Validity::Unvalidated)
    }

    /// Remove dataset whose backing file no longer exists.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::UnknownIdentity`] if dataset is not registered.
    /// - Return [`StoreError::NotDangling`] if backing file still exists
    ///   relative to repository root.
    pub fn remove_dangling(&mut self, id: &DatasetId, root: impl AsRef<Path>) -> Result<DatasetEntry> {
        let entry = self.get(id).ok_or_else(|| StoreError::UnknownIdentity(id.clone()))?;
        if !entry.is_dangling(root) {
            return Err(StoreError::NotDangling {
                id: id.clone(),
                path: entry.path.clone(),
            });
        }

        info!("remove dangling dataset {id}");
        self.datasets
            .remove(id)
            .ok_or_else(|| StoreError::UnknownIdentity(id.clone()))
    }

    pub fn get(&self, id: &DatasetId) -> Option<&DatasetEntry> {
        self.datasets.get(id)
    }

    pub fn contains(&self, id: &DatasetId) -> bool {
        self.datasets.contains_key(id)
    }

    /// Find identity that owns a path.
    pub fn find_by_path(&self, path: impl AsRef<Path>) -> Option<&DatasetId> {
        self.datasets
            .iter()
            .find(|(_, entry)| entry.path == path.as_ref())
            .map(|(id, _)| id)
    }

    /// Iterate over entries in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&DatasetId, &DatasetEntry)> {
        self.datasets.iter()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Select identities of entries matching a selection.
    ///
    /// Pure filter, never mutates the database.
    pub fn select(&self, selection: &Selection) -> Vec<DatasetId> {
        self.datasets
            .iter()
            .filter(|(_, entry)| selection.matches(entry))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Count entries per validity state.
    ///
    /// Every state is present in the result, even with a zero count.
    pub fn counts(&self) -> BTreeMap<Validity, usize> {
        let mut counts = Validity::ALL
            .into_iter()
            .map(|validity| (validity, 0))
            .collect::<BTreeMap<_, _>>();
        for entry in self.datasets.values() {
            *counts.entry(entry.validity).or_default() += 1;
        }

        counts
    }

    fn entry_mut(&mut self, id: &DatasetId) -> Result<&mut DatasetEntry> {
        self.datasets
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownIdentity(id.clone()))
    }
}

/// Filter over database entries.
///
/// Each listing matches if any of its items matches, or if it is empty. An
/// entry is selected when every listing matches.
#[derive(Debug, Default, Clone)]
pub struct Selection {
    /// Glob patterns that the area name must match.
    pub areas: Vec<Pattern>,

    /// Tags that the entry must carry.
    pub tags: Vec<String>,

    /// Validity states the entry must be in.
    pub validity: Vec<Validity>,
}

impl Selection {
    /// Select everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Construct selection from area glob patterns and tags.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::BadAreaPattern`] if a pattern is invalid.
    pub fn try_new(
        areas: impl IntoIterator<Item = impl AsRef<str>>,
        tags: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self> {
        let areas = areas
            .into_iter()
            .map(|area| {
                Pattern::new(area.as_ref()).map_err(|err| StoreError::BadAreaPattern {
                    source: err,
                    pattern: area.as_ref().to_owned(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            areas,
            tags: tags.into_iter().map(Into::into).collect(),
            validity: Vec::new(),
        })
    }

    /// Restrict selection to validity states.
    pub fn with_validity(mut self, validity: impl IntoIterator<Item = Validity>) -> Self {
        self.validity.extend(validity);
        self
    }

    /// Check if entry matches selection.
    pub fn matches(&self, entry: &DatasetEntry) -> bool {
        let area_matches =
            self.areas.is_empty() || self.areas.iter().any(|area| area.matches(&entry.area));
        let tag_matches = self.tags.is_empty() || self.tags.iter().any(|tag| entry.tags.contains(tag));
        let validity_matches = self.validity.is_empty() || self.validity.contains(&entry.validity);

        area_matches && tag_matches && validity_matches
    }
}

/// Reason a database file is considered corrupt.
#[derive(Debug, thiserror::Error)]
pub enum Corruption {
    /// File is not a well-formed database.
    #[error(transparent)]
    Parse(#[from] toml::de::Error),

    /// Two entries share a dataset path.
    #[error("{first} and {second} share dataset path {:?}", path.display())]
    SharedPath {
        path: PathBuf,
        first: DatasetId,
        second: DatasetId,
    },
}

/// All possible error types for dataset database interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database file cannot be read.
    #[error("failed to read database at {:?}", path.display())]
    ReadDatabase {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Database file cannot be written.
    #[error("failed to write database at {:?}", path.display())]
    WriteDatabase {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Database file is corrupt.
    #[error("database at {:?} is corrupt", path.display())]
    CorruptDatabase {
        #[source]
        source: Corruption,
        path: PathBuf,
    },

    /// Database cannot be serialized.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Path already registered under a different identity.
    #[error("dataset path {:?} is already registered as {owner}", path.display())]
    DuplicatePath { path: PathBuf, owner: DatasetId },

    /// Identity already registered.
    #[error("dataset {0} is already registered")]
    DuplicateIdentity(DatasetId),

    /// Identity not registered.
    #[error("dataset {0} is not registered")]
    UnknownIdentity(DatasetId),

    /// Refused to remove dataset whose file still exists.
    #[error("dataset {id} still has a file at {:?}", path.display())]
    NotDangling { id: DatasetId, path: PathBuf },

    /// Area filter is not a valid glob pattern.
    #[error("invalid area pattern {pattern:?}")]
    BadAreaPattern {
        #[source]
        source: glob::PatternError,
        pattern: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
