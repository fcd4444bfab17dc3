// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Repository configuration layout.
//!
//! Every trace repository carries a `tracerepo.toml` file at its top-level.
//! Its presence marks the directory as a repository, and its contents tell
//! tracerepo where datasets live, where exports go, and which attribute
//! values the trace schema should accept. File I/O is left to the caller to
//! figure out.
//!
//! # General Layout
//!
//! The configuration file is split into three optional tables:
//!
//! - `[layout]` names the data directory, export directory, database file,
//!   and the drop directory for unsorted datasets, relative to the
//!   repository root.
//! - `[validation]` bounds how many datasets are validated at once, and how
//!   long a single dataset may take.
//! - `[metadata]` lists the operators, certainty values, data sources,
//!   scales, and lineament identifier prefixes that trace attributes must
//!   match.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
    thread::available_parallelism,
    time::Duration,
};

/// Name of the configuration file at the top-level of every repository.
pub const CONFIG_FILE: &str = "tracerepo.toml";

/// Repository configuration.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Directory layout of the repository.
    pub layout: Layout,

    /// Validation run settings.
    pub validation: ValidationSettings,

    /// Accepted attribute values for trace datasets.
    pub metadata: Metadata,
}

impl FromStr for RepoConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: RepoConfig = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on export directory field.
        config.layout.exported = ExportDir::new(
            shellexpand::full(config.layout.exported.to_string().as_str())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned(),
        );

        Ok(config)
    }
}

impl Display for RepoConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Directory layout of a repository.
///
/// Relative paths are resolved against the repository root.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Layout {
    /// Directory holding per-area dataset trees.
    pub data: PathBuf,

    /// Directory that receives exported datasets.
    pub exported: ExportDir,

    /// Dataset database file.
    pub database: PathBuf,

    /// Drop directory for datasets waiting to be sorted into the data tree.
    pub unorganized: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            data: PathBuf::from("data"),
            exported: ExportDir::new("exported"),
            database: PathBuf::from("database.toml"),
            unorganized: PathBuf::from("unorganized"),
        }
    }
}

/// Directory that exported datasets are written into.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ExportDir(PathBuf);

impl ExportDir {
    /// Construct new export directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Treat export directory as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }

    /// Resolve export directory against repository root.
    ///
    /// Absolute export directories are returned as-is.
    pub fn resolve(&self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(&self.0)
    }
}

impl Display for ExportDir {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_path().to_string_lossy().as_ref())
    }
}

/// Settings for validation runs.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Number of datasets to validate at once. Zero means one per core.
    pub jobs: usize,

    /// Seconds a single dataset may take before it is marked critical.
    pub timeout_secs: u64,
}

impl ValidationSettings {
    /// Effective number of concurrent validations, never zero.
    pub fn jobs(&self) -> usize {
        match self.jobs {
            0 => available_parallelism().map(usize::from).unwrap_or(1),
            jobs => jobs,
        }
    }

    /// Per-dataset validation time budget.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            jobs: 0,
            timeout_secs: 120,
        }
    }
}

/// Accepted attribute values of trace datasets.
///
/// An empty listing disables the check that uses it.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Metadata {
    /// People allowed to appear in the `Operator` column.
    pub operators: Vec<String>,

    /// Values allowed in the `Certainty` column.
    pub certainty: Vec<String>,

    /// Prefixes that every `Lineament_ID` must start with.
    pub lineament_id_prefixes: Vec<String>,

    /// Known data sources and their combination order.
    pub data_source: NamedPriorities,

    /// Known scales and their combination order.
    pub scale: NamedPriorities,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            operators: Vec::new(),
            certainty: vec!["certain".into(), "probable".into(), "uncertain".into()],
            lineament_id_prefixes: Vec::new(),
            data_source: NamedPriorities {
                separator: "+".into(),
                order: BTreeMap::from([
                    ("LiDAR".into(), 1),
                    ("Mag".into(), 2),
                    ("EM".into(), 3),
                ]),
            },
            scale: NamedPriorities::default(),
        }
    }
}

/// Set of named values that may be combined in a fixed order.
///
/// A column value such as `LiDAR+Mag` is split by the separator, and each
/// part must be listed with a strictly increasing priority.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NamedPriorities {
    /// Separator between combined values.
    pub separator: String,

    /// Priority of each named value. Lower comes first.
    pub order: BTreeMap<String, u32>,
}

impl Default for NamedPriorities {
    fn default() -> Self {
        Self {
            separator: "+".into(),
            order: BTreeMap::new(),
        }
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}
