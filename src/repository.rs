// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Trace repository management.
//!
//! A __trace repository__ is a directory holding a configuration file, a
//! dataset database, and a data directory with one sub-directory per area:
//!
//! ```text
//! repo/
//! ├── tracerepo.toml
//! ├── database.toml
//! ├── data/
//! │   └── kb11/
//! │       ├── kb11_area.geojson
//! │       └── 20m/kb11_traces.geojson
//! └── exported/
//! ```
//!
//! The [`Repository`] ties the pieces together. It discovers datasets,
//! validates them concurrently, and folds the results back into the
//! database. The database itself is passed in and handed back as a value, so
//! loading and persisting it stays with the caller.
//!
//! Validation only ever adds tags to an entry: the directories between area
//! and file, plus the geometry family. Tags written into the database by hand
//! are kept.

use crate::{
    config::{ConfigError, RepoConfig, CONFIG_FILE},
    dataset::{DatasetSource, GeoJsonSource},
    discover::{discover, DiscoverError, Inventory},
    path::DatasetLocation,
    schema::{GeometryFamily, SchemaContract},
    store::{Database, DatasetId, Selection, StoreError, Validity},
    validate::{validate, ValidationReport},
};

use futures::{stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{task::spawn_blocking, time::timeout};
use tracing::{error, info, instrument, warn};

/// Trace repository.
#[derive(Debug)]
pub struct Repository<S = GeoJsonSource> {
    root: PathBuf,
    config: RepoConfig,
    source: Arc<S>,
}

impl Repository {
    /// Initialize new repository at target root.
    ///
    /// Writes default configuration, an empty database, and creates the data
    /// directory.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::AlreadyInitialized`] if root already holds
    ///   a configuration file.
    /// - Return [`RepositoryError::CreateDir`] if a directory cannot be made.
    /// - Return [`RepositoryError::WriteConfig`] if configuration cannot be
    ///   written.
    /// - Return [`RepositoryError::Store`] if database cannot be written.
    #[instrument(skip(root), level = "debug")]
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            return Err(RepositoryError::AlreadyInitialized { path: root });
        }

        let config = RepoConfig::default();
        let data_dir = root.join(&config.layout.data);
        mkdirp::mkdirp(&data_dir).map_err(|err| RepositoryError::CreateDir {
            source: err,
            path: data_dir.clone(),
        })?;

        let content = toml::ser::to_string_pretty(&config).map_err(ConfigError::Serialize)?;
        write(&config_path, content).map_err(|err| RepositoryError::WriteConfig {
            source: err,
            path: config_path.clone(),
        })?;

        let repo = Self::with_config(root, config, GeoJsonSource);
        repo.write_database(&Database::new())?;
        info!("initialized trace repository at {:?}", repo.root.display());

        Ok(repo)
    }

    /// Open existing repository at target root.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::ReadConfig`] if configuration file cannot
    ///   be read.
    /// - Return [`RepositoryError::Config`] if configuration is malformed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(root, GeoJsonSource)
    }
}

impl<S> Repository<S>
where
    S: DatasetSource,
{
    /// Open existing repository with custom dataset source.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::ReadConfig`] if configuration file cannot
    ///   be read.
    /// - Return [`RepositoryError::Config`] if configuration is malformed.
    #[instrument(skip(root, source), level = "debug")]
    pub fn open_with(root: impl Into<PathBuf>, source: S) -> Result<Self> {
        let root = root.into();
        let config_path = root.join(CONFIG_FILE);
        let config = read_to_string(&config_path)
            .map_err(|err| RepositoryError::ReadConfig {
                source: err,
                path: config_path.clone(),
            })?
            .parse::<RepoConfig>()?;

        Ok(Self::with_config(root, config, source))
    }

    /// Construct repository from already loaded configuration.
    pub fn with_config(root: impl Into<PathBuf>, config: RepoConfig, source: S) -> Self {
        Self {
            root: root.into(),
            config,
            source: Arc::new(source),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Absolute path to data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.root.join(&self.config.layout.data)
    }

    /// Absolute path to database file.
    pub fn database_path(&self) -> PathBuf {
        self.root.join(&self.config.layout.database)
    }

    /// Absolute path to export directory.
    pub fn export_dir(&self) -> PathBuf {
        self.config.layout.exported.resolve(&self.root)
    }

    /// Load dataset database.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::Store`] if database is unreadable or
    ///   corrupt.
    pub fn load_database(&self) -> Result<Database> {
        Database::load(self.database_path()).map_err(Into::into)
    }

    /// Persist dataset database.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::Store`] if database cannot be written.
    pub fn write_database(&self, database: &Database) -> Result<()> {
        database.write(self.database_path()).map_err(Into::into)
    }

    /// Location of a registered dataset relative to the data directory.
    pub fn locate(&self, path: impl AsRef<Path>) -> Option<DatasetLocation> {
        let relative = path.as_ref().strip_prefix(&self.config.layout.data).ok()?;
        DatasetLocation::from_relative(relative)
    }

    /// Schema contract for a geometry family under this repository's metadata.
    pub fn contract(&self, family: GeometryFamily) -> SchemaContract {
        SchemaContract::for_family(family, &self.config.metadata)
    }

    /// Discover datasets and register new ones as unvalidated.
    ///
    /// Dangling entries are reported, never removed.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::Discover`] if data directory is
    ///   inaccessible.
    /// - Return [`RepositoryError::Store`] if a new dataset clashes with a
    ///   registered one.
    #[instrument(skip(self, database), level = "debug")]
    pub fn discover(&self, database: &mut Database) -> Result<Inventory> {
        let inventory = discover(&self.root, &self.config.layout.data, database)?;
        for (id, entry) in &inventory.new {
            database.add(id.clone(), entry.clone())?;
        }

        if !inventory.new.is_empty() {
            info!("registered {} new datasets", inventory.new.len());
        }

        Ok(inventory)
    }

    /// Run one discovery and validation cycle.
    ///
    /// New datasets are registered first. Every selected entry that still has
    /// a file is then validated, with at most the configured number of jobs
    /// in flight. A validation that exceeds the configured timeout is marked
    /// critical. Results are applied in identity order once every validation
    /// has finished.
    ///
    /// # Errors
    ///
    /// - Return [`RepositoryError::Discover`] if data directory is
    ///   inaccessible.
    /// - Return [`RepositoryError::Store`] if database cannot be updated.
    /// - Return [`RepositoryError::IndicatifStyleTemplate`] if progress bar
    ///   style is malformed.
    #[instrument(skip(self, database, selection, bar), level = "debug")]
    pub async fn cycle(
        &self,
        database: Database,
        selection: &Selection,
        bar: ProgressBar,
    ) -> Result<(Database, CycleReport)> {
        let mut database = database;
        let inventory = self.discover(&mut database)?;

        let mut targets = Vec::new();
        let mut outcomes = Vec::new();
        for id in database.select(selection) {
            if inventory.dangling.contains(&id) {
                warn!("skip dangling dataset {id}");
                continue;
            }

            let Some(entry) = database.get(&id) else {
                continue;
            };
            match self.locate(&entry.path) {
                Some(location) => {
                    targets.push((id, self.root.join(&entry.path), self.contract(location.family)))
                }
                None => {
                    let message = format!(
                        "dataset path {:?} is not a dataset file inside the data directory",
                        entry.path.display()
                    );
                    outcomes.push((id, ValidationReport::critical(message)));
                }
            }
        }

        info!("validate {} datasets", targets.len());
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_length(targets.len() as u64);
        bar.set_message("validate datasets");

        let limit = self.config.validation.timeout();
        let checked = stream::iter(targets)
            .map(|(id, path, contract)| {
                let source = Arc::clone(&self.source);
                let bar = bar.clone();
                async move {
                    let task = spawn_blocking(move || validate(&*source, path, &contract));
                    let report = match timeout(limit, task).await {
                        Ok(Ok(report)) => report,
                        Ok(Err(err)) => {
                            ValidationReport::critical(format!("validation task failed: {err}"))
                        }
                        Err(_) => ValidationReport::critical(format!(
                            "validation exceeded {}s time limit",
                            limit.as_secs()
                        )),
                    };
                    bar.inc(1);
                    (id, report)
                }
            })
            .buffer_unordered(self.config.validation.jobs())
            .collect::<Vec<_>>()
            .await;
        bar.finish_and_clear();

        outcomes.extend(checked);
        outcomes.sort_by(|(left, _), (right, _)| left.cmp(right));

        for (id, report) in &outcomes {
            database.update_validity(id, report.validity)?;
            // INVARIANT: Keep tags added by hand, only add derived ones.
            let Some(entry) = database.get(id) else {
                continue;
            };
            let mut tags = entry.tags.clone();
            if let Some(location) = self.locate(&entry.path) {
                tags.extend(location.tags);
            }
            tags.extend(report.tags.iter().cloned());
            database.set_tags(id, tags)?;

            if report.validity == Validity::CriticalError {
                error!("dataset {id} is critical: {}", report.reason());
            }
        }

        let report = CycleReport {
            new: inventory.new.into_iter().map(|(id, _)| id).collect(),
            dangling: inventory.dangling,
            counts: database.counts(),
            outcomes,
        };

        Ok((database, report))
    }
}

/// Summary of a discovery and validation cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Datasets registered during this cycle.
    pub new: Vec<DatasetId>,

    /// Registered datasets whose file is missing.
    pub dangling: Vec<DatasetId>,

    /// Validation outcome of every validated dataset in identity order.
    pub outcomes: Vec<(DatasetId, ValidationReport)>,

    /// Entries per validity state after the cycle.
    pub counts: BTreeMap<Validity, usize>,
}

impl CycleReport {
    /// Datasets that could not be loaded.
    pub fn critical(&self) -> Vec<&DatasetId> {
        self.outcomes
            .iter()
            .filter(|(_, report)| report.validity == Validity::CriticalError)
            .map(|(id, _)| id)
            .collect()
    }

    /// Check if any dataset ended up critical.
    pub fn has_failures(&self) -> bool {
        !self.critical().is_empty()
    }
}

impl Display for CycleReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "{:<16}{:>8}", "validity", "datasets")?;
        for (validity, count) in &self.counts {
            writeln!(fmt, "{:<16}{:>8}", validity.as_str(), count)?;
        }

        let failing = self
            .outcomes
            .iter()
            .filter(|(_, report)| report.validity != Validity::Valid)
            .collect::<Vec<_>>();
        if !failing.is_empty() {
            writeln!(fmt)?;
            for (id, report) in failing {
                writeln!(fmt, "{:<16}{id}", report.validity.as_str())?;
                match report.validity {
                    Validity::Invalid => {
                        for violation in &report.violations {
                            writeln!(fmt, "{:<16}  {violation}", "")?;
                        }
                    }
                    _ => writeln!(fmt, "{:<16}  {}", "", report.reason())?,
                }
            }
        }

        for id in &self.dangling {
            writeln!(fmt, "{:<16}{id}", "dangling")?;
        }

        Ok(())
    }
}

/// All possible error types for repository management.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Root already holds a repository.
    #[error("trace repository already exists at {:?}", path.display())]
    AlreadyInitialized { path: PathBuf },

    /// Directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Configuration file cannot be read.
    #[error("failed to read configuration at {:?}", path.display())]
    ReadConfig {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Configuration file cannot be written.
    #[error("failed to write configuration at {:?}", path.display())]
    WriteConfig {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Configuration is malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Database interaction fails.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Dataset discovery fails.
    #[error(transparent)]
    Discover(#[from] DiscoverError),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = RepositoryError> = std::result::Result<T, E>;
