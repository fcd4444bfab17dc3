// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dataset discovery.
//!
//! Scan the data directory of a repository for dataset files that the
//! database does not know about yet, and for database entries whose file has
//! gone missing. Discovery only reads the filesystem. Reconciling the findings
//! with the database is left to the caller.
//!
//! The walk respects `.gitignore` and friends, so scratch copies of datasets
//! can be hidden from discovery the same way they are hidden from Git.

use crate::{
    path::DatasetLocation,
    store::{Database, DatasetEntry, DatasetId},
};

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Findings of a single discovery scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Inventory {
    /// Unregistered dataset files as unvalidated entries, sorted by path.
    pub new: Vec<(DatasetId, DatasetEntry)>,

    /// Registered datasets whose file no longer exists.
    pub dangling: Vec<DatasetId>,

    /// Files under the data directory that break the naming convention.
    pub unrecognized: Vec<PathBuf>,
}

impl Inventory {
    /// Check if scan found nothing worth reporting.
    pub fn is_quiet(&self) -> bool {
        self.new.is_empty() && self.dangling.is_empty()
    }
}

/// Scan data directory for new and dangling datasets.
///
/// The `data_dir` is taken relative to `repo_root`, and every path recorded
/// for new entries is relative to `repo_root` as well.
///
/// # Errors
///
/// - Return [`DiscoverError::RootInaccessible`] if data directory is missing
///   or cannot be walked.
#[instrument(skip(repo_root, data_dir, database), level = "debug")]
pub fn discover(
    repo_root: impl AsRef<Path>,
    data_dir: impl AsRef<Path>,
    database: &Database,
) -> Result<Inventory> {
    let repo_root = repo_root.as_ref();
    let data_root = repo_root.join(data_dir.as_ref());
    if !data_root.is_dir() {
        return Err(DiscoverError::RootInaccessible {
            source: None,
            path: data_root,
        });
    }

    let mut inventory = Inventory::default();
    let walker = WalkBuilder::new(&data_root)
        .hidden(true)
        .require_git(false)
        .sort_by_file_name(|left, right| left.cmp(right))
        .build();

    for entry in walker {
        let entry = entry.map_err(|err| DiscoverError::RootInaccessible {
            source: Some(err),
            path: data_root.clone(),
        })?;
        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }

        // INVARIANT: Walker only yields paths under the data root.
        let Ok(relative) = entry.path().strip_prefix(&data_root) else {
            continue;
        };

        let Some(location) = DatasetLocation::from_relative(relative) else {
            debug!("unrecognized file {:?}", relative.display());
            inventory.unrecognized.push(relative.to_path_buf());
            continue;
        };

        let path = data_dir.as_ref().join(relative);
        if database.find_by_path(&path).is_some() || database.contains(&location.id) {
            continue;
        }

        debug!("new dataset {} at {:?}", location.id, path.display());
        let mut entry = DatasetEntry::new(location.area, path);
        entry.tags = location.tags;
        inventory.new.push((location.id, entry));
    }

    inventory.new.sort_by(|(_, left), (_, right)| left.path.cmp(&right.path));

    for (id, entry) in database.iter() {
        if entry.is_dangling(repo_root) {
            warn!("dataset {id} is missing its file {:?}", entry.path.display());
            inventory.dangling.push(id.clone());
        }
    }

    Ok(inventory)
}

/// All possible error types for dataset discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    /// Data directory is missing or cannot be walked.
    #[error("data directory {:?} is inaccessible", path.display())]
    RootInaccessible {
        #[source]
        source: Option<ignore::Error>,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = DiscoverError> = std::result::Result<T, E>;
