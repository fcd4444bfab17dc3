// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Sorting of new datasets into the data tree.
//!
//! Digitizers drop finished datasets into the __unorganized__ directory
//! (`unorganized/` by default) instead of working out where they belong.
//! Organizing moves each of them into place:
//!
//! - A file whose name matches a registered dataset goes back to that
//!   dataset's recorded path.
//! - Any other file goes to `<data>/<area>/<file>`, where the area is the
//!   part of the file name before its first underscore.
//!
//! Files that break the naming convention stay where they are, and so do
//! files whose destination is already taken. A simulated run only reports
//! the moves it would make.

use crate::{
    dataset::DatasetSource, path::is_dataset_file_name, repository::Repository, store::Database,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_dir, rename},
    path::PathBuf,
};
use tracing::{debug, info, instrument, warn};

/// Planned or completed move of a dataset file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub from: PathBuf,
    pub to: PathBuf,
    pub simulated: bool,
}

impl Display for Move {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "move {:?} to {:?}", self.from.display(), self.to.display())?;
        if self.simulated {
            fmt.write_str(" (simulated)")?;
        }

        Ok(())
    }
}

/// Outcome of organizing the unorganized directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OrganizeReport {
    /// Moves in file name order.
    pub moves: Vec<Move>,

    /// Files left in place, with the reason.
    pub left: Vec<(PathBuf, String)>,
}

impl Display for OrganizeReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for movement in &self.moves {
            writeln!(fmt, "{movement}")?;
        }
        for (path, reason) in &self.left {
            writeln!(fmt, "leave {:?}: {reason}", path.display())?;
        }

        Ok(())
    }
}

/// Move datasets out of the unorganized directory into the data tree.
///
/// A missing unorganized directory means there is nothing to do.
///
/// # Errors
///
/// - Return [`OrganizeError::ReadDir`] if unorganized directory cannot be
///   listed.
/// - Return [`OrganizeError::CreateDir`] if destination directory cannot be
///   made.
/// - Return [`OrganizeError::Move`] if a file cannot be moved.
#[instrument(skip(repo, database), level = "debug")]
pub fn organize<S>(repo: &Repository<S>, database: &Database, simulate: bool) -> Result<OrganizeReport>
where
    S: DatasetSource,
{
    let source_dir = repo.root().join(&repo.config().layout.unorganized);
    let mut report = OrganizeReport::default();
    if !source_dir.is_dir() {
        debug!("no unorganized directory at {:?}", source_dir.display());
        return Ok(report);
    }

    let read_err = |err: std::io::Error| OrganizeError::ReadDir {
        source: err,
        path: source_dir.clone(),
    };
    let mut files = Vec::new();
    for entry in read_dir(&source_dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    for from in files {
        let Some(name) = from.file_name().and_then(|name| name.to_str()) else {
            report.left.push((from, "file name is not valid unicode".into()));
            continue;
        };
        if !is_dataset_file_name(name) {
            warn!("leave {name}, it breaks the dataset naming convention");
            report.left.push((from, "breaks the dataset naming convention".into()));
            continue;
        }

        let registered = database
            .iter()
            .find(|(_, entry)| entry.path.file_name() == from.file_name());
        let to = match registered {
            Some((_, entry)) => repo.root().join(&entry.path),
            None => {
                let area = name.split('_').next().unwrap_or(name);
                repo.data_dir().join(area).join(name)
            }
        };
        if to.exists() {
            warn!("leave {name}, {:?} already exists", to.display());
            report.left.push((from, format!("{:?} already exists", to.display())));
            continue;
        }

        if !simulate {
            if let Some(parent) = to.parent() {
                mkdirp::mkdirp(parent).map_err(|err| OrganizeError::CreateDir {
                    source: err,
                    path: parent.to_path_buf(),
                })?;
            }
            rename(&from, &to).map_err(|err| OrganizeError::Move {
                source: err,
                from: from.clone(),
                to: to.clone(),
            })?;
        }

        report.moves.push(Move {
            from,
            to,
            simulated: simulate,
        });
    }

    if !simulate {
        info!("organized {} datasets", report.moves.len());
    }

    Ok(report)
}

/// All possible error types for organizing datasets.
#[derive(Debug, thiserror::Error)]
pub enum OrganizeError {
    /// Unorganized directory cannot be listed.
    #[error("failed to list {:?}", path.display())]
    ReadDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Destination directory cannot be made.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Dataset file cannot be moved.
    #[error("failed to move {:?} to {:?}", from.display(), to.display())]
    Move {
        #[source]
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = OrganizeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RepoConfig,
        dataset::GeoJsonSource,
        store::{DatasetEntry, DatasetId},
    };
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, write};
    use tempfile::TempDir;

    fn scratch() -> anyhow::Result<(TempDir, Repository)> {
        let dir = TempDir::new()?;
        let repo = Repository::with_config(dir.path(), RepoConfig::default(), GeoJsonSource);
        create_dir_all(dir.path().join("unorganized"))?;
        for name in ["kb11_traces.geojson", "kb7_area.geojson", "notes.txt"] {
            write(dir.path().join("unorganized").join(name), "{}")?;
        }

        Ok((dir, repo))
    }

    #[test]
    fn simulated_run_moves_nothing() -> anyhow::Result<()> {
        let (dir, repo) = scratch()?;
        let report = organize(&repo, &Database::new(), true)?;

        let expect = vec![
            Move {
                from: dir.path().join("unorganized/kb11_traces.geojson"),
                to: dir.path().join("data/kb11/kb11_traces.geojson"),
                simulated: true,
            },
            Move {
                from: dir.path().join("unorganized/kb7_area.geojson"),
                to: dir.path().join("data/kb7/kb7_area.geojson"),
                simulated: true,
            },
        ];
        assert_eq!(report.moves, expect);
        assert_eq!(report.left.len(), 1);
        assert!(dir.path().join("unorganized/kb11_traces.geojson").is_file());
        assert!(!dir.path().join("data").exists());

        Ok(())
    }

    #[test]
    fn move_into_registered_or_area_path() -> anyhow::Result<()> {
        let (dir, repo) = scratch()?;
        let mut database = Database::new();
        database.add(
            DatasetId::new("kb11/20m/kb11_traces"),
            DatasetEntry::new("kb11", "data/kb11/20m/kb11_traces.geojson"),
        )?;

        let report = organize(&repo, &database, false)?;
        assert_eq!(report.moves.len(), 2);
        assert!(dir.path().join("data/kb11/20m/kb11_traces.geojson").is_file());
        assert!(dir.path().join("data/kb7/kb7_area.geojson").is_file());
        assert!(!dir.path().join("unorganized/kb7_area.geojson").exists());
        assert!(dir.path().join("unorganized/notes.txt").is_file());

        Ok(())
    }

    #[test]
    fn never_overwrite_existing_dataset() -> anyhow::Result<()> {
        let (dir, repo) = scratch()?;
        create_dir_all(dir.path().join("data/kb7"))?;
        write(dir.path().join("data/kb7/kb7_area.geojson"), "keep")?;

        let report = organize(&repo, &Database::new(), false)?;
        assert_eq!(report.moves.len(), 1);
        assert_eq!(report.left.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("data/kb7/kb7_area.geojson"))?,
            "keep"
        );
        assert!(dir.path().join("unorganized/kb7_area.geojson").is_file());

        Ok(())
    }

    #[test]
    fn missing_unorganized_directory() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let repo = Repository::with_config(dir.path(), RepoConfig::default(), GeoJsonSource);
        let report = organize(&repo, &Database::new(), false)?;
        assert_eq!(report, OrganizeReport::default());

        Ok(())
    }
}
