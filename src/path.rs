// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where the current trace repository lives, and how a dataset file
//! inside the data directory maps onto its identity, area, and tags.
//! Also home to the one way tracerepo rewrites files in place.

use crate::{config::CONFIG_FILE, schema::GeometryFamily, store::DatasetId};

use regex::Regex;
use std::{
    collections::BTreeSet,
    io::Write,
    path::{Component, Path, PathBuf},
    sync::LazyLock,
};
use tempfile::NamedTempFile;

/// Extension of dataset files kept in a repository.
pub const DATASET_EXTENSION: &str = "geojson";

static DATASET_FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9_]{2,50}_(traces|area)\.geojson$").expect("dataset file name regex")
});

/// Determine absolute path to repository root.
///
/// Walks up from `start` until a directory containing the repository
/// configuration file is found.
///
/// # Errors
///
/// - Return [`NotARepository`] if no ancestor holds a configuration file.
pub fn find_repo_root(start: impl AsRef<Path>) -> Result<PathBuf> {
    start
        .as_ref()
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| NotARepository {
            start: start.as_ref().to_path_buf(),
        })
}

/// Replace file contents atomically.
///
/// Writes to a temporary file next to the target first, and then renames it
/// over the target. Readers see either the old or the new contents, never a
/// partial write.
///
/// # Errors
///
/// - Return [`std::io::Error`] if temporary file cannot be written or
///   renamed.
pub(crate) fn replace_file(path: &Path, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents.as_ref())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;

    Ok(())
}

/// Location of a dataset file relative to the data directory.
///
/// Everything tracerepo knows about a dataset before loading it comes from
/// where the file sits: `<area>/<tag>/.../<name>_<traces|area>.geojson`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLocation {
    /// Identity of the dataset.
    pub id: DatasetId,

    /// Area that the dataset belongs to.
    pub area: String,

    /// Geometry family named by the file suffix.
    pub family: GeometryFamily,

    /// Family plus every directory between the area and the file.
    pub tags: BTreeSet<String>,
}

impl DatasetLocation {
    /// Interpret a path relative to the data directory.
    ///
    /// Returns `None` when the file name breaks the naming convention, or
    /// when the file is not nested inside an area directory.
    pub fn from_relative(relative: impl AsRef<Path>) -> Option<Self> {
        let relative = relative.as_ref();
        let file_name = relative.file_name()?.to_str()?;
        if !is_dataset_file_name(file_name) {
            return None;
        }

        let dirs = relative
            .parent()?
            .components()
            .map(|component| match component {
                Component::Normal(name) => name.to_str().map(str::to_owned),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        let (area, rest) = dirs.split_first()?;

        let family = GeometryFamily::from_file_name(file_name)?;
        let mut tags = rest.iter().cloned().collect::<BTreeSet<_>>();
        tags.insert(family.tag().to_owned());

        let stem = file_name.strip_suffix(&format!(".{DATASET_EXTENSION}"))?;
        let id = dirs
            .iter()
            .map(String::as_str)
            .chain([stem])
            .collect::<Vec<_>>()
            .join("/");

        Some(Self {
            id: DatasetId::new(id),
            area: area.clone(),
            family,
            tags,
        })
    }
}

/// Check if a file name follows the dataset naming convention.
pub fn is_dataset_file_name(name: &str) -> bool {
    DATASET_FILE_NAME.is_match(name)
}

/// No repository configuration file found in any ancestor directory.
#[derive(Clone, Debug, thiserror::Error)]
#[error("not inside a trace repository (no {CONFIG_FILE} found from {:?})", start.display())]
pub struct NotARepository {
    start: PathBuf,
}

/// Friendly result alias :3
pub type Result<T, E = NotARepository> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[test_case("kb11_traces.geojson", true; "traces file")]
    #[test_case("kb11_area.geojson", true; "area file")]
    #[test_case("KB11_traces.geojson", false; "uppercase name")]
    #[test_case("kb11_traces.shp", false; "wrong extension")]
    #[test_case("kb11.geojson", false; "missing family suffix")]
    #[test_case("_traces.geojson", false; "name too short")]
    #[test]
    fn dataset_file_name_convention(name: &str, expect: bool) {
        assert_eq!(is_dataset_file_name(name), expect);
    }

    #[test]
    fn locate_nested_dataset() {
        let result = DatasetLocation::from_relative("kb11/traces/20m/kb11_traces.geojson");
        let expect = DatasetLocation {
            id: DatasetId::new("kb11/traces/20m/kb11_traces"),
            area: "kb11".into(),
            family: GeometryFamily::Traces,
            tags: BTreeSet::from(["20m".into(), "traces".into()]),
        };
        assert_eq!(result, Some(expect));
    }

    #[test]
    fn reject_dataset_outside_area() {
        assert_eq!(DatasetLocation::from_relative("kb11_traces.geojson"), None);
    }

    #[sealed_test]
    fn find_root_from_nested_directory() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        std::fs::write(root.join(CONFIG_FILE), "")?;
        let nested = root.join("data").join("kb11");
        std::fs::create_dir_all(&nested)?;

        assert_eq!(find_repo_root(&nested)?, root);

        Ok(())
    }

    #[sealed_test]
    fn find_root_outside_repository() -> anyhow::Result<()> {
        let dir = std::env::current_dir()?.join("lonely");
        std::fs::create_dir_all(&dir)?;

        // INVARIANT: Sealed test directories live under the system temp dir,
        // which is never a trace repository itself.
        assert!(find_repo_root(&dir).is_err());

        Ok(())
    }
}
