// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Canonical dataset formatting.
//!
//! Datasets arrive from many GIS tools, each with its own idea of key order
//! and indentation. Formatting rewrites every registered dataset as pretty
//! GeoJSON with sorted keys, the same text a `geojson` export produces, so
//! that diffs between revisions only show real changes.
//!
//! Files already in canonical form are left untouched. Datasets that cannot
//! be loaded are recorded and skipped.

use crate::{
    dataset::DatasetSource,
    export::ExportFormat,
    path::replace_file,
    repository::Repository,
    store::{Database, DatasetId, Selection},
    validate::error_chain,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::Path,
};
use tracing::{debug, info, instrument, warn};

/// Summary of a formatting pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormatReport {
    /// Datasets rewritten, in identity order.
    pub formatted: Vec<DatasetId>,

    /// Number of datasets already in canonical form.
    pub unchanged: usize,

    /// Datasets that could not be formatted, with the reason.
    pub failures: Vec<(DatasetId, String)>,
}

impl FormatReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl Display for FormatReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for id in &self.formatted {
            writeln!(fmt, "formatted {id}")?;
        }
        for (id, reason) in &self.failures {
            writeln!(fmt, "failed    {id}: {reason}")?;
        }
        writeln!(
            fmt,
            "{} formatted, {} unchanged, {} failed",
            self.formatted.len(),
            self.unchanged,
            self.failures.len()
        )
    }
}

/// Rewrite selected datasets in canonical GeoJSON form.
///
/// Dangling entries are skipped. Formatting never changes validity.
#[instrument(skip(repo, database, selection), level = "debug")]
pub fn format<S>(repo: &Repository<S>, database: &Database, selection: &Selection) -> FormatReport
where
    S: DatasetSource,
{
    let mut report = FormatReport::default();
    for id in database.select(selection) {
        let Some(entry) = database.get(&id) else {
            continue;
        };
        if entry.is_dangling(repo.root()) {
            debug!("skip dangling dataset {id}");
            continue;
        }

        match format_one(repo.source(), &repo.root().join(&entry.path)) {
            Ok(true) => report.formatted.push(id),
            Ok(false) => report.unchanged += 1,
            Err(err) => {
                let reason = error_chain(&err);
                warn!("failed to format {id}: {reason}");
                report.failures.push((id, reason));
            }
        }
    }
    info!("formatted {} datasets", report.formatted.len());

    report
}

fn format_one(source: &impl DatasetSource, path: &Path) -> Result<bool> {
    let dataset = source.load(path)?;
    let text = ExportFormat::GeoJson.render(&dataset)?;

    let current = read_to_string(path).map_err(|err| FormatError::Write {
        source: err,
        path: path.to_path_buf(),
    })?;
    if current == text {
        return Ok(false);
    }

    replace_file(path, text).map_err(|err| FormatError::Write {
        source: err,
        path: path.to_path_buf(),
    })?;
    debug!("rewrote {:?}", path.display());

    Ok(true)
}

/// Failure to format a single dataset.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// Dataset cannot be loaded.
    #[error(transparent)]
    Load(#[from] crate::dataset::SourceError),

    /// Dataset cannot be rendered.
    #[error("failed to render dataset")]
    Render(#[from] serde_json::Error),

    /// Dataset file cannot be read back or replaced.
    #[error("failed to rewrite {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: std::path::PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = FormatError> = std::result::Result<T, E>;
