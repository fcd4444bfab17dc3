// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dataset export.
//!
//! Write every valid dataset of a repository into the export directory, one
//! sub-directory per format. The export tree mirrors the data tree, so area
//! grouping is kept:
//!
//! ```text
//! exported/geojsonseq/kb11/20m/kb11_traces.geojsons
//! ```
//!
//! Datasets that are not valid are skipped. A dataset that fails to export
//! is recorded and the rest of the batch carries on.

use crate::{
    dataset::{Dataset, DatasetSource},
    repository::Repository,
    store::{Database, DatasetId, Selection, Validity},
    validate::error_chain,
};

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{remove_dir_all, write},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument, warn};

/// Record separator that starts every GeoJSON text sequence record.
const RECORD_SEPARATOR: char = '\u{1e}';

/// Target file format of an export.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    /// Single GeoJSON feature collection per dataset.
    #[default]
    GeoJson,

    /// GeoJSON text sequence with one feature per record.
    GeoJsonSeq,
}

impl ExportFormat {
    /// Name of format, also used as its export sub-directory.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GeoJson => "geojson",
            Self::GeoJsonSeq => "geojsonseq",
        }
    }

    /// File extension of exported datasets.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::GeoJson => "geojson",
            Self::GeoJsonSeq => "geojsons",
        }
    }

    /// Render dataset in this format.
    ///
    /// # Errors
    ///
    /// - Return [`serde_json::Error`] if dataset cannot be serialized.
    pub fn render(&self, dataset: &Dataset) -> Result<String, serde_json::Error> {
        match self {
            Self::GeoJson => {
                let mut text = serde_json::to_string_pretty(&dataset.to_geojson())?;
                text.push('\n');
                Ok(text)
            }
            Self::GeoJsonSeq => {
                let mut text = String::new();
                for feature in &dataset.features {
                    text.push(RECORD_SEPARATOR);
                    text.push_str(&serde_json::to_string(&feature.to_geojson())?);
                    text.push('\n');
                }
                Ok(text)
            }
        }
    }
}

impl Display for ExportFormat {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.name())
    }
}

impl FromStr for ExportFormat {
    type Err = UnknownFormat;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data {
            "geojson" => Ok(Self::GeoJson),
            "geojsonseq" => Ok(Self::GeoJsonSeq),
            other => Err(UnknownFormat(other.into())),
        }
    }
}

/// Export format name that does not exist.
#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown export format {0:?}, expected geojson or geojsonseq")]
pub struct UnknownFormat(String);

/// What to export and how.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Target format.
    pub format: ExportFormat,

    /// Entries to consider. Only valid ones are written.
    pub selection: Selection,

    /// Remove previous export of the same format first.
    pub overwrite: bool,
}

impl Default for ExportRequest {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            selection: Selection::all(),
            overwrite: true,
        }
    }
}

/// Dataset that could not be exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFailure {
    pub id: DatasetId,
    pub reason: String,
}

/// Summary of an export batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportReport {
    /// Files written, in identity order.
    pub written: Vec<PathBuf>,

    /// Number of selected entries that were not valid.
    pub skipped: usize,

    /// Datasets that failed to export.
    pub failures: Vec<ExportFailure>,
}

impl ExportReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl Display for ExportReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(
            fmt,
            "exported {} datasets, skipped {}, failed {}",
            self.written.len(),
            self.skipped,
            self.failures.len()
        )?;
        for failure in &self.failures {
            writeln!(fmt, "  {}: {}", failure.id, failure.reason)?;
        }

        Ok(())
    }
}

/// Export valid datasets of a repository.
///
/// # Errors
///
/// - Return [`ExportError::DestinationExists`] if format directory already
///   exists and overwriting is off.
/// - Return [`ExportError::ClearDestination`] if previous export cannot be
///   removed.
/// - Return [`ExportError::IndicatifStyleTemplate`] if progress bar style is
///   malformed.
#[instrument(skip(repo, database, request, bar), level = "debug")]
pub fn export<S>(
    repo: &Repository<S>,
    database: &Database,
    request: &ExportRequest,
    bar: ProgressBar,
) -> Result<ExportReport>
where
    S: DatasetSource,
{
    let destination = repo.export_dir().join(request.format.name());
    if destination.exists() {
        if !request.overwrite {
            return Err(ExportError::DestinationExists { path: destination });
        }

        info!("clear previous export at {:?}", destination.display());
        remove_dir_all(&destination).map_err(|err| ExportError::ClearDestination {
            source: err,
            path: destination.clone(),
        })?;
    }

    let selected = database.select(&request.selection);
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);
    bar.set_length(selected.len() as u64);
    bar.set_message(format!("export {}", request.format));

    let mut report = ExportReport::default();
    for id in selected {
        bar.inc(1);
        let Some(entry) = database.get(&id) else {
            continue;
        };
        if entry.validity != Validity::Valid {
            debug!("skip {id}, dataset is {}", entry.validity);
            report.skipped += 1;
            continue;
        }

        let Ok(relative) = entry.path.strip_prefix(&repo.config().layout.data) else {
            warn!("dataset {id} lives outside the data directory");
            report.failures.push(ExportFailure {
                id,
                reason: format!("path {:?} is outside the data directory", entry.path.display()),
            });
            continue;
        };

        let target = destination
            .join(relative)
            .with_extension(request.format.extension());
        match export_one(repo.source(), &repo.root().join(&entry.path), &target, request.format) {
            Ok(()) => report.written.push(target),
            Err(err) => {
                warn!("failed to export {id}: {}", error_chain(&err));
                report.failures.push(ExportFailure {
                    id,
                    reason: error_chain(&err),
                });
            }
        }
    }
    bar.finish_and_clear();
    info!(
        "exported {} datasets to {:?}",
        report.written.len(),
        destination.display()
    );

    Ok(report)
}

fn export_one(
    source: &impl DatasetSource,
    path: &Path,
    target: &Path,
    format: ExportFormat,
) -> std::result::Result<(), ExportWriteFailure> {
    let dataset = source.load(path)?;
    let text = format.render(&dataset)?;

    if let Some(parent) = target.parent() {
        mkdirp::mkdirp(parent).map_err(|err| ExportWriteFailure::Write {
            source: err,
            path: parent.to_path_buf(),
        })?;
    }
    write(target, text).map_err(|err| ExportWriteFailure::Write {
        source: err,
        path: target.to_path_buf(),
    })?;
    debug!("wrote {:?}", target.display());

    Ok(())
}

/// Failure to export a single dataset.
#[derive(Debug, thiserror::Error)]
pub enum ExportWriteFailure {
    /// Dataset cannot be loaded.
    #[error(transparent)]
    Load(#[from] crate::dataset::SourceError),

    /// Dataset cannot be rendered.
    #[error("failed to render dataset")]
    Render(#[from] serde_json::Error),

    /// Exported file cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// All possible error types for exports.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Format directory exists and overwriting is off.
    #[error("export destination {:?} already exists", path.display())]
    DestinationExists { path: PathBuf },

    /// Previous export cannot be removed.
    #[error("failed to clear export destination {:?}", path.display())]
    ClearDestination {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = ExportError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn two_points() -> anyhow::Result<Dataset> {
        let text = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
                    "properties": {"name": "a"}
                },
                {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [3.0, 4.0]},
                    "properties": {"name": "b"}
                }
            ]
        })
        .to_string();

        Ok(Dataset::from_geojson(&text)?)
    }

    #[test]
    fn parse_format_names() {
        assert_eq!("geojsonseq".parse::<ExportFormat>().ok(), Some(ExportFormat::GeoJsonSeq));
        assert!("shapefile".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::default().to_string(), "geojson");
    }

    #[test]
    fn render_text_sequence() -> anyhow::Result<()> {
        let text = ExportFormat::GeoJsonSeq.render(&two_points()?)?;
        let records = text.split(RECORD_SEPARATOR).skip(1).collect::<Vec<_>>();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.ends_with('\n')));

        let first: serde_json::Value = serde_json::from_str(records[0].trim_end())?;
        assert_eq!(first["properties"]["name"], json!("a"));

        Ok(())
    }

    #[test]
    fn render_feature_collection() -> anyhow::Result<()> {
        let dataset = two_points()?;
        let text = ExportFormat::GeoJson.render(&dataset)?;
        let result = Dataset::from_geojson(&text)?;
        assert_eq!(result.rows(), dataset.rows());

        Ok(())
    }
}
