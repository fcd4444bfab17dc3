// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dataset validation.
//!
//! Classify a single dataset file against its schema contract. Validation
//! never fails as such. Anything that goes wrong while loading the dataset is
//! folded into the report as a critical error.

use crate::{
    dataset::DatasetSource,
    schema::{SchemaContract, Violation},
    store::Validity,
};

use std::{collections::BTreeSet, error::Error, path::Path};
use tracing::{debug, instrument};

/// Outcome of validating one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Resulting validity state.
    pub validity: Validity,

    /// Every failing check, empty unless invalid.
    pub violations: Vec<Violation>,

    /// Number of rows in the dataset.
    pub rows: usize,

    /// Tags derived from the contract.
    pub tags: BTreeSet<String>,

    /// Raw load failure, only present for critical errors.
    pub error: Option<String>,
}

impl ValidationReport {
    /// Construct report of a dataset that could not be loaded.
    pub fn critical(message: impl Into<String>) -> Self {
        Self {
            validity: Validity::CriticalError,
            violations: Vec::new(),
            rows: 0,
            tags: BTreeSet::new(),
            error: Some(message.into()),
        }
    }

    /// Short reason for a non-valid outcome.
    pub fn reason(&self) -> String {
        match self.validity {
            Validity::CriticalError => self.error.clone().unwrap_or_default(),
            Validity::Empty => "dataset has no rows".into(),
            Validity::Invalid => self
                .violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
            Validity::Valid | Validity::Unvalidated => String::new(),
        }
    }
}

/// Validate dataset at target path against schema contract.
///
/// Load failures yield `critical_error`, datasets without rows yield `empty`,
/// any failing check yields `invalid`, and everything else is `valid`.
#[instrument(skip(source, path, contract), level = "debug")]
pub fn validate(
    source: &impl DatasetSource,
    path: impl AsRef<Path>,
    contract: &SchemaContract,
) -> ValidationReport {
    let path = path.as_ref();
    let dataset = match source.load(path) {
        Ok(dataset) => dataset,
        Err(err) => {
            debug!("dataset {:?} failed to load", path.display());
            return ValidationReport::critical(error_chain(&err));
        }
    };

    let tags = BTreeSet::from([contract.family.tag().to_owned()]);
    if dataset.is_empty() {
        return ValidationReport {
            validity: Validity::Empty,
            violations: Vec::new(),
            rows: 0,
            tags,
            error: None,
        };
    }

    let violations = source.check(&dataset, contract);
    let validity = if violations.is_empty() {
        Validity::Valid
    } else {
        Validity::Invalid
    };
    debug!(
        "dataset {:?} is {validity} with {} violations",
        path.display(),
        violations.len()
    );

    ValidationReport {
        validity,
        violations,
        rows: dataset.rows(),
        tags,
        error: None,
    }
}

/// Render error with all of its sources on one line.
pub(crate) fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}
