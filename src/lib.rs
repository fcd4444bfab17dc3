// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Data management for fracture and lineament trace datasets.
//!
//! Tracerepo looks after a __trace repository__: a directory tree of GeoJSON
//! datasets grouped by area, plus a small database recording whether each
//! dataset satisfies the attribute schema expected of trace and target area
//! data.
//!
//! # Workflow
//!
//! 1. Sort datasets dropped into the unorganized directory into the data
//!    tree, see [`organize`].
//! 2. Discover dataset files that follow the naming convention
//!    `<name>_traces.geojson` or `<name>_area.geojson`.
//! 3. Validate them against their [`schema::SchemaContract`], recording a
//!    [`store::Validity`] state per dataset.
//! 4. Export valid datasets into other formats for GIS tooling.
//!
//! See [`repository::Repository`] for the entry point.

pub mod config;
pub mod dataset;
pub mod discover;
pub mod export;
pub mod format;
pub mod organize;
pub mod path;
pub mod repository;
pub mod schema;
pub mod store;
pub mod validate;

pub use repository::{CycleReport, Repository};
pub use store::{Database, DatasetEntry, DatasetId, Selection, Validity};
