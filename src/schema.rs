// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dataset schema contracts.
//!
//! A __schema contract__ fixes which columns a dataset must carry, what type
//! each column coerces to, whether it may hold nulls or duplicates, and which
//! element-wise checks its values must pass. Trace datasets and target area
//! datasets each have their own contract. The trace contract is parameterised
//! by the repository [`Metadata`], so that, e.g., the allowed operators come
//! from `tracerepo.toml`.
//!
//! Checking a dataset never stops at the first problem. Every failing check
//! is reported, aggregated per column and kind of failure so that a column
//! that is wrong on every row yields one violation instead of thousands.
//!
//! # See Also
//!
//! - [`checks`]

pub mod checks;

use crate::{
    config::Metadata,
    dataset::{geometry_name, parse_geometry, Dataset},
    schema::checks::{parse_date, Cell, ColumnCheck},
};

use geo::Geometry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt::{Display, Formatter, Result as FmtResult},
};

pub const GEOMETRY_COLUMN: &str = "geometry";
pub const VALIDATION_ERRORS_COLUMN: &str = "VALIDATION_ERRORS";
pub const DIP_COLUMN: &str = "DIP";
pub const DIP_DIR_COLUMN: &str = "DIP_DIR";
pub const DATA_SOURCE_COLUMN: &str = "Data_Source";
pub const DATE_COLUMN: &str = "Date";
pub const OPERATOR_COLUMN: &str = "Operator";
pub const SCALE_COLUMN: &str = "Scale";
pub const CERTAINTY_COLUMN: &str = "Certainty";
pub const LINEAMENT_ID_COLUMN: &str = "Lineament_ID";

const ROW_SAMPLE: usize = 5;

/// Geometry family of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryFamily {
    /// Fracture or lineament traces drawn as lines.
    Traces,

    /// Target area that the traces were digitized within.
    Area,
}

impl GeometryFamily {
    /// Identify family from dataset file name suffix.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
        if stem.ends_with("_traces") {
            Some(Self::Traces)
        } else if stem.ends_with("_area") {
            Some(Self::Area)
        } else {
            None
        }
    }

    /// Tag given to datasets of this family.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Area => "area",
        }
    }

    /// Check if geometry belongs to this family.
    pub fn accepts(&self, geometry: &Geometry<f64>) -> bool {
        match self {
            Self::Traces => matches!(
                geometry,
                Geometry::LineString(_) | Geometry::MultiLineString(_)
            ),
            Self::Area => matches!(geometry, Geometry::Polygon(_) | Geometry::MultiPolygon(_)),
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            Self::Traces => "LineString or MultiLineString",
            Self::Area => "Polygon or MultiPolygon",
        }
    }
}

impl Display for GeometryFamily {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.tag())
    }
}

/// Type that column values coerce to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Any scalar, read as text.
    Text,

    /// Text or list of texts.
    TextList,

    /// Number, or text holding a number.
    Float,

    /// Text holding a date or date-time.
    Date,
}

impl ColumnKind {
    fn coerce(&self, value: &Value) -> Coerced {
        match (self, value) {
            (_, Value::Null) => Coerced::Null,
            (Self::Text, Value::String(text)) => Coerced::Cell(Cell::Text(text.clone())),
            (Self::Text, Value::Number(number)) => Coerced::Cell(Cell::Text(number.to_string())),
            (Self::Text, Value::Bool(flag)) => Coerced::Cell(Cell::Text(flag.to_string())),
            (Self::TextList, Value::String(text)) => Coerced::Cell(Cell::TextList(vec![text.clone()])),
            (Self::TextList, Value::Array(values)) => values
                .iter()
                .map(|value| value.as_str().map(str::to_owned))
                .collect::<Option<Vec<_>>>()
                .map_or(Coerced::Mismatch, |texts| Coerced::Cell(Cell::TextList(texts))),
            (Self::Float | Self::Date, Value::String(text)) if text.trim().is_empty() => {
                Coerced::Null
            }
            (Self::Float, Value::Number(number)) => number
                .as_f64()
                .map_or(Coerced::Mismatch, |value| Coerced::Cell(Cell::Float(value))),
            (Self::Float, Value::String(text)) => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map_or(Coerced::Mismatch, |value| Coerced::Cell(Cell::Float(value))),
            (Self::Date, Value::String(text)) => {
                parse_date(text).map_or(Coerced::Mismatch, |date| Coerced::Cell(Cell::Date(date)))
            }
            _ => Coerced::Mismatch,
        }
    }
}

impl Display for ColumnKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Text => "text",
            Self::TextList => "text list",
            Self::Float => "float",
            Self::Date => "date",
        })
    }
}

enum Coerced {
    Null,
    Mismatch,
    Cell(Cell),
}

/// Contract for a single attribute column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub required: bool,
    pub nullable: bool,
    pub unique: bool,
    pub checks: Vec<ColumnCheck>,
}

impl ColumnSpec {
    /// Construct optional, nullable column without checks.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            nullable: true,
            unique: false,
            checks: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn check(mut self, check: ColumnCheck) -> Self {
        self.checks.push(check);
        self
    }

    /// Add check only when `enabled` holds.
    pub fn check_if(self, enabled: bool, check: impl FnOnce() -> ColumnCheck) -> Self {
        if enabled {
            self.check(check())
        } else {
            self
        }
    }
}

/// Schema contract of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaContract {
    /// Geometry family every row's geometry must belong to.
    pub family: GeometryFamily,

    /// Attribute columns.
    pub columns: Vec<ColumnSpec>,
}

impl SchemaContract {
    /// Contract for given geometry family.
    pub fn for_family(family: GeometryFamily, metadata: &Metadata) -> Self {
        match family {
            GeometryFamily::Traces => Self::traces(metadata),
            GeometryFamily::Area => Self::area(),
        }
    }

    /// Contract for trace datasets.
    pub fn traces(metadata: &Metadata) -> Self {
        let columns = vec![
            ColumnSpec::new(VALIDATION_ERRORS_COLUMN, ColumnKind::TextList),
            ColumnSpec::new(DIP_COLUMN, ColumnKind::Float).check(ColumnCheck::InRange {
                min: 0.0,
                max: 90.0,
            }),
            ColumnSpec::new(DIP_DIR_COLUMN, ColumnKind::Float).check(ColumnCheck::InRange {
                min: 0.0,
                max: 360.0,
            }),
            ColumnSpec::new(DATA_SOURCE_COLUMN, ColumnKind::Text)
                .required()
                .not_null()
                .check_if(!metadata.data_source.order.is_empty(), || {
                    ColumnCheck::NamedPriority(metadata.data_source.clone())
                }),
            ColumnSpec::new(DATE_COLUMN, ColumnKind::Date)
                .required()
                .not_null()
                .check(ColumnCheck::NotInFuture),
            ColumnSpec::new(OPERATOR_COLUMN, ColumnKind::Text)
                .required()
                .not_null()
                .check_if(!metadata.operators.is_empty(), || {
                    ColumnCheck::OneOf(metadata.operators.clone())
                }),
            ColumnSpec::new(SCALE_COLUMN, ColumnKind::Text)
                .not_null()
                .check_if(!metadata.scale.order.is_empty(), || {
                    ColumnCheck::NamedPriority(metadata.scale.clone())
                }),
            ColumnSpec::new(CERTAINTY_COLUMN, ColumnKind::Text)
                .required()
                .not_null()
                .check_if(!metadata.certainty.is_empty(), || {
                    ColumnCheck::OneOf(metadata.certainty.clone())
                }),
            ColumnSpec::new(LINEAMENT_ID_COLUMN, ColumnKind::Text)
                .not_null()
                .unique()
                .check_if(!metadata.lineament_id_prefixes.is_empty(), || {
                    ColumnCheck::Prefixed(metadata.lineament_id_prefixes.clone())
                }),
        ];

        Self {
            family: GeometryFamily::Traces,
            columns,
        }
    }

    /// Contract for target area datasets.
    pub fn area() -> Self {
        Self {
            family: GeometryFamily::Area,
            columns: Vec::new(),
        }
    }

    /// Check dataset against contract.
    ///
    /// Returns every violation found. An empty listing means the dataset
    /// satisfies the contract.
    pub fn check(&self, dataset: &Dataset) -> Vec<Violation> {
        let mut tally = Tally::default();
        self.check_geometry(dataset, &mut tally);
        for column in &self.columns {
            check_column(column, dataset, &mut tally);
        }

        tally.into_violations()
    }

    fn check_geometry(&self, dataset: &Dataset, tally: &mut Tally) {
        if !dataset.features.iter().any(|feature| feature.geometry.is_some()) {
            tally.missing(GEOMETRY_COLUMN);
            return;
        }

        for (row, feature) in dataset.features.iter().enumerate() {
            let geometry = match &feature.geometry {
                None | Some(Value::Null) => {
                    tally.hit(GEOMETRY_COLUMN, ViolationKind::Null, row, "geometry is null".into());
                    continue;
                }
                Some(raw) => match parse_geometry(raw) {
                    Ok(geometry) => geometry,
                    Err(err) => {
                        tally.hit(
                            GEOMETRY_COLUMN,
                            ViolationKind::Geometry,
                            row,
                            format!("geometry cannot be parsed: {err}"),
                        );
                        continue;
                    }
                },
            };

            if !self.family.accepts(&geometry) {
                tally.hit(
                    GEOMETRY_COLUMN,
                    ViolationKind::Geometry,
                    row,
                    format!(
                        "expected {}, found {}",
                        self.family.expected(),
                        geometry_name(&geometry)
                    ),
                );
            }
        }
    }
}

fn check_column(column: &ColumnSpec, dataset: &Dataset, tally: &mut Tally) {
    let present = dataset
        .features
        .iter()
        .any(|feature| feature.properties.contains_key(&column.name));
    if !present {
        if column.required {
            tally.missing(&column.name);
        }
        return;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    for (row, feature) in dataset.features.iter().enumerate() {
        let raw = feature.properties.get(&column.name).unwrap_or(&Value::Null);
        let cell = match column.kind.coerce(raw) {
            Coerced::Null => {
                if !column.nullable {
                    tally.hit(&column.name, ViolationKind::Null, row, "value is null".into());
                }
                continue;
            }
            Coerced::Mismatch => {
                tally.hit(
                    &column.name,
                    ViolationKind::Type,
                    row,
                    format!("cannot coerce {raw} to {}", column.kind),
                );
                continue;
            }
            Coerced::Cell(cell) => cell,
        };

        for check in &column.checks {
            if let Err(detail) = check.apply(&cell) {
                tally.hit(&column.name, ViolationKind::Value, row, detail);
            }
        }

        if column.unique {
            match seen.entry(cell.to_string()) {
                Entry::Occupied(first) => tally.hit(
                    &column.name,
                    ViolationKind::Duplicate,
                    row,
                    format!("value {cell} already used in row {}", first.get()),
                ),
                Entry::Vacant(slot) => {
                    slot.insert(row);
                }
            }
        }
    }
}

/// Kind of schema violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViolationKind {
    /// Required column is absent.
    MissingColumn,

    /// Geometry is malformed or of the wrong family.
    Geometry,

    /// Value cannot be coerced to declared type.
    Type,

    /// Value is null in a non-nullable column.
    Null,

    /// Value fails an element-wise check.
    Value,

    /// Value repeats in a unique column.
    Duplicate,
}

impl Display for ViolationKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::MissingColumn => "missing column",
            Self::Geometry => "geometry",
            Self::Type => "type",
            Self::Null => "null",
            Self::Value => "value",
            Self::Duplicate => "duplicate",
        })
    }
}

/// Failed schema check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Column that failed the check.
    pub column: String,

    /// Kind of failure.
    pub kind: ViolationKind,

    /// Human-readable description.
    pub message: String,
}

impl Display for Violation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{} ({}): {}", self.column, self.kind, self.message)
    }
}

/// Aggregate of failing rows per column and kind, in discovery order.
#[derive(Default)]
struct Tally {
    groups: Vec<(String, ViolationKind, Vec<(usize, String)>)>,
}

impl Tally {
    fn missing(&mut self, column: &str) {
        self.groups.push((column.into(), ViolationKind::MissingColumn, Vec::new()));
    }

    fn hit(&mut self, column: &str, kind: ViolationKind, row: usize, detail: String) {
        match self
            .groups
            .iter_mut()
            .find(|(name, group_kind, _)| name == column && *group_kind == kind)
        {
            Some((_, _, hits)) => hits.push((row, detail)),
            None => self.groups.push((column.into(), kind, vec![(row, detail)])),
        }
    }

    fn into_violations(self) -> Vec<Violation> {
        self.groups
            .into_iter()
            .map(|(column, kind, hits)| {
                let message = match hits.as_slice() {
                    [] => format!("required column {column:?} is missing"),
                    [(row, detail)] => format!("{detail} (row {row})"),
                    [(_, detail), ..] => {
                        let rows = hits
                            .iter()
                            .take(ROW_SAMPLE)
                            .map(|(row, _)| row.to_string())
                            .collect::<Vec<_>>()
                            .join(", ");
                        let more = hits.len().saturating_sub(ROW_SAMPLE);
                        if more > 0 {
                            format!("{detail} ({} rows: {rows}, and {more} more)", hits.len())
                        } else {
                            format!("{detail} ({} rows: {rows})", hits.len())
                        }
                    }
                };

                Violation {
                    column,
                    kind,
                    message,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn traces(features: Value) -> Dataset {
        let text = json!({ "type": "FeatureCollection", "features": features }).to_string();
        Dataset::from_geojson(&text).unwrap()
    }

    fn line() -> Value {
        json!({ "type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]] })
    }

    fn valid_properties(id: &str) -> Value {
        json!({
            "DIP": 45.0,
            "DIP_DIR": "120",
            "Data_Source": "LiDAR+Mag",
            "Date": "2021-06-15",
            "Operator": "Nikolas Ovaskainen",
            "Certainty": "certain",
            "Lineament_ID": id,
        })
    }

    fn metadata() -> Metadata {
        Metadata {
            operators: vec!["Nikolas Ovaskainen".into()],
            lineament_id_prefixes: vec!["SV".into()],
            ..Metadata::default()
        }
    }

    #[test]
    fn conforming_traces_pass() {
        let dataset = traces(json!([
            { "type": "Feature", "geometry": line(), "properties": valid_properties("SV1") },
            { "type": "Feature", "geometry": line(), "properties": valid_properties("SV2") },
        ]));
        assert_eq!(SchemaContract::traces(&metadata()).check(&dataset), vec![]);
    }

    #[test]
    fn missing_required_column() {
        let mut properties = valid_properties("SV1");
        properties.as_object_mut().unwrap().remove("Operator");
        let dataset = traces(json!([{ "type": "Feature", "geometry": line(), "properties": properties }]));

        let result = SchemaContract::traces(&metadata()).check(&dataset);
        let expect = vec![Violation {
            column: "Operator".into(),
            kind: ViolationKind::MissingColumn,
            message: "required column \"Operator\" is missing".into(),
        }];
        assert_eq!(result, expect);
    }

    #[test]
    fn report_every_failing_check() {
        let mut bad = valid_properties("XX1");
        bad["DIP"] = json!(95.0);
        bad["Data_Source"] = json!("Mag+LiDAR");
        bad["Date"] = json!("yesterday");
        let dataset = traces(json!([
            { "type": "Feature", "geometry": line(), "properties": bad },
            {
                "type": "Feature",
                "geometry": { "type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]] },
                "properties": valid_properties("XX1"),
            },
        ]));

        let result = SchemaContract::traces(&metadata())
            .check(&dataset)
            .into_iter()
            .map(|violation| (violation.column, violation.kind))
            .collect::<Vec<_>>();
        let expect = vec![
            ("geometry".to_string(), ViolationKind::Geometry),
            ("DIP".to_string(), ViolationKind::Value),
            ("Data_Source".to_string(), ViolationKind::Value),
            ("Date".to_string(), ViolationKind::Type),
            ("Lineament_ID".to_string(), ViolationKind::Value),
            ("Lineament_ID".to_string(), ViolationKind::Duplicate),
        ];
        assert_eq!(result, expect);
    }

    #[test]
    fn aggregate_failures_per_column() {
        let features = (0..8)
            .map(|row| {
                let mut properties = valid_properties(&format!("SV{row}"));
                properties["Certainty"] = json!("maybe");
                json!({ "type": "Feature", "geometry": line(), "properties": properties })
            })
            .collect::<Vec<_>>();
        let dataset = traces(Value::Array(features));

        let result = SchemaContract::traces(&metadata()).check(&dataset);
        assert_eq!(result.len(), 1);
        assert_eq!(
            result[0].message,
            "value \"maybe\" is not one of [\"certain\", \"probable\", \"uncertain\"] \
             (8 rows: 0, 1, 2, 3, 4, and 3 more)"
        );
    }

    #[test]
    fn null_values_in_non_nullable_columns() {
        let mut properties = valid_properties("SV1");
        properties["Operator"] = Value::Null;
        let dataset = traces(json!([
            { "type": "Feature", "geometry": null, "properties": properties },
        ]));

        let result = SchemaContract::traces(&metadata())
            .check(&dataset)
            .into_iter()
            .map(|violation| (violation.column, violation.kind))
            .collect::<Vec<_>>();
        let expect = vec![
            ("geometry".to_string(), ViolationKind::Null),
            ("Operator".to_string(), ViolationKind::Null),
        ];
        assert_eq!(result, expect);
    }

    #[test]
    fn area_accepts_polygons_only() {
        let dataset = traces(json!([
            {
                "type": "Feature",
                "geometry": { "type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]] },
                "properties": {},
            },
        ]));
        assert_eq!(SchemaContract::area().check(&dataset), vec![]);

        let dataset = traces(json!([{ "type": "Feature", "geometry": line(), "properties": {} }]));
        let result = SchemaContract::area().check(&dataset);
        assert_eq!(result[0].message, "expected Polygon or MultiPolygon, found LineString (row 0)");
    }

    #[test]
    fn family_from_file_name() {
        assert_eq!(GeometryFamily::from_file_name("kb11_traces.geojson"), Some(GeometryFamily::Traces));
        assert_eq!(GeometryFamily::from_file_name("kb11_area.geojson"), Some(GeometryFamily::Area));
        assert_eq!(GeometryFamily::from_file_name("kb11.geojson"), None);
    }
}
