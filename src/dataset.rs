// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dataset loading.
//!
//! A __dataset__ is a GeoJSON feature collection holding either the traces
//! or the target area of one survey area. Tracerepo treats it as a table:
//! each feature is a row, the geometry is one column, and every property is
//! another column.
//!
//! The rest of the crate never touches GeoJSON directly. It goes through the
//! [`DatasetSource`] capability, which loads a dataset from a path and checks
//! it against a [`SchemaContract`]. Swapping the source is how tests inject
//! slow or broken loaders.

use crate::schema::{SchemaContract, Violation};

use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use serde_json::{Map, Value};
use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Loaded dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// Rows of the dataset.
    pub features: Vec<Feature>,

    /// Members of the feature collection other than `type` and `features`,
    /// e.g., `name` and `crs`.
    pub foreign_members: Map<String, Value>,
}

impl Dataset {
    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.features.len()
    }

    /// Check if dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Parse dataset from GeoJSON text.
    ///
    /// # Errors
    ///
    /// - Return [`LoadError::Json`] if text is not JSON.
    /// - Return [`LoadError::NotFeatureCollection`] if top-level object is
    ///   not a feature collection.
    /// - Return [`LoadError::BadFeature`] if a feature is malformed beyond
    ///   its geometry.
    pub fn from_geojson(text: &str) -> Result<Self, LoadError> {
        let value: Value = serde_json::from_str(text).map_err(LoadError::Json)?;
        let mut collection = match value {
            Value::Object(collection) => collection,
            other => return Err(LoadError::NotFeatureCollection(json_kind(&other).into())),
        };

        match collection.remove("type") {
            Some(Value::String(kind)) if kind == "FeatureCollection" => {}
            Some(Value::String(kind)) => return Err(LoadError::NotFeatureCollection(kind)),
            _ => return Err(LoadError::NotFeatureCollection("untyped object".into())),
        }

        let features = match collection.remove("features") {
            Some(Value::Array(features)) => features,
            Some(_) | None => {
                return Err(LoadError::NotFeatureCollection(
                    "collection without features array".into(),
                ))
            }
        };

        let features = features
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                Feature::from_json(value).map_err(|reason| LoadError::BadFeature { index, reason })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            features,
            foreign_members: collection,
        })
    }

    /// Convert dataset back into a GeoJSON feature collection.
    pub fn to_geojson(&self) -> Value {
        let mut collection = Map::new();
        collection.insert("type".into(), Value::String("FeatureCollection".into()));
        for (key, value) in &self.foreign_members {
            collection.insert(key.clone(), value.clone());
        }
        collection.insert(
            "features".into(),
            Value::Array(self.features.iter().map(Feature::to_geojson).collect()),
        );

        Value::Object(collection)
    }
}

/// Single row of a dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feature {
    /// Optional feature identifier.
    pub id: Option<Value>,

    /// Raw geometry member. `None` if the member is absent altogether.
    pub geometry: Option<Value>,

    /// Attribute columns of the row.
    pub properties: Map<String, Value>,

    /// Members other than `type`, `id`, `geometry`, and `properties`,
    /// e.g., `bbox`.
    pub foreign_members: Map<String, Value>,
}

impl Feature {
    fn from_json(value: Value) -> Result<Self, String> {
        let mut object = match value {
            Value::Object(object) => object,
            other => return Err(format!("expected feature object, found {}", json_kind(&other))),
        };

        match object.remove("type") {
            Some(Value::String(kind)) if kind == "Feature" => {}
            _ => return Err("feature is missing `\"type\": \"Feature\"`".into()),
        }

        let properties = match object.remove("properties") {
            Some(Value::Object(properties)) => properties,
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                return Err(format!(
                    "expected properties object, found {}",
                    json_kind(&other)
                ))
            }
        };

        Ok(Self {
            id: object.remove("id"),
            geometry: object.remove("geometry"),
            properties,
            foreign_members: object,
        })
    }

    /// Convert feature back into a GeoJSON feature object.
    pub fn to_geojson(&self) -> Value {
        let mut object = Map::new();
        object.insert("type".into(), Value::String("Feature".into()));
        if let Some(id) = &self.id {
            object.insert("id".into(), id.clone());
        }
        for (key, value) in &self.foreign_members {
            object.insert(key.clone(), value.clone());
        }
        object.insert(
            "geometry".into(),
            self.geometry.clone().unwrap_or(Value::Null),
        );
        object.insert("properties".into(), Value::Object(self.properties.clone()));

        Value::Object(object)
    }
}

/// Parse a GeoJSON geometry object into a [`Geometry`].
///
/// # Errors
///
/// - Return [`GeometryError`] if the geometry object is malformed.
pub fn parse_geometry(value: &Value) -> Result<Geometry<f64>, GeometryError> {
    let object = value.as_object().ok_or(GeometryError::NotAnObject)?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(GeometryError::MissingMember("type"))?;

    if kind == "GeometryCollection" {
        let members = object
            .get("geometries")
            .and_then(Value::as_array)
            .ok_or(GeometryError::MissingMember("geometries"))?;
        return Ok(Geometry::GeometryCollection(GeometryCollection(
            members.iter().map(parse_geometry).collect::<Result<_, _>>()?,
        )));
    }

    let coordinates = object
        .get("coordinates")
        .ok_or(GeometryError::MissingMember("coordinates"))?;

    Ok(match kind {
        "Point" => Geometry::Point(Point::from(position(coordinates)?)),
        "MultiPoint" => Geometry::MultiPoint(MultiPoint(
            array(coordinates)?
                .iter()
                .map(|value| position(value).map(Point::from))
                .collect::<Result<_, _>>()?,
        )),
        "LineString" => Geometry::LineString(line(coordinates)?),
        "MultiLineString" => Geometry::MultiLineString(MultiLineString(
            array(coordinates)?
                .iter()
                .map(line)
                .collect::<Result<_, _>>()?,
        )),
        "Polygon" => Geometry::Polygon(polygon(coordinates)?),
        "MultiPolygon" => Geometry::MultiPolygon(MultiPolygon(
            array(coordinates)?
                .iter()
                .map(polygon)
                .collect::<Result<_, _>>()?,
        )),
        other => return Err(GeometryError::UnknownType(other.into())),
    })
}

/// Name of geometry type as it appears in GeoJSON.
pub fn geometry_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::Line(_) | Geometry::LineString(_) => "LineString",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "Polygon",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
    }
}

fn array(value: &Value) -> Result<&Vec<Value>, GeometryError> {
    value.as_array().ok_or(GeometryError::BadCoordinates)
}

fn position(value: &Value) -> Result<Coord<f64>, GeometryError> {
    let numbers = array(value)?;
    if numbers.len() < 2 {
        return Err(GeometryError::BadCoordinates);
    }

    let x = numbers[0].as_f64().ok_or(GeometryError::BadCoordinates)?;
    let y = numbers[1].as_f64().ok_or(GeometryError::BadCoordinates)?;
    if !x.is_finite() || !y.is_finite() {
        return Err(GeometryError::BadCoordinates);
    }

    Ok(Coord { x, y })
}

fn positions(value: &Value, minimum: usize) -> Result<Vec<Coord<f64>>, GeometryError> {
    let coords = array(value)?
        .iter()
        .map(position)
        .collect::<Result<Vec<_>, _>>()?;
    if coords.len() < minimum {
        return Err(GeometryError::TooFewPositions {
            expected: minimum,
            found: coords.len(),
        });
    }

    Ok(coords)
}

fn line(value: &Value) -> Result<LineString<f64>, GeometryError> {
    Ok(LineString(positions(value, 2)?))
}

fn polygon(value: &Value) -> Result<Polygon<f64>, GeometryError> {
    let mut rings = array(value)?
        .iter()
        .map(|ring| positions(ring, 4).map(LineString))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter();
    let exterior = rings.next().ok_or(GeometryError::TooFewPositions {
        expected: 4,
        found: 0,
    })?;

    Ok(Polygon::new(exterior, rings.collect()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Capability to load and check datasets.
///
/// Layer of indirection between the repository workflow and the actual
/// dataset format.
pub trait DatasetSource: Send + Sync + 'static {
    /// Load dataset at target path.
    fn load(&self, path: &Path) -> Result<Dataset, SourceError>;

    /// Check dataset against schema contract.
    fn check(&self, dataset: &Dataset, contract: &SchemaContract) -> Vec<Violation>;
}

/// Dataset source reading GeoJSON files from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoJsonSource;

impl DatasetSource for GeoJsonSource {
    #[instrument(skip(self), level = "debug")]
    fn load(&self, path: &Path) -> Result<Dataset, SourceError> {
        debug!("load dataset {:?}", path.display());
        let text = read_to_string(path).map_err(|err| SourceError::Read {
            source: err,
            path: path.to_path_buf(),
        })?;

        Dataset::from_geojson(&text).map_err(|err| SourceError::Parse {
            source: err,
            path: path.to_path_buf(),
        })
    }

    fn check(&self, dataset: &Dataset, contract: &SchemaContract) -> Vec<Violation> {
        contract.check(dataset)
    }
}

/// Geometry parsing error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    /// Geometry is not a JSON object.
    #[error("geometry is not an object")]
    NotAnObject,

    /// Geometry lacks a required member.
    #[error("geometry is missing member {0:?}")]
    MissingMember(&'static str),

    /// Geometry names a type that GeoJSON does not define.
    #[error("unknown geometry type {0:?}")]
    UnknownType(String),

    /// Coordinates are not arrays of finite numbers.
    #[error("coordinates are not arrays of finite numbers")]
    BadCoordinates,

    /// Line or ring has too few positions.
    #[error("expected at least {expected} positions, found {found}")]
    TooFewPositions { expected: usize, found: usize },
}

/// Dataset text parsing error types.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Text is not JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// JSON is not a feature collection.
    #[error("expected a FeatureCollection, found {0}")]
    NotFeatureCollection(String),

    /// Feature is malformed.
    #[error("feature {index} is malformed: {reason}")]
    BadFeature { index: usize, reason: String },
}

/// Dataset source error types.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Dataset file cannot be read.
    #[error("failed to read dataset at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Dataset file cannot be parsed.
    #[error("failed to parse dataset at {:?}", path.display())]
    Parse {
        #[source]
        source: LoadError,
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parse_feature_collection() -> anyhow::Result<()> {
        let dataset = Dataset::from_geojson(indoc! {r#"
            {
              "type": "FeatureCollection",
              "name": "kb11_traces",
              "features": [
                {
                  "type": "Feature",
                  "geometry": { "type": "LineString", "coordinates": [[0, 0], [1, 1]] },
                  "properties": { "DIP": 45.0 }
                },
                { "type": "Feature", "geometry": null, "properties": null }
              ]
            }
        "#})?;

        assert_eq!(dataset.rows(), 2);
        assert_eq!(dataset.foreign_members.get("name"), Some(&json!("kb11_traces")));
        assert_eq!(dataset.features[0].properties.get("DIP"), Some(&json!(45.0)));
        assert_eq!(dataset.features[1].geometry, Some(Value::Null));
        assert!(dataset.features[1].properties.is_empty());

        Ok(())
    }

    #[test]
    fn keep_feature_foreign_members() -> anyhow::Result<()> {
        let dataset = Dataset::from_geojson(indoc! {r#"
            {
              "type": "FeatureCollection",
              "features": [
                {
                  "type": "Feature",
                  "bbox": [0.0, 0.0, 1.0, 1.0],
                  "geometry": { "type": "LineString", "coordinates": [[0, 0], [1, 1]] },
                  "properties": {}
                }
              ]
            }
        "#})?;

        let feature = &dataset.features[0];
        assert_eq!(feature.foreign_members.get("bbox"), Some(&json!([0.0, 0.0, 1.0, 1.0])));
        assert!(!feature.foreign_members.contains_key("type"));
        assert_eq!(feature.to_geojson()["bbox"], json!([0.0, 0.0, 1.0, 1.0]));

        Ok(())
    }

    #[test]
    fn reject_non_collection() {
        let result = Dataset::from_geojson(r#"{ "type": "Feature" }"#);
        assert!(matches!(result, Err(LoadError::NotFeatureCollection(kind)) if kind == "Feature"));

        let result = Dataset::from_geojson("not json at all");
        assert!(matches!(result, Err(LoadError::Json(_))));
    }

    #[test]
    fn reject_feature_with_array_properties() {
        let result = Dataset::from_geojson(
            r#"{ "type": "FeatureCollection", "features": [{ "type": "Feature", "properties": [] }] }"#,
        );
        assert!(matches!(result, Err(LoadError::BadFeature { index: 0, .. })));
    }

    #[test]
    fn parse_line_geometries() -> anyhow::Result<()> {
        let result = parse_geometry(&json!({
            "type": "MultiLineString",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0]], [[2.0, 2.0], [3.0, 3.0, 12.5]]]
        }))?;
        assert_eq!(geometry_name(&result), "MultiLineString");

        let result = parse_geometry(&json!({ "type": "LineString", "coordinates": [[0.0, 0.0]] }));
        assert_eq!(
            result,
            Err(GeometryError::TooFewPositions {
                expected: 2,
                found: 1
            })
        );

        Ok(())
    }

    #[test]
    fn parse_polygon_geometries() -> anyhow::Result<()> {
        let result = parse_geometry(&json!({
            "type": "Polygon",
            "coordinates": [[[0, 0], [10, 0], [10, 10], [0, 0]]]
        }))?;
        assert_eq!(geometry_name(&result), "Polygon");

        let result = parse_geometry(&json!({ "type": "Polygon", "coordinates": [[[0, 0], [1, 1]]] }));
        assert!(matches!(result, Err(GeometryError::TooFewPositions { .. })));

        let result = parse_geometry(&json!({ "type": "Circle", "coordinates": [0, 0] }));
        assert_eq!(result, Err(GeometryError::UnknownType("Circle".into())));

        Ok(())
    }

    #[test]
    fn geojson_survives_conversion() -> anyhow::Result<()> {
        let text = r#"{
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "EPSG:3067" } },
            "features": [{
                "type": "Feature",
                "id": 7,
                "geometry": { "type": "LineString", "coordinates": [[0, 0], [1, 1]] },
                "properties": { "Operator": "Nikolas Ovaskainen" }
            }]
        }"#;
        let dataset = Dataset::from_geojson(text)?;
        let result = Dataset::from_geojson(&dataset.to_geojson().to_string())?;
        assert_eq!(result, dataset);

        Ok(())
    }
}
