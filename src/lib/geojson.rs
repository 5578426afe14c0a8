use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;

use super::error::Error;

/// A position as `[longitude, latitude]`. RFC 7946 permits a third altitude
/// element on input; it is accepted and dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position(pub f64, pub f64);

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.0, self.1).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let elements = <Vec<f64>>::deserialize(deserializer)?;
        match elements.as_slice() {
            [lng, lat] | [lng, lat, _] => Ok(Position(*lng, *lat)),
            _ => Err(serde::de::Error::invalid_length(
                elements.len(),
                &"a position of two or three numbers",
            )),
        }
    }
}

/// GeoJSON geometry shapes supported by the interchange pipelines.
///
/// Polygon coordinates are `[shell, ...holes]`; MultiPolygon adds one more
/// level of nesting.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: Position,
    },
    Polygon {
        coordinates: Vec<Vec<Position>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Position>>>,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Entity {
    Feature {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        properties: serde_json::Map<String, Value>,
        geometry: Geometry,
    },
    FeatureCollection {
        features: Vec<Entity>,
    },
}

/// A feature as uploaded: everything beyond the geometry is kept loose so a
/// single malformed member cannot fail the whole collection.
#[derive(Deserialize)]
pub struct RawFeature {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub properties: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub geometry: Value,
}

#[derive(Deserialize)]
struct RawCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Vec<Value>,
}

/// Parse an uploaded GeoJSON document. The top level must be a single
/// FeatureCollection; its members are returned unvalidated for per-feature
/// tolerant conversion.
pub fn read_feature_collection(reader: impl Read) -> Result<Vec<Value>, Error> {
    let collection: RawCollection = serde_json::from_reader(reader)
        .map_err(|e| Error::Validation(format!("invalid GeoJSON upload: {}", e)))?;
    if collection.kind != "FeatureCollection" {
        return Err(Error::Validation(format!(
            "expected a FeatureCollection, got {}",
            collection.kind
        )));
    }
    Ok(collection.features)
}

#[cfg(test)]
mod position {
    use super::*;

    #[test]
    fn altitude_is_accepted_and_dropped() {
        let body = r#"{"type":"Point","coordinates":[125.6,10.1,42.0]}"#;
        let geometry: Geometry = serde_json::from_str(body).unwrap();
        assert_eq!(
            geometry,
            Geometry::Point {
                coordinates: Position(125.6, 10.1)
            }
        );
    }

    #[test]
    fn short_positions_are_rejected() {
        let body = r#"{"type":"Point","coordinates":[125.6]}"#;
        assert!(serde_json::from_str::<Geometry>(body).is_err());
    }

    #[test]
    fn serializes_without_altitude() {
        let geometry = Geometry::Point {
            coordinates: Position(125.6, 10.1),
        };
        assert_eq!(
            serde_json::to_string(&geometry).unwrap(),
            r#"{"type":"Point","coordinates":[125.6,10.1]}"#
        );
    }
}

#[cfg(test)]
mod read_feature_collection {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn accepts_a_feature_collection() {
        let body = r#"{"type":"FeatureCollection","features":[{"type":"Feature"}]}"#;
        let features = read_feature_collection(Cursor::new(body)).unwrap();
        assert_eq!(features.len(), 1);
    }

    #[test]
    fn rejects_a_bare_feature() {
        let body = r#"{"type":"Feature","geometry":null,"properties":{}}"#;
        let err = read_feature_collection(Cursor::new(body)).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = read_feature_collection(Cursor::new("{not json")).unwrap_err();
        assert_eq!(err.status(), 400);
    }
}
