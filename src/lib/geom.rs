use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::geojson;
use super::store::StoreValue;

/// A position in GeoJSON axis order: (longitude, latitude).
///
/// The store's native point type carries (lat, lng); every crossing of that
/// boundary flips axes explicitly.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lng: f64,
    pub lat: f64,
}

impl Coordinate {
    pub fn new(lng: f64, lat: f64) -> Self {
        Coordinate { lng, lat }
    }

    /// (0, 0) positions are treated as absent; unparsed upload cells
    /// produce them.
    pub fn is_origin(&self) -> bool {
        self.lng == 0.0 && self.lat == 0.0
    }
}

impl From<geojson::Position> for Coordinate {
    fn from(position: geojson::Position) -> Self {
        Coordinate {
            lng: position.0,
            lat: position.1,
        }
    }
}

impl From<Coordinate> for geojson::Position {
    fn from(coordinate: Coordinate) -> Self {
        geojson::Position(coordinate.lng, coordinate.lat)
    }
}

/// A closed ring of positions. Closure is not enforced here; rings are
/// carried as uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRing(pub Vec<Coordinate>);

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub shell: LinearRing,
    pub holes: Vec<LinearRing>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coordinate),
    Polygon(Polygon),
    MultiPolygon(Vec<Polygon>),
}

fn ring_pairs(ring: &LinearRing) -> Vec<geojson::Position> {
    ring.0.iter().map(|c| (*c).into()).collect()
}

fn polygon_pairs(polygon: &Polygon) -> Vec<Vec<geojson::Position>> {
    std::iter::once(&polygon.shell)
        .chain(polygon.holes.iter())
        .map(ring_pairs)
        .collect()
}

fn ring_from_pairs(pairs: &[geojson::Position]) -> Option<LinearRing> {
    if pairs.is_empty() {
        return None;
    }
    Some(LinearRing(pairs.iter().map(|&p| p.into()).collect()))
}

fn polygon_from_pairs(rings: &[Vec<geojson::Position>]) -> Option<Polygon> {
    let mut valid = rings.iter().filter_map(|r| ring_from_pairs(r));
    let shell = valid.next()?;
    Some(Polygon {
        shell,
        holes: valid.collect(),
    })
}

impl Geometry {
    pub fn to_geojson(&self) -> geojson::Geometry {
        match self {
            Geometry::Point(coordinate) => geojson::Geometry::Point {
                coordinates: (*coordinate).into(),
            },
            Geometry::Polygon(polygon) => geojson::Geometry::Polygon {
                coordinates: polygon_pairs(polygon),
            },
            Geometry::MultiPolygon(polygons) => geojson::Geometry::MultiPolygon {
                coordinates: polygons.iter().map(polygon_pairs).collect(),
            },
        }
    }

    /// Convert a GeoJSON shape into the model. Degenerate geometry (an
    /// origin point, a Polygon/MultiPolygon with zero valid rings) becomes
    /// `None` and must not be persisted.
    pub fn from_geojson(geometry: &geojson::Geometry) -> Option<Geometry> {
        match geometry {
            geojson::Geometry::Point { coordinates } => {
                let coordinate: Coordinate = (*coordinates).into();
                if coordinate.is_origin() {
                    return None;
                }
                Some(Geometry::Point(coordinate))
            }
            geojson::Geometry::Polygon { coordinates } => {
                polygon_from_pairs(coordinates).map(Geometry::Polygon)
            }
            geojson::Geometry::MultiPolygon { coordinates } => {
                let polygons: Vec<Polygon> = coordinates
                    .iter()
                    .filter_map(|rings| polygon_from_pairs(rings))
                    .collect();
                if polygons.is_empty() {
                    return None;
                }
                Some(Geometry::MultiPolygon(polygons))
            }
        }
    }

    /// Encode for the store: the GeoJSON shape of the geometry with every
    /// array rewritten into the store's map-based form.
    pub fn to_store_value(&self) -> StoreValue {
        let json = serde_json::to_value(self.to_geojson()).unwrap_or(Value::Null);
        encode_arrays(&json)
    }

    /// Decode a store-encoded geometry. `None` covers both undecodable
    /// values and degenerate shapes.
    pub fn from_store_value(value: &StoreValue) -> Option<Geometry> {
        let json = decode_arrays(value);
        let geojson: geojson::Geometry = serde_json::from_value(json).ok()?;
        Geometry::from_geojson(&geojson)
    }

    /// Well-known text, JTS style. Used by the CSV export only.
    pub fn to_wkt(&self) -> String {
        wkt_of(&self.to_geojson())
    }
}

/// Rewrite a GeoJSON-like value into the store encoding: a two-element
/// numeric array is a coordinate pair and becomes the store's native point
/// (with the (lng, lat) → (lat, lng) flip); any other array becomes a map
/// keyed by stringified index.
pub fn encode_arrays(value: &Value) -> StoreValue {
    match value {
        Value::Array(elements) => {
            if let [lng, lat] = elements.as_slice() {
                if let (Some(lng), Some(lat)) = (lng.as_f64(), lat.as_f64()) {
                    return StoreValue::GeoPoint { lat, lng };
                }
            }
            StoreValue::sequence_of(elements.iter().map(encode_arrays).collect())
        }
        Value::Object(map) => StoreValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), encode_arrays(v)))
                .collect(),
        ),
        other => StoreValue::from(other),
    }
}

/// Inverse of [`encode_arrays`]: a native point becomes `[lng, lat]`, a map
/// whose keys are all numeric becomes a dense array ordered by numeric key.
pub fn decode_arrays(value: &StoreValue) -> Value {
    match value {
        StoreValue::GeoPoint { lat, lng } => serde_json::json!([lng, lat]),
        StoreValue::Map(map) => {
            let indices: Option<Vec<usize>> =
                map.keys().map(|k| k.parse::<usize>().ok()).collect();
            match indices {
                Some(mut indices) if !map.is_empty() => {
                    indices.sort_unstable();
                    let elements: Vec<Value> = indices
                        .iter()
                        .filter_map(|idx| map.get(&idx.to_string()))
                        .map(decode_arrays)
                        .collect();
                    Value::Array(elements)
                }
                _ => {
                    let entries: serde_json::Map<String, Value> = map
                        .iter()
                        .map(|(k, v)| (k.clone(), decode_arrays(v)))
                        .collect();
                    Value::Object(entries)
                }
            }
        }
        other => Value::from(other),
    }
}

fn wkt_position(position: &geojson::Position) -> String {
    format!("{} {}", position.0, position.1)
}

fn wkt_ring(ring: &[geojson::Position]) -> String {
    format!("({})", ring.iter().map(wkt_position).join(", "))
}

fn wkt_rings(rings: &[Vec<geojson::Position>]) -> String {
    format!(
        "({})",
        rings.iter().map(|ring| wkt_ring(ring)).join(", ")
    )
}

fn wkt_of(geometry: &geojson::Geometry) -> String {
    match geometry {
        geojson::Geometry::Point { coordinates } => {
            format!("POINT ({})", wkt_position(coordinates))
        }
        geojson::Geometry::Polygon { coordinates } => {
            format!("POLYGON {}", wkt_rings(coordinates))
        }
        geojson::Geometry::MultiPolygon { coordinates } => {
            format!(
                "MULTIPOLYGON ({})",
                coordinates.iter().map(|rings| wkt_rings(rings)).join(", ")
            )
        }
    }
}

#[cfg(test)]
mod store_codec {
    use super::*;

    fn square(origin_lng: f64, origin_lat: f64, size: f64) -> LinearRing {
        LinearRing(vec![
            Coordinate::new(origin_lng, origin_lat),
            Coordinate::new(origin_lng + size, origin_lat),
            Coordinate::new(origin_lng + size, origin_lat + size),
            Coordinate::new(origin_lng, origin_lat + size),
            Coordinate::new(origin_lng, origin_lat),
        ])
    }

    #[test]
    fn point_flips_axes_into_the_native_type() {
        let geometry = Geometry::Point(Coordinate::new(125.6, 10.1));
        let encoded = geometry.to_store_value();
        assert_eq!(
            encoded.get("coordinates"),
            Some(&StoreValue::GeoPoint {
                lat: 10.1,
                lng: 125.6
            })
        );
        assert_eq!(
            encoded.get("type"),
            Some(&StoreValue::String("Point".into()))
        );
    }

    #[test]
    fn point_round_trips() {
        let geometry = Geometry::Point(Coordinate::new(125.6, 10.1));
        let back = Geometry::from_store_value(&geometry.to_store_value()).unwrap();
        assert_eq!(back, geometry);
    }

    #[test]
    fn polygon_with_hole_round_trips() {
        let geometry = Geometry::Polygon(Polygon {
            shell: square(0.0, 0.0, 10.0),
            holes: vec![square(2.0, 2.0, 1.0)],
        });
        let back = Geometry::from_store_value(&geometry.to_store_value()).unwrap();
        assert_eq!(back, geometry);
    }

    #[test]
    fn multi_polygon_round_trips() {
        let geometry = Geometry::MultiPolygon(vec![
            Polygon {
                shell: square(0.0, 0.0, 2.0),
                holes: vec![],
            },
            Polygon {
                shell: square(20.0, 20.0, 5.0),
                holes: vec![square(21.0, 21.0, 1.0)],
            },
        ]);
        let back = Geometry::from_store_value(&geometry.to_store_value()).unwrap();
        assert_eq!(back, geometry);
    }

    #[test]
    fn rings_become_index_keyed_maps() {
        let geometry = Geometry::Polygon(Polygon {
            shell: square(0.0, 0.0, 1.0),
            holes: vec![],
        });
        let encoded = geometry.to_store_value();
        let shell = encoded.get("coordinates").and_then(|c| c.get("0")).unwrap();
        // Five positions, keyed "0" through "4".
        assert_eq!(shell.as_map().unwrap().len(), 5);
        assert!(matches!(
            shell.get("0"),
            Some(StoreValue::GeoPoint { .. })
        ));
    }

    #[test]
    fn garbage_decodes_to_none() {
        assert_eq!(
            Geometry::from_store_value(&StoreValue::String("POINT".into())),
            None
        );
        let unknown_type = StoreValue::map_of(vec![(
            "type",
            StoreValue::String("LineString".into()),
        )]);
        assert_eq!(Geometry::from_store_value(&unknown_type), None);
    }
}
