use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Mutex;
use thiserror::Error;

/// A value as the document store holds it.
///
/// The store has no array type; ordered sequences are maps keyed by the
/// stringified element index ("0", "1", ...). The native point type carries
/// (lat, lng), the reverse of GeoJSON axis order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    String(String),
    GeoPoint { lat: f64, lng: f64 },
    Map(BTreeMap<String, StoreValue>),
}

impl StoreValue {
    pub fn as_map(&self) -> Option<&BTreeMap<String, StoreValue>> {
        match self {
            StoreValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoreValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StoreValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric accessor over both wire number types.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StoreValue::Integer(n) => Some(*n as f64),
            StoreValue::Real(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StoreValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&StoreValue> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Build a map value from (key, value) pairs.
    pub fn map_of(entries: Vec<(&str, StoreValue)>) -> StoreValue {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        StoreValue::Map(map)
    }

    /// Encode an ordered sequence as an index-keyed map.
    pub fn sequence_of(elements: Vec<StoreValue>) -> StoreValue {
        let map = elements
            .into_iter()
            .enumerate()
            .map(|(idx, v)| (idx.to_string(), v))
            .collect();
        StoreValue::Map(map)
    }
}

// GeoPoints are persisted as {"$gp": [lat, lng]}; everything else maps onto
// plain JSON. "$gp" is reserved: a document key of that name would be read
// back as a point.
const GEOPOINT_KEY: &str = "$gp";

impl From<&StoreValue> for serde_json::Value {
    fn from(value: &StoreValue) -> Self {
        use serde_json::json;
        match value {
            StoreValue::Null => serde_json::Value::Null,
            StoreValue::Bool(b) => json!(b),
            StoreValue::Integer(n) => json!(n),
            StoreValue::Real(n) => json!(n),
            StoreValue::String(s) => json!(s),
            StoreValue::GeoPoint { lat, lng } => json!({ GEOPOINT_KEY: [lat, lng] }),
            StoreValue::Map(map) => {
                let entries: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect();
                serde_json::Value::Object(entries)
            }
        }
    }
}

impl From<&serde_json::Value> for StoreValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => StoreValue::Null,
            serde_json::Value::Bool(b) => StoreValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => StoreValue::Integer(i),
                None => StoreValue::Real(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => StoreValue::String(s.clone()),
            serde_json::Value::Array(elements) => {
                StoreValue::sequence_of(elements.iter().map(StoreValue::from).collect())
            }
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(serde_json::Value::Array(pair)) = map.get(GEOPOINT_KEY) {
                        if let [lat, lng] = pair.as_slice() {
                            if let (Some(lat), Some(lng)) = (lat.as_f64(), lng.as_f64()) {
                                return StoreValue::GeoPoint { lat, lng };
                            }
                        }
                    }
                }
                let entries = map
                    .iter()
                    .map(|(k, v)| (k.clone(), StoreValue::from(v)))
                    .collect();
                StoreValue::Map(entries)
            }
        }
    }
}

impl Serialize for StoreValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_json::Value::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StoreValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(StoreValue::from(&value))
    }
}

/// Hierarchical document paths.
pub mod path {
    pub fn survey(survey_id: &str) -> String {
        format!("surveys/{}", survey_id)
    }

    pub fn jobs(survey_id: &str) -> String {
        format!("surveys/{}/jobs", survey_id)
    }

    pub fn job(survey_id: &str, job_id: &str) -> String {
        format!("surveys/{}/jobs/{}", survey_id, job_id)
    }

    pub fn lois(survey_id: &str) -> String {
        format!("surveys/{}/lois", survey_id)
    }

    pub fn loi(survey_id: &str, loi_id: &str) -> String {
        format!("surveys/{}/lois/{}", survey_id, loi_id)
    }

    pub fn submissions(survey_id: &str) -> String {
        format!("surveys/{}/submissions", survey_id)
    }

    pub fn submission(survey_id: &str, submission_id: &str) -> String {
        format!("surveys/{}/submissions/{}", survey_id, submission_id)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    MissingDocument(String),

    #[error("store file is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A document fetched from the store: the last path segment plus its data.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: StoreValue,
}

/// Equality filter on a single top-level document field.
pub struct FieldFilter<'a> {
    pub field: &'a str,
    pub equals: StoreValue,
}

/// The boundary to the external document database.
///
/// Implementations must be shareable across worker threads; the import
/// pipeline issues inserts from a rayon pool.
pub trait Store: Sync {
    fn fetch_document(&self, path: &str) -> Result<Option<Document>, StoreError>;

    fn fetch_collection(
        &self,
        path: &str,
        filter: Option<&FieldFilter>,
    ) -> Result<Vec<Document>, StoreError>;

    fn insert_document(&self, path: &str, data: StoreValue) -> Result<(), StoreError>;

    /// Merge the top-level keys of `partial` into an existing document.
    fn update_document(&self, path: &str, partial: StoreValue) -> Result<(), StoreError>;

    fn count_where(&self, path: &str, field: &str, value: &StoreValue)
        -> Result<usize, StoreError>;
}

/// In-memory store keyed by full document path, with JSON persistence.
///
/// Backs the CLI and the tests; a production deployment would implement
/// `Store` against the real database client instead.
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, StoreValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            docs: Mutex::new(BTreeMap::new()),
        }
    }

    /// Read a persisted document tree: a JSON object mapping full paths to
    /// document values.
    pub fn from_reader(reader: impl Read) -> Result<Self, StoreError> {
        let docs: BTreeMap<String, StoreValue> =
            serde_json::from_reader(reader).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(MemoryStore {
            docs: Mutex::new(docs),
        })
    }

    pub fn to_writer(&self, writer: impl Write) -> Result<(), StoreError> {
        let docs = self.docs.lock().unwrap();
        serde_json::to_writer_pretty(writer, &*docs)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(())
    }

    fn children_of<'a>(
        docs: &'a BTreeMap<String, StoreValue>,
        collection: &str,
    ) -> impl Iterator<Item = (&'a String, &'a StoreValue)> + 'a {
        let prefix = format!("{}/", collection);
        let len = prefix.len();
        docs.range(prefix.clone()..)
            .take_while(move |(key, _)| key.starts_with(&prefix))
            .filter(move |(key, _)| !key[len..].contains('/'))
    }

    fn doc_id(path: &str) -> String {
        path.rsplit('/').next().unwrap_or(path).to_string()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl Store for MemoryStore {
    fn fetch_document(&self, path: &str) -> Result<Option<Document>, StoreError> {
        let docs = self.docs.lock().unwrap();
        Ok(docs.get(path).map(|data| Document {
            id: Self::doc_id(path),
            data: data.clone(),
        }))
    }

    fn fetch_collection(
        &self,
        path: &str,
        filter: Option<&FieldFilter>,
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.docs.lock().unwrap();
        let matches = Self::children_of(&docs, path)
            .filter(|(_, data)| match filter {
                Some(f) => data.get(f.field) == Some(&f.equals),
                None => true,
            })
            .map(|(key, data)| Document {
                id: Self::doc_id(key),
                data: data.clone(),
            })
            .collect();
        Ok(matches)
    }

    fn insert_document(&self, path: &str, data: StoreValue) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().unwrap();
        docs.insert(path.to_string(), data);
        Ok(())
    }

    fn update_document(&self, path: &str, partial: StoreValue) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().unwrap();
        let existing = docs
            .get_mut(path)
            .ok_or_else(|| StoreError::MissingDocument(path.to_string()))?;
        match (existing, partial) {
            (StoreValue::Map(target), StoreValue::Map(updates)) => {
                for (key, value) in updates {
                    target.insert(key, value);
                }
                Ok(())
            }
            _ => Err(StoreError::Corrupt(format!(
                "cannot merge into non-map document at {}",
                path
            ))),
        }
    }

    fn count_where(
        &self,
        path: &str,
        field: &str,
        value: &StoreValue,
    ) -> Result<usize, StoreError> {
        let docs = self.docs.lock().unwrap();
        let count = Self::children_of(&docs, path)
            .filter(|(_, data)| data.get(field) == Some(value))
            .count();
        Ok(count)
    }
}


#[cfg(test)]
mod update_document {
    use super::*;

    #[test]
    fn merges_top_level_keys() {
        let store = MemoryStore::new();
        store
            .insert_document(
                "surveys/s1/lois/a",
                StoreValue::map_of(vec![
                    ("2", StoreValue::String("job-1".into())),
                    ("4", StoreValue::Integer(0)),
                ]),
            )
            .unwrap();
        store
            .update_document(
                "surveys/s1/lois/a",
                StoreValue::map_of(vec![("4", StoreValue::Integer(3))]),
            )
            .unwrap();
        let doc = store.fetch_document("surveys/s1/lois/a").unwrap().unwrap();
        assert_eq!(doc.data.get("4"), Some(&StoreValue::Integer(3)));
        assert_eq!(
            doc.data.get("2"),
            Some(&StoreValue::String("job-1".into()))
        );
    }

    #[test]
    fn missing_document_is_an_error() {
        let store = MemoryStore::new();
        let result = store.update_document("surveys/s1/lois/a", StoreValue::Map(BTreeMap::new()));
        assert!(matches!(result, Err(StoreError::MissingDocument(_))));
    }
}
