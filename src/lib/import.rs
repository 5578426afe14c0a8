//! Bulk LOI import from uploaded CSV or GeoJSON files, plus the single
//! submission write path.
//!
//! Uploads arrive as an ordered multipart stream. The survey and job ids are
//! carried in form fields that must precede the file part, so the file can be
//! parsed in one pass without buffering it.

use csv::ReaderBuilder;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use rayon::prelude::*;
use std::io::Read;
use tracing::{debug, info, warn};

use super::acl;
use super::doc;
use super::error::Error;
use super::geojson;
use super::geom::{Coordinate, Geometry};
use super::model::{AuditInfo, LocationOfInterest, PropertyValue, Source, Submission, User};
use super::store::{path, Store, StoreValue};

/// One part of a multipart upload, in stream order.
pub enum Part<'a> {
    Field { name: String, value: String },
    File {
        filename: String,
        reader: Box<dyn Read + 'a>,
    },
}

pub struct ImportRequest<'a> {
    pub method: &'a str,
    pub parts: Vec<Part<'a>>,
}

#[derive(Debug, PartialEq)]
pub struct ImportSummary {
    /// Number of LOIs written. Rows that could not be parsed are not counted
    /// and not reported as errors.
    pub count: usize,
}

fn new_loi_id() -> String {
    thread_rng().sample_iter(&Alphanumeric).take(20).collect()
}

/// Process an upload end to end: validate the request envelope, check
/// permissions, parse the file, and write the resulting LOIs.
pub fn import(
    store: &dyn Store,
    user: &User,
    request: ImportRequest,
) -> Result<ImportSummary, Error> {
    if request.method != "POST" {
        return Err(Error::MethodNotAllowed(request.method.to_string()));
    }

    let mut survey_id: Option<String> = None;
    let mut job_id: Option<String> = None;
    let mut saw_file = false;
    let mut count = 0;

    for part in request.parts {
        match part {
            Part::Field { name, value } => match name.as_str() {
                "survey" | "project" => survey_id = Some(value),
                "job" | "layer" => job_id = Some(value),
                other => debug!(field = other, "ignoring unknown form field"),
            },
            Part::File { filename, reader } => {
                let survey_id = survey_id.as_deref().ok_or_else(|| {
                    Error::Validation("file part arrived before the survey id".to_string())
                })?;
                let job_id = job_id.as_deref().ok_or_else(|| {
                    Error::Validation("file part arrived before the job id".to_string())
                })?;
                count += import_file(store, user, survey_id, job_id, &filename, reader)?;
                saw_file = true;
            }
        }
    }

    if !saw_file {
        return Err(Error::Validation("upload carried no file part".to_string()));
    }
    Ok(ImportSummary { count })
}

fn import_file(
    store: &dyn Store,
    user: &User,
    survey_id: &str,
    job_id: &str,
    filename: &str,
    reader: Box<dyn Read + '_>,
) -> Result<usize, Error> {
    let survey_doc = store
        .fetch_document(&path::survey(survey_id))?
        .ok_or_else(|| Error::NotFound(format!("survey {}", survey_id)))?;
    let survey = doc::survey_from_doc(&survey_doc.id, &survey_doc.data)?;
    if !acl::can_import(user, &survey) {
        return Err(Error::PermissionDenied(format!(
            "{} may not import into survey {}",
            user.email, survey.id
        )));
    }
    if store.fetch_document(&path::job(survey_id, job_id))?.is_none() {
        return Err(Error::NotFound(format!("job {}", job_id)));
    }

    let lower = filename.to_lowercase();
    let lois = if lower.ends_with(".csv") {
        lois_from_csv(reader, job_id, user)?
    } else if lower.ends_with(".geojson") || lower.ends_with(".json") {
        lois_from_geojson(reader, job_id, user)?
    } else {
        return Err(Error::Validation(format!(
            "unsupported file type: {}",
            filename
        )));
    };

    // All inserts are attempted even when some fail; the summary counts the
    // ones that stuck.
    let written: usize = lois
        .par_iter()
        .map(|loi| {
            match store.insert_document(&path::loi(survey_id, &loi.id), doc::loi_to_doc(loi)) {
                Ok(()) => 1,
                Err(err) => {
                    warn!(loi = %loi.id, %err, "insert failed");
                    0
                }
            }
        })
        .sum();
    info!(
        survey = survey_id,
        job = job_id,
        parsed = lois.len(),
        written,
        "import finished"
    );
    Ok(written)
}

fn imported_loi(
    job_id: &str,
    user: &User,
    geometry: Geometry,
    custom_tag: Option<String>,
    properties: Vec<(String, PropertyValue)>,
) -> LocationOfInterest {
    let audit = AuditInfo {
        user_id: user.id.clone(),
        display_name: user.display_name.clone(),
        email: Some(user.email.clone()),
        client_time: None,
        server_time: chrono::Utc::now(),
    };
    LocationOfInterest {
        id: new_loi_id(),
        job_id: job_id.to_string(),
        geometry,
        properties,
        custom_tag,
        source: Source::Imported,
        owner_id: Some(user.id.clone()),
        submission_count: 0,
        created: Some(audit),
        last_modified: None,
    }
}

// ---- CSV ----

const LAT_ALIASES: &[&str] = &["lat", "latitude", "y"];
const LNG_ALIASES: &[&str] = &["lng", "lon", "long", "longitude", "x"];
const TAG_ALIASES: &[&str] = &["system:index"];

fn alias_position(headers: &csv::StringRecord, aliases: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| aliases.contains(&h.trim().to_lowercase().as_str()))
}

fn property_value(raw: &str) -> PropertyValue {
    match raw.parse::<f64>() {
        Ok(number) if number.is_finite() => PropertyValue::Number(number),
        _ => PropertyValue::String(raw.to_string()),
    }
}

/// Parse an uploaded CSV into point LOIs. Rows without a usable coordinate
/// pair are skipped; every other column becomes a property.
fn lois_from_csv(
    reader: impl Read,
    job_id: &str,
    user: &User,
) -> Result<Vec<LocationOfInterest>, Error> {
    let mut csv_reader = ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv_reader
        .headers()
        .map_err(|e| Error::Validation(format!("invalid CSV upload: {}", e)))?
        .clone();

    let lat_idx = alias_position(&headers, LAT_ALIASES)
        .ok_or_else(|| Error::Validation("no latitude column".to_string()))?;
    let lng_idx = alias_position(&headers, LNG_ALIASES)
        .ok_or_else(|| Error::Validation("no longitude column".to_string()))?;
    let tag_idx = alias_position(&headers, TAG_ALIASES);

    let mut lois = vec![];
    for (row, record) in csv_reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!(row, %err, "skipping malformed CSV row");
                continue;
            }
        };
        let coordinate = match (
            record.get(lat_idx).and_then(|v| v.trim().parse::<f64>().ok()),
            record.get(lng_idx).and_then(|v| v.trim().parse::<f64>().ok()),
        ) {
            (Some(lat), Some(lng)) => Coordinate::new(lng, lat),
            _ => {
                debug!(row, "skipping row without coordinates");
                continue;
            }
        };
        if coordinate.is_origin() {
            debug!(row, "skipping row at the origin");
            continue;
        }

        let custom_tag = tag_idx
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from);
        let properties: Vec<(String, PropertyValue)> = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != lat_idx && *idx != lng_idx && Some(*idx) != tag_idx)
            .filter_map(|(idx, key)| {
                let raw = record.get(idx)?.trim();
                if raw.is_empty() {
                    None
                } else {
                    Some((key.to_string(), property_value(raw)))
                }
            })
            .collect();

        lois.push(imported_loi(
            job_id,
            user,
            Geometry::Point(coordinate),
            custom_tag,
            properties,
        ));
    }
    Ok(lois)
}

// ---- GeoJSON ----

fn feature_tag(id: &serde_json::Value) -> Option<String> {
    match id {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn feature_properties(
    properties: Option<serde_json::Map<String, serde_json::Value>>,
) -> Vec<(String, PropertyValue)> {
    properties
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::String(s) => Some((key, PropertyValue::String(s))),
            serde_json::Value::Number(n) => {
                n.as_f64().map(|f| (key, PropertyValue::Number(f)))
            }
            _ => None,
        })
        .collect()
}

/// Parse an uploaded GeoJSON FeatureCollection. A malformed member is
/// skipped; the rest of the collection still imports.
fn lois_from_geojson(
    reader: impl Read,
    job_id: &str,
    user: &User,
) -> Result<Vec<LocationOfInterest>, Error> {
    let mut lois = vec![];
    for (index, raw) in geojson::read_feature_collection(reader)?.into_iter().enumerate() {
        let feature: geojson::RawFeature = match serde_json::from_value(raw) {
            Ok(feature) => feature,
            Err(err) => {
                warn!(index, %err, "skipping malformed feature");
                continue;
            }
        };
        let geometry = serde_json::from_value::<geojson::Geometry>(feature.geometry)
            .ok()
            .as_ref()
            .and_then(Geometry::from_geojson);
        let geometry = match geometry {
            Some(geometry) => geometry,
            None => {
                debug!(index, "skipping feature without a usable geometry");
                continue;
            }
        };
        let custom_tag = feature.id.as_ref().and_then(feature_tag);
        lois.push(imported_loi(
            job_id,
            user,
            geometry,
            custom_tag,
            feature_properties(feature.properties),
        ));
    }
    Ok(lois)
}

// ---- Submissions ----

/// Write one submission and refresh the denormalized count on its LOI.
///
/// The count is recomputed from the collection rather than incremented, so a
/// retried write converges instead of drifting.
pub fn record_submission(
    store: &dyn Store,
    survey_id: &str,
    submission: &Submission,
) -> Result<usize, Error> {
    store.insert_document(
        &path::submission(survey_id, &submission.id),
        doc::submission_to_doc(submission),
    )?;
    let count = store.count_where(
        &path::submissions(survey_id),
        doc::submission_field::LOI_ID,
        &StoreValue::String(submission.loi_id.clone()),
    )?;
    store.update_document(
        &path::loi(survey_id, &submission.loi_id),
        StoreValue::map_of(vec![(
            doc::loi_field::SUBMISSION_COUNT,
            StoreValue::Integer(count as i64),
        )]),
    )?;
    Ok(count)
}




#[cfg(test)]
mod request_envelope {
    use super::super::model::Role;
    use super::super::test_helpers::{survey_with_acl, user};
    use super::helpers::{organizer_store, upload};
    use super::*;

    #[test]
    fn only_post_is_accepted() {
        let store = organizer_store();
        let orga = user("u-orga", "orga@example.com");
        let request = ImportRequest {
            method: "GET",
            parts: vec![],
        };
        let err = import(&store, &orga, request).unwrap_err();
        assert_eq!(err.status(), 405);
    }

    #[test]
    fn file_before_ids_is_rejected() {
        let store = organizer_store();
        let orga = user("u-orga", "orga@example.com");
        let body: &[u8] = b"lat,lng\n1,2\n";
        let request = ImportRequest {
            method: "POST",
            parts: vec![Part::File {
                filename: "sites.csv".into(),
                reader: Box::new(body),
            }],
        };
        let err = import(&store, &orga, request).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn data_collectors_may_not_import() {
        let store = organizer_store();
        let survey = survey_with_acl("s1", &[("collector@example.com", Role::DataCollector)]);
        store
            .update_document(&path::survey("s1"), doc::survey_to_doc(&survey))
            .unwrap();
        let collector = user("u-coll", "collector@example.com");
        let request = ImportRequest {
            method: "POST",
            parts: upload("sites.csv", b"lat,lng\n1,2\n"),
        };
        let err = import(&store, &collector, request).unwrap_err();
        assert_eq!(err.status(), 403);
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        let store = organizer_store();
        let orga = user("u-orga", "orga@example.com");
        let request = ImportRequest {
            method: "POST",
            parts: upload("sites.xlsx", b""),
        };
        let err = import(&store, &orga, request).unwrap_err();
        assert_eq!(err.status(), 400);
    }
}
