//! Codec between the store's field-numbered documents and the domain model.
//!
//! Wire tags are static per message type (the `*_field` tables below).
//! Decoding is tolerant: unknown keys are ignored, optional fields default,
//! and only a missing required field errors, as a [`ConversionError`] value.
//! Locations of interest may still carry a legacy named-key scheme; a
//! current-schema document is recognized by its job-id tag.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

use super::geom::{Coordinate, Geometry};
use super::model::{
    AuditInfo, Choice, DataVisibility, Job, LocationOfInterest, PropertyValue, Response, Role,
    Source, Submission, Survey, Task, TaskData, TaskType,
};
use super::store::StoreValue;

#[derive(Debug, Error, PartialEq)]
pub enum ConversionError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field: {0}")]
    InvalidField(&'static str),

    #[error("document is not a map")]
    NotADocument,
}

pub mod survey_field {
    pub const NAME: &str = "1";
    pub const ACL: &str = "2";
    pub const DATA_VISIBILITY: &str = "3";
}

pub mod job_field {
    pub const NAME: &str = "1";
    pub const INDEX: &str = "2";
    pub const COLOR: &str = "3";
    pub const TASKS: &str = "4";
}

pub mod task_field {
    pub const PROMPT: &str = "1";
    pub const INDEX: &str = "2";
    pub const REQUIRED: &str = "3";
    pub const TYPE: &str = "4";
    pub const OPTIONS: &str = "5";
    pub const HAS_OTHER_OPTION: &str = "6";
}

pub mod choice_field {
    pub const INDEX: &str = "1";
    pub const LABEL: &str = "2";
}

pub mod loi_field {
    /// Presence of this tag marks a current-schema document.
    pub const JOB_ID: &str = "2";
    pub const GEOMETRY: &str = "3";
    pub const SUBMISSION_COUNT: &str = "4";
    pub const OWNER_ID: &str = "5";
    pub const CUSTOM_TAG: &str = "6";
    pub const SOURCE: &str = "7";
    pub const PROPERTIES: &str = "8";
    pub const CREATED: &str = "9";
    pub const LAST_MODIFIED: &str = "10";
}

pub mod submission_field {
    pub const LOI_ID: &str = "2";
    pub const JOB_ID: &str = "3";
    pub const CREATED: &str = "4";
    pub const LAST_MODIFIED: &str = "5";
    pub const TASK_DATA: &str = "6";
}

pub mod task_data_field {
    pub const TASK_ID: &str = "1";
    pub const TEXT: &str = "2";
    pub const NUMBER: &str = "3";
    pub const DATE_TIME: &str = "4";
    pub const MULTIPLE_CHOICE: &str = "5";
    pub const CAPTURED_LOCATION: &str = "6";
    pub const DRAWN_GEOMETRY: &str = "7";
    pub const PHOTO: &str = "8";
}

pub mod multiple_choice_field {
    pub const OPTION_IDS: &str = "1";
    pub const OTHER: &str = "2";
}

pub mod property_field {
    pub const STRING: &str = "1";
    pub const NUMBER: &str = "2";
}

pub mod audit_field {
    pub const USER_ID: &str = "1";
    pub const DISPLAY_NAME: &str = "2";
    pub const EMAIL: &str = "3";
    pub const CLIENT_TIME: &str = "4";
    pub const SERVER_TIME: &str = "5";
}

mod legacy_key {
    pub const JOB_ID: &str = "jobId";
    pub const GEOMETRY: &str = "geometry";
    pub const PROPERTIES: &str = "properties";
    pub const CUSTOM_ID: &str = "customId";
}

type Map = BTreeMap<String, StoreValue>;

fn as_doc(value: &StoreValue) -> Result<&Map, ConversionError> {
    value.as_map().ok_or(ConversionError::NotADocument)
}

fn require_str(map: &Map, key: &str, field: &'static str) -> Result<String, ConversionError> {
    match map.get(key) {
        None => Err(ConversionError::MissingField(field)),
        Some(value) => value
            .as_str()
            .map(str::to_string)
            .ok_or(ConversionError::InvalidField(field)),
    }
}

fn opt_str(map: &Map, key: &str) -> Option<String> {
    map.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn int_or(map: &Map, key: &str, default: i64) -> i64 {
    map.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
}

/// Elements of an index-keyed map, in numeric key order.
fn sequence(value: &StoreValue) -> Vec<&StoreValue> {
    let mut keyed: Vec<(usize, &StoreValue)> = match value.as_map() {
        Some(map) => map
            .iter()
            .filter_map(|(k, v)| k.parse::<usize>().ok().map(|idx| (idx, v)))
            .collect(),
        None => vec![],
    };
    keyed.sort_by_key(|(idx, _)| *idx);
    keyed.into_iter().map(|(_, v)| v).collect()
}

fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

// Wire integers for the closed enums.

fn role_from_wire(wire: i64) -> Option<Role> {
    match wire {
        1 => Some(Role::Viewer),
        2 => Some(Role::DataCollector),
        3 => Some(Role::SurveyOrganizer),
        4 => Some(Role::Owner),
        _ => None,
    }
}

fn role_to_wire(role: Role) -> i64 {
    match role {
        Role::Viewer => 1,
        Role::DataCollector => 2,
        Role::SurveyOrganizer => 3,
        Role::Owner => 4,
    }
}

fn source_from_wire(wire: i64) -> Option<Source> {
    match wire {
        1 => Some(Source::Imported),
        2 => Some(Source::FieldData),
        _ => None,
    }
}

fn source_to_wire(source: Source) -> i64 {
    match source {
        Source::Imported => 1,
        Source::FieldData => 2,
    }
}

fn visibility_from_wire(wire: i64) -> Option<DataVisibility> {
    match wire {
        1 => Some(DataVisibility::AllSurveyParticipants),
        2 => Some(DataVisibility::ContributorAndOrganizers),
        _ => None,
    }
}

fn visibility_to_wire(visibility: DataVisibility) -> i64 {
    match visibility {
        DataVisibility::AllSurveyParticipants => 1,
        DataVisibility::ContributorAndOrganizers => 2,
    }
}

fn task_type_to_wire(kind: &TaskType) -> i64 {
    match kind {
        TaskType::Text => 1,
        TaskType::Number => 2,
        TaskType::DateTime => 3,
        TaskType::MultipleChoice { .. } => 4,
        TaskType::CaptureLocation => 5,
        TaskType::TakePhoto => 6,
        TaskType::DrawGeometry => 7,
    }
}

// ---- Survey ----

pub fn survey_from_doc(id: &str, data: &StoreValue) -> Result<Survey, ConversionError> {
    let map = as_doc(data)?;
    let acl = map
        .get(survey_field::ACL)
        .and_then(|v| v.as_map())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(email, wire)| {
                    let role = wire.as_i64().and_then(role_from_wire)?;
                    Some((email.clone(), role))
                })
                .collect()
        })
        .unwrap_or_default();
    let data_visibility = map
        .get(survey_field::DATA_VISIBILITY)
        .and_then(|v| v.as_i64())
        .and_then(visibility_from_wire)
        .unwrap_or(DataVisibility::AllSurveyParticipants);
    Ok(Survey {
        id: id.to_string(),
        name: opt_str(map, survey_field::NAME).unwrap_or_default(),
        acl,
        data_visibility,
    })
}

pub fn survey_to_doc(survey: &Survey) -> StoreValue {
    let acl = survey
        .acl
        .iter()
        .map(|(email, role)| (email.clone(), StoreValue::Integer(role_to_wire(*role))))
        .collect();
    StoreValue::map_of(vec![
        (survey_field::NAME, StoreValue::String(survey.name.clone())),
        (survey_field::ACL, StoreValue::Map(acl)),
        (
            survey_field::DATA_VISIBILITY,
            StoreValue::Integer(visibility_to_wire(survey.data_visibility)),
        ),
    ])
}

// ---- Job ----

fn choice_from_value(id: &str, value: &StoreValue) -> Option<Choice> {
    let map = value.as_map()?;
    Some(Choice {
        id: id.to_string(),
        index: int_or(map, choice_field::INDEX, 0) as i32,
        label: opt_str(map, choice_field::LABEL).unwrap_or_default(),
    })
}

fn task_kind_from_value(map: &Map) -> TaskType {
    let wire = int_or(map, task_field::TYPE, 1);
    match wire {
        2 => TaskType::Number,
        3 => TaskType::DateTime,
        4 => {
            let mut options: Vec<Choice> = map
                .get(task_field::OPTIONS)
                .and_then(|v| v.as_map())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|(id, v)| choice_from_value(id, v))
                        .collect()
                })
                .unwrap_or_default();
            options.sort_by_key(|choice| choice.index);
            TaskType::MultipleChoice {
                options,
                has_other_option: map
                    .get(task_field::HAS_OTHER_OPTION)
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            }
        }
        5 => TaskType::CaptureLocation,
        6 => TaskType::TakePhoto,
        7 => TaskType::DrawGeometry,
        _ => TaskType::Text,
    }
}

fn task_from_value(id: &str, value: &StoreValue) -> Option<Task> {
    let map = value.as_map()?;
    Some(Task {
        id: id.to_string(),
        prompt: opt_str(map, task_field::PROMPT).unwrap_or_default(),
        index: int_or(map, task_field::INDEX, 0) as i32,
        required: map
            .get(task_field::REQUIRED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        kind: task_kind_from_value(map),
    })
}

pub fn job_from_doc(id: &str, data: &StoreValue) -> Result<Job, ConversionError> {
    let map = as_doc(data)?;
    let tasks = map
        .get(job_field::TASKS)
        .and_then(|v| v.as_map())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(task_id, v)| Some((task_id.clone(), task_from_value(task_id, v)?)))
                .collect()
        })
        .unwrap_or_default();
    Ok(Job {
        id: id.to_string(),
        name: opt_str(map, job_field::NAME),
        index: int_or(map, job_field::INDEX, 0) as i32,
        color: opt_str(map, job_field::COLOR),
        tasks,
    })
}

fn task_to_value(task: &Task) -> StoreValue {
    let mut fields = vec![
        (task_field::PROMPT, StoreValue::String(task.prompt.clone())),
        (task_field::INDEX, StoreValue::Integer(task.index as i64)),
        (task_field::REQUIRED, StoreValue::Bool(task.required)),
        (
            task_field::TYPE,
            StoreValue::Integer(task_type_to_wire(&task.kind)),
        ),
    ];
    if let TaskType::MultipleChoice {
        options,
        has_other_option,
    } = &task.kind
    {
        let encoded = options
            .iter()
            .map(|choice| {
                (
                    choice.id.clone(),
                    StoreValue::map_of(vec![
                        (choice_field::INDEX, StoreValue::Integer(choice.index as i64)),
                        (choice_field::LABEL, StoreValue::String(choice.label.clone())),
                    ]),
                )
            })
            .collect();
        fields.push((task_field::OPTIONS, StoreValue::Map(encoded)));
        fields.push((
            task_field::HAS_OTHER_OPTION,
            StoreValue::Bool(*has_other_option),
        ));
    }
    StoreValue::map_of(fields)
}

pub fn job_to_doc(job: &Job) -> StoreValue {
    let mut fields = vec![(job_field::INDEX, StoreValue::Integer(job.index as i64))];
    if let Some(name) = &job.name {
        fields.push((job_field::NAME, StoreValue::String(name.clone())));
    }
    if let Some(color) = &job.color {
        fields.push((job_field::COLOR, StoreValue::String(color.clone())));
    }
    let tasks = job
        .tasks
        .iter()
        .map(|(task_id, task)| (task_id.clone(), task_to_value(task)))
        .collect();
    fields.push((job_field::TASKS, StoreValue::Map(tasks)));
    StoreValue::map_of(fields)
}

// ---- Properties ----

/// A property value document holds the string tag, the number tag, or both.
/// When both are present the string wins; the source system kept that
/// precedence and downstream exports rely on it.
fn property_from_value(value: &StoreValue) -> Option<PropertyValue> {
    let map = value.as_map()?;
    if let Some(s) = map.get(property_field::STRING).and_then(|v| v.as_str()) {
        return Some(PropertyValue::String(s.to_string()));
    }
    map.get(property_field::NUMBER)
        .and_then(|v| v.as_f64())
        .map(PropertyValue::Number)
}

fn property_to_value(value: &PropertyValue) -> StoreValue {
    match value {
        PropertyValue::String(s) => {
            StoreValue::map_of(vec![(property_field::STRING, StoreValue::String(s.clone()))])
        }
        PropertyValue::Number(n) => {
            StoreValue::map_of(vec![(property_field::NUMBER, StoreValue::Real(*n))])
        }
    }
}

/// Properties are an ordered sequence of {key, value} pairs so that the
/// first-seen column order of the originating import survives a round trip.
fn properties_from_value(value: &StoreValue) -> Vec<(String, PropertyValue)> {
    sequence(value)
        .into_iter()
        .filter_map(|entry| {
            let key = entry.get("1")?.as_str()?.to_string();
            let value = property_from_value(entry.get("2")?)?;
            Some((key, value))
        })
        .collect()
}

fn properties_to_value(properties: &[(String, PropertyValue)]) -> StoreValue {
    StoreValue::sequence_of(
        properties
            .iter()
            .map(|(key, value)| {
                StoreValue::map_of(vec![
                    ("1", StoreValue::String(key.clone())),
                    ("2", property_to_value(value)),
                ])
            })
            .collect(),
    )
}

// ---- Location of interest ----

pub fn loi_from_doc(id: &str, data: &StoreValue) -> Result<LocationOfInterest, ConversionError> {
    let map = as_doc(data)?;
    if map.contains_key(loi_field::JOB_ID) {
        current_loi_from_doc(id, map)
    } else {
        legacy_loi_from_doc(id, map)
    }
}

fn decode_geometry(
    map: &Map,
    key: &str,
    field: &'static str,
) -> Result<Geometry, ConversionError> {
    match map.get(key) {
        None => Err(ConversionError::MissingField(field)),
        Some(value) => {
            Geometry::from_store_value(value).ok_or(ConversionError::InvalidField(field))
        }
    }
}

fn current_loi_from_doc(id: &str, map: &Map) -> Result<LocationOfInterest, ConversionError> {
    let job_id = require_str(map, loi_field::JOB_ID, "jobId")?;
    let geometry = decode_geometry(map, loi_field::GEOMETRY, "geometry")?;
    let properties = map
        .get(loi_field::PROPERTIES)
        .map(properties_from_value)
        .unwrap_or_default();
    let source = map
        .get(loi_field::SOURCE)
        .and_then(|v| v.as_i64())
        .and_then(source_from_wire)
        .unwrap_or(Source::FieldData);
    Ok(LocationOfInterest {
        id: id.to_string(),
        job_id,
        geometry,
        properties,
        custom_tag: opt_str(map, loi_field::CUSTOM_TAG),
        source,
        owner_id: opt_str(map, loi_field::OWNER_ID),
        submission_count: int_or(map, loi_field::SUBMISSION_COUNT, 0),
        created: map.get(loi_field::CREATED).and_then(audit_from_value),
        last_modified: map.get(loi_field::LAST_MODIFIED).and_then(audit_from_value),
    })
}

/// Decode the named-key scheme that predates the field numbers. Property
/// values were written directly (no string/number tags) and insertion order
/// was not recorded, so key order follows the store's map order.
fn legacy_loi_from_doc(id: &str, map: &Map) -> Result<LocationOfInterest, ConversionError> {
    let job_id = require_str(map, legacy_key::JOB_ID, "jobId")?;
    let geometry = decode_geometry(map, legacy_key::GEOMETRY, "geometry")?;
    let properties = map
        .get(legacy_key::PROPERTIES)
        .and_then(|v| v.as_map())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(key, value)| {
                    let value = match value {
                        StoreValue::String(s) => PropertyValue::String(s.clone()),
                        StoreValue::Integer(n) => PropertyValue::Number(*n as f64),
                        StoreValue::Real(n) => PropertyValue::Number(*n),
                        _ => return None,
                    };
                    Some((key.clone(), value))
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(LocationOfInterest {
        id: id.to_string(),
        job_id,
        geometry,
        properties,
        custom_tag: opt_str(map, legacy_key::CUSTOM_ID),
        source: Source::FieldData,
        owner_id: None,
        submission_count: 0,
        created: None,
        last_modified: None,
    })
}

pub fn loi_to_doc(loi: &LocationOfInterest) -> StoreValue {
    let mut fields = vec![
        (loi_field::JOB_ID, StoreValue::String(loi.job_id.clone())),
        (loi_field::GEOMETRY, loi.geometry.to_store_value()),
        (
            loi_field::SUBMISSION_COUNT,
            StoreValue::Integer(loi.submission_count),
        ),
        (
            loi_field::SOURCE,
            StoreValue::Integer(source_to_wire(loi.source)),
        ),
        (
            loi_field::PROPERTIES,
            properties_to_value(&loi.properties),
        ),
    ];
    if let Some(owner_id) = &loi.owner_id {
        fields.push((loi_field::OWNER_ID, StoreValue::String(owner_id.clone())));
    }
    if let Some(custom_tag) = &loi.custom_tag {
        fields.push((loi_field::CUSTOM_TAG, StoreValue::String(custom_tag.clone())));
    }
    if let Some(created) = &loi.created {
        fields.push((loi_field::CREATED, audit_to_value(created)));
    }
    if let Some(last_modified) = &loi.last_modified {
        fields.push((loi_field::LAST_MODIFIED, audit_to_value(last_modified)));
    }
    StoreValue::map_of(fields)
}

// ---- Audit info ----

fn audit_from_value(value: &StoreValue) -> Option<AuditInfo> {
    let map = value.as_map()?;
    Some(AuditInfo {
        user_id: opt_str(map, audit_field::USER_ID)?,
        display_name: opt_str(map, audit_field::DISPLAY_NAME).unwrap_or_default(),
        email: opt_str(map, audit_field::EMAIL),
        client_time: map
            .get(audit_field::CLIENT_TIME)
            .and_then(|v| v.as_i64())
            .and_then(timestamp_from_millis),
        server_time: map
            .get(audit_field::SERVER_TIME)
            .and_then(|v| v.as_i64())
            .and_then(timestamp_from_millis)?,
    })
}

fn audit_to_value(audit: &AuditInfo) -> StoreValue {
    let mut fields = vec![
        (audit_field::USER_ID, StoreValue::String(audit.user_id.clone())),
        (
            audit_field::DISPLAY_NAME,
            StoreValue::String(audit.display_name.clone()),
        ),
        (
            audit_field::SERVER_TIME,
            StoreValue::Integer(audit.server_time.timestamp_millis()),
        ),
    ];
    if let Some(email) = &audit.email {
        fields.push((audit_field::EMAIL, StoreValue::String(email.clone())));
    }
    if let Some(client_time) = &audit.client_time {
        fields.push((
            audit_field::CLIENT_TIME,
            StoreValue::Integer(client_time.timestamp_millis()),
        ));
    }
    StoreValue::map_of(fields)
}

// ---- Submission ----

fn response_from_entry(map: &Map) -> Option<Response> {
    if let Some(text) = map.get(task_data_field::TEXT).and_then(|v| v.as_str()) {
        return Some(Response::Text(text.to_string()));
    }
    if let Some(number) = map.get(task_data_field::NUMBER).and_then(|v| v.as_f64()) {
        return Some(Response::Number(number));
    }
    if let Some(instant) = map
        .get(task_data_field::DATE_TIME)
        .and_then(|v| v.as_i64())
        .and_then(timestamp_from_millis)
    {
        return Some(Response::DateTime(instant));
    }
    if let Some(choice) = map.get(task_data_field::MULTIPLE_CHOICE) {
        let option_ids = choice
            .get(multiple_choice_field::OPTION_IDS)
            .map(|ids| {
                sequence(ids)
                    .into_iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let other = choice
            .get(multiple_choice_field::OTHER)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        return Some(Response::MultipleChoice { option_ids, other });
    }
    if let Some(StoreValue::GeoPoint { lat, lng }) = map.get(task_data_field::CAPTURED_LOCATION) {
        return Some(Response::CapturedLocation(Coordinate::new(*lng, *lat)));
    }
    if let Some(drawn) = map
        .get(task_data_field::DRAWN_GEOMETRY)
        .and_then(Geometry::from_store_value)
    {
        return Some(Response::DrawnGeometry(drawn));
    }
    if let Some(photo) = map.get(task_data_field::PHOTO).and_then(|v| v.as_str()) {
        return Some(Response::Photo(photo.to_string()));
    }
    None
}

fn task_data_from_value(value: &StoreValue) -> Vec<TaskData> {
    sequence(value)
        .into_iter()
        .filter_map(|entry| {
            let map = entry.as_map()?;
            let task_id = opt_str(map, task_data_field::TASK_ID)?;
            let response = response_from_entry(map)?;
            Some(TaskData { task_id, response })
        })
        .collect()
}

fn response_to_fields(response: &Response) -> (&'static str, StoreValue) {
    match response {
        Response::Text(text) => (task_data_field::TEXT, StoreValue::String(text.clone())),
        Response::Number(number) => (task_data_field::NUMBER, StoreValue::Real(*number)),
        Response::DateTime(instant) => (
            task_data_field::DATE_TIME,
            StoreValue::Integer(instant.timestamp_millis()),
        ),
        Response::MultipleChoice { option_ids, other } => {
            let mut fields = vec![(
                multiple_choice_field::OPTION_IDS,
                StoreValue::sequence_of(
                    option_ids
                        .iter()
                        .map(|id| StoreValue::String(id.clone()))
                        .collect(),
                ),
            )];
            if let Some(other) = other {
                fields.push((multiple_choice_field::OTHER, StoreValue::String(other.clone())));
            }
            (task_data_field::MULTIPLE_CHOICE, StoreValue::map_of(fields))
        }
        Response::CapturedLocation(coordinate) => (
            task_data_field::CAPTURED_LOCATION,
            StoreValue::GeoPoint {
                lat: coordinate.lat,
                lng: coordinate.lng,
            },
        ),
        Response::DrawnGeometry(geometry) => {
            (task_data_field::DRAWN_GEOMETRY, geometry.to_store_value())
        }
        Response::Photo(path) => (task_data_field::PHOTO, StoreValue::String(path.clone())),
    }
}

fn task_data_to_value(task_data: &[TaskData]) -> StoreValue {
    StoreValue::sequence_of(
        task_data
            .iter()
            .map(|entry| {
                let (tag, encoded) = response_to_fields(&entry.response);
                StoreValue::map_of(vec![
                    (
                        task_data_field::TASK_ID,
                        StoreValue::String(entry.task_id.clone()),
                    ),
                    (tag, encoded),
                ])
            })
            .collect(),
    )
}

pub fn submission_from_doc(id: &str, data: &StoreValue) -> Result<Submission, ConversionError> {
    let map = as_doc(data)?;
    let loi_id = require_str(map, submission_field::LOI_ID, "loiId")?;
    let job_id = require_str(map, submission_field::JOB_ID, "jobId")?;
    Ok(Submission {
        id: id.to_string(),
        loi_id,
        job_id,
        task_data: map
            .get(submission_field::TASK_DATA)
            .map(task_data_from_value)
            .unwrap_or_default(),
        created: map.get(submission_field::CREATED).and_then(audit_from_value),
        last_modified: map
            .get(submission_field::LAST_MODIFIED)
            .and_then(audit_from_value),
    })
}

pub fn submission_to_doc(submission: &Submission) -> StoreValue {
    let mut fields = vec![
        (
            submission_field::LOI_ID,
            StoreValue::String(submission.loi_id.clone()),
        ),
        (
            submission_field::JOB_ID,
            StoreValue::String(submission.job_id.clone()),
        ),
        (
            submission_field::TASK_DATA,
            task_data_to_value(&submission.task_data),
        ),
    ];
    if let Some(created) = &submission.created {
        fields.push((submission_field::CREATED, audit_to_value(created)));
    }
    if let Some(last_modified) = &submission.last_modified {
        fields.push((submission_field::LAST_MODIFIED, audit_to_value(last_modified)));
    }
    StoreValue::map_of(fields)
}


#[cfg(test)]
mod submission_codec {
    use super::*;
    use crate::test_helpers::{audit, point_loi};

    fn full_submission() -> Submission {
        Submission {
            id: "sub-1".into(),
            loi_id: "loi-1".into(),
            job_id: "job-1".into(),
            task_data: vec![
                TaskData {
                    task_id: "t1".into(),
                    response: Response::Text("fine".into()),
                },
                TaskData {
                    task_id: "t2".into(),
                    response: Response::Number(12.5),
                },
                TaskData {
                    task_id: "t3".into(),
                    response: Response::MultipleChoice {
                        option_ids: vec!["o1".into(), "o2".into()],
                        other: Some("something else".into()),
                    },
                },
                TaskData {
                    task_id: "t4".into(),
                    response: Response::CapturedLocation(Coordinate::new(125.6, 10.1)),
                },
                TaskData {
                    task_id: "t5".into(),
                    response: Response::DrawnGeometry(point_loi("x", "j", 1.0, 2.0).geometry),
                },
                TaskData {
                    task_id: "t6".into(),
                    response: Response::Photo("photos/abc.jpg".into()),
                },
            ],
            created: Some(audit("user-1", "Ada", 1_600_000_000_000)),
            last_modified: Some(audit("user-1", "Ada", 1_600_000_000_000)),
        }
    }

    #[test]
    fn round_trips_required_complete_documents() {
        let submission = full_submission();
        let back = submission_from_doc("sub-1", &submission_to_doc(&submission)).unwrap();
        assert_eq!(back, submission);
    }

    #[test]
    fn missing_loi_id_is_an_error() {
        let doc = StoreValue::map_of(vec![(
            submission_field::JOB_ID,
            StoreValue::String("job-1".into()),
        )]);
        assert_eq!(
            submission_from_doc("x", &doc),
            Err(ConversionError::MissingField("loiId"))
        );
    }

    #[test]
    fn entries_without_a_recognized_response_are_dropped() {
        let mut submission = full_submission();
        submission.task_data.truncate(1);
        let mut doc = submission_to_doc(&submission);
        // Append an entry carrying only a task id.
        let empty_entry = StoreValue::map_of(vec![(
            task_data_field::TASK_ID,
            StoreValue::String("t9".into()),
        )]);
        if let StoreValue::Map(map) = &mut doc {
            if let Some(StoreValue::Map(entries)) = map.get_mut(submission_field::TASK_DATA) {
                entries.insert("1".into(), empty_entry);
            }
        }
        let back = submission_from_doc("sub-1", &doc).unwrap();
        assert_eq!(back.task_data.len(), 1);
    }
}
