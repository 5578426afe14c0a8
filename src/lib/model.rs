use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::geom::{Coordinate, Geometry};

/// The authenticated caller, as the host's session layer hands it over.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
}

/// Roles a survey's ACL can grant, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer,
    DataCollector,
    SurveyOrganizer,
    Owner,
}

/// Whether non-organizers see all field-collected data or only their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataVisibility {
    AllSurveyParticipants,
    ContributorAndOrganizers,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Survey {
    pub id: String,
    pub name: String,
    /// User email → granted role.
    pub acl: BTreeMap<String, Role>,
    pub data_visibility: DataVisibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Imported,
    FieldData,
}

/// A free-form LOI property. Values come straight from import data and are
/// either textual or numeric.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Number(f64),
}

impl From<&PropertyValue> for serde_json::Value {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::String(s) => serde_json::Value::from(s.as_str()),
            PropertyValue::Number(n) => serde_json::Value::from(*n),
        }
    }
}

/// A georeferenced location of interest within one job.
///
/// Properties keep their first-seen order; the CSV export header depends
/// on it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationOfInterest {
    pub id: String,
    pub job_id: String,
    pub geometry: Geometry,
    pub properties: Vec<(String, PropertyValue)>,
    pub custom_tag: Option<String>,
    pub source: Source,
    pub owner_id: Option<String>,
    /// Derived; recomputed whenever a submission is written.
    pub submission_count: i64,
    pub created: Option<AuditInfo>,
    pub last_modified: Option<AuditInfo>,
}

impl LocationOfInterest {
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Who touched a record and when. The server timestamp is authoritative;
/// the client clock is advisory.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditInfo {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub client_time: Option<DateTime<Utc>>,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Text(String),
    Number(f64),
    DateTime(DateTime<Utc>),
    MultipleChoice {
        option_ids: Vec<String>,
        other: Option<String>,
    },
    CapturedLocation(Coordinate),
    DrawnGeometry(Geometry),
    Photo(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskData {
    pub task_id: String,
    pub response: Response,
}

/// One completed response set for a job's tasks, tied to one LOI.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: String,
    pub loi_id: String,
    pub job_id: String,
    pub task_data: Vec<TaskData>,
    pub created: Option<AuditInfo>,
    pub last_modified: Option<AuditInfo>,
}

impl Submission {
    pub fn response_to(&self, task_id: &str) -> Option<&Response> {
        self.task_data
            .iter()
            .find(|entry| entry.task_id == task_id)
            .map(|entry| &entry.response)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub id: String,
    pub index: i32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskType {
    Text,
    Number,
    DateTime,
    MultipleChoice {
        options: Vec<Choice>,
        has_other_option: bool,
    },
    CaptureLocation,
    TakePhoto,
    DrawGeometry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub prompt: String,
    pub index: i32,
    pub required: bool,
    pub kind: TaskType,
}

impl Task {
    /// Resolve a multiple-choice option label by id.
    pub fn option_label(&self, option_id: &str) -> Option<&str> {
        match &self.kind {
            TaskType::MultipleChoice { options, .. } => options
                .iter()
                .find(|choice| choice.id == option_id)
                .map(|choice| choice.label.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub name: Option<String>,
    pub index: i32,
    pub color: Option<String>,
    pub tasks: BTreeMap<String, Task>,
}

impl Job {
    /// Tasks in display order.
    pub fn ordered_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by_key(|task| task.index);
        tasks
    }
}
