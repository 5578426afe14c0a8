//! Fixture builders shared by unit and integration tests.

use chrono::TimeZone;
use chrono::Utc;
use std::collections::BTreeMap;

use super::geom::{Coordinate, Geometry};
use super::model::{
    AuditInfo, Choice, DataVisibility, Job, LocationOfInterest, Role, Source, Submission, Survey,
    Task, TaskData, TaskType, User,
};

#[allow(dead_code)]
pub fn user(id: &str, email: &str) -> User {
    User {
        id: id.to_string(),
        email: email.to_string(),
        display_name: format!("User {}", id),
    }
}

#[allow(dead_code)]
pub fn survey_with_acl(id: &str, grants: &[(&str, Role)]) -> Survey {
    let acl: BTreeMap<String, Role> = grants
        .iter()
        .map(|(email, role)| (email.to_string(), *role))
        .collect();
    Survey {
        id: id.to_string(),
        name: format!("Survey {}", id),
        acl,
        data_visibility: DataVisibility::AllSurveyParticipants,
    }
}

#[allow(dead_code)]
pub fn point_loi(id: &str, job_id: &str, lng: f64, lat: f64) -> LocationOfInterest {
    LocationOfInterest {
        id: id.to_string(),
        job_id: job_id.to_string(),
        geometry: Geometry::Point(Coordinate::new(lng, lat)),
        properties: vec![],
        custom_tag: None,
        source: Source::FieldData,
        owner_id: None,
        submission_count: 0,
        created: None,
        last_modified: None,
    }
}

#[allow(dead_code)]
pub fn audit(user_id: &str, display_name: &str, millis: i64) -> AuditInfo {
    AuditInfo {
        user_id: user_id.to_string(),
        display_name: display_name.to_string(),
        email: None,
        client_time: None,
        server_time: Utc.timestamp_millis_opt(millis).unwrap(),
    }
}

#[allow(dead_code)]
pub fn text_task(id: &str, prompt: &str, index: i32) -> Task {
    Task {
        id: id.to_string(),
        prompt: prompt.to_string(),
        index,
        required: false,
        kind: TaskType::Text,
    }
}

#[allow(dead_code)]
pub fn choice_task(id: &str, prompt: &str, index: i32, labels: &[(&str, &str)]) -> Task {
    let options = labels
        .iter()
        .enumerate()
        .map(|(idx, (option_id, label))| Choice {
            id: option_id.to_string(),
            index: idx as i32,
            label: label.to_string(),
        })
        .collect();
    Task {
        id: id.to_string(),
        prompt: prompt.to_string(),
        index,
        required: false,
        kind: TaskType::MultipleChoice {
            options,
            has_other_option: true,
        },
    }
}

#[allow(dead_code)]
pub fn job_with_tasks(id: &str, name: &str, tasks: Vec<Task>) -> Job {
    let tasks = tasks
        .into_iter()
        .map(|task| (task.id.clone(), task))
        .collect();
    Job {
        id: id.to_string(),
        name: Some(name.to_string()),
        index: 0,
        color: Some("#ff9900".to_string()),
        tasks,
    }
}

#[allow(dead_code)]
pub fn submission_with(id: &str, loi_id: &str, job_id: &str, task_data: Vec<TaskData>) -> Submission {
    Submission {
        id: id.to_string(),
        loi_id: loi_id.to_string(),
        job_id: job_id.to_string(),
        task_data,
        created: Some(audit("user-1", "Ada Lovelace", 1_600_000_000_000)),
        last_modified: None,
    }
}
