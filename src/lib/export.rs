//! Export pipelines: join locations of interest with their submissions and
//! stream CSV rows, GeoJSON features, or KML placemarks into a sink.
//!
//! Preconditions fail closed before the first byte is written; after that,
//! bad records are logged and skipped.

use itertools::Itertools;
use std::collections::HashMap;
use std::io::Write;
use tracing::warn;

use super::acl;
use super::doc;
use super::error::Error;
use super::geojson;
use super::model::{
    Job, LocationOfInterest, PropertyValue, Response, Role, Submission, Survey, Task, User,
};
use super::store::{path, FieldFilter, Store, StoreValue};

pub struct ExportRequest<'a> {
    pub user: &'a User,
    pub survey_id: &'a str,
    pub job_id: &'a str,
}

/// What the host needs to finish the HTTP response around the streamed body.
#[derive(Debug, PartialEq)]
pub struct ExportOutput {
    pub filename: String,
    pub content_type: &'static str,
}

struct ExportContext {
    survey: Survey,
    job: Job,
    lois: Vec<LocationOfInterest>,
    submissions_by_loi: HashMap<String, Vec<Submission>>,
    /// `Some(user id)` restricts field-collected LOIs to that collector;
    /// organizers and owners see everything.
    owner_filter: Option<String>,
}

impl ExportContext {
    fn visible_lois(&self) -> impl Iterator<Item = &LocationOfInterest> {
        self.lois.iter().filter(move |loi| {
            acl::is_accessible_loi(&self.survey, loi, self.owner_filter.as_deref())
        })
    }
}

/// Fetch and decode everything the row emitters need. Submissions for the
/// whole job are indexed in memory by LOI id.
fn load_context(store: &dyn Store, request: &ExportRequest) -> Result<ExportContext, Error> {
    let survey_doc = store
        .fetch_document(&path::survey(request.survey_id))?
        .ok_or_else(|| Error::NotFound(format!("survey {}", request.survey_id)))?;
    let survey = doc::survey_from_doc(&survey_doc.id, &survey_doc.data)?;

    if !acl::can_export(request.user, &survey) {
        return Err(Error::PermissionDenied(format!(
            "{} has no role on survey {}",
            request.user.email, survey.id
        )));
    }

    let job_doc = store
        .fetch_document(&path::job(request.survey_id, request.job_id))?
        .ok_or_else(|| Error::NotFound(format!("job {}", request.job_id)))?;
    let job = doc::job_from_doc(&job_doc.id, &job_doc.data)?;

    // The LOI collection is fetched unfiltered: legacy documents carry the
    // job id under a named key the store cannot match against the wire tag.
    let lois: Vec<LocationOfInterest> = store
        .fetch_collection(&path::lois(request.survey_id), None)?
        .iter()
        .filter_map(|d| match doc::loi_from_doc(&d.id, &d.data) {
            Ok(loi) => Some(loi),
            Err(err) => {
                warn!(loi = %d.id, %err, "skipping undecodable LOI");
                None
            }
        })
        .filter(|loi| loi.job_id == request.job_id)
        .collect();

    let filter = FieldFilter {
        field: doc::submission_field::JOB_ID,
        equals: StoreValue::String(request.job_id.to_string()),
    };
    let mut submissions_by_loi: HashMap<String, Vec<Submission>> = HashMap::new();
    for d in store.fetch_collection(&path::submissions(request.survey_id), Some(&filter))? {
        match doc::submission_from_doc(&d.id, &d.data) {
            Ok(mut submission) => {
                // Entries for tasks the job no longer defines are dropped,
                // not errored; the task was deleted after the submission.
                submission
                    .task_data
                    .retain(|entry| job.tasks.contains_key(&entry.task_id));
                submissions_by_loi
                    .entry(submission.loi_id.clone())
                    .or_default()
                    .push(submission);
            }
            Err(err) => warn!(submission = %d.id, %err, "skipping undecodable submission"),
        }
    }

    let owner_filter = match acl::role_of(request.user, &survey) {
        Some(role) if role >= Role::SurveyOrganizer => None,
        _ => Some(request.user.id.clone()),
    };

    Ok(ExportContext {
        survey,
        job,
        lois,
        submissions_by_loi,
        owner_filter,
    })
}

/// Attachment file name stem: lowercased job name with non-alphanumeric runs
/// collapsed to `-`.
fn filename_slug(job: &Job) -> String {
    let name = match &job.name {
        Some(name) if !name.trim().is_empty() => name,
        _ => return "ground-export".to_string(),
    };
    let mut slug = String::new();
    let mut gap = false;
    for ch in name.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            if gap && !slug.is_empty() {
                slug.push('-');
            }
            gap = false;
            slug.push(ch);
        } else {
            gap = true;
        }
    }
    if slug.is_empty() {
        "ground-export".to_string()
    } else {
        slug
    }
}

// ---- CSV ----

/// One CSV field. The quoting contract is fixed: text is always quoted with
/// embedded quotes doubled, numbers are bare, absent values are empty.
enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    fn render(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Number(n) => n.to_string(),
            Cell::Text(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        }
    }

    fn text(s: impl Into<String>) -> Cell {
        Cell::Text(s.into())
    }
}

fn write_row(writer: &mut dyn Write, cells: &[Cell]) -> std::io::Result<()> {
    let line = cells.iter().map(Cell::render).join(",");
    writeln!(writer, "{}", line)
}

/// Property column keys in first-seen order across all LOIs of the job.
fn property_columns(lois: &[LocationOfInterest]) -> Vec<String> {
    lois.iter()
        .flat_map(|loi| loi.properties.iter().map(|(key, _)| key.clone()))
        .unique()
        .collect()
}

fn property_cell(loi: &LocationOfInterest, key: &str) -> Cell {
    match loi.property(key) {
        None => Cell::Empty,
        Some(PropertyValue::String(s)) => Cell::text(s.clone()),
        Some(PropertyValue::Number(n)) => Cell::Number(*n),
    }
}

/// Render one task's answer. Dispatch is on the populated response variant,
/// not the declared task type.
fn task_cell(task: &Task, submission: Option<&Submission>) -> Cell {
    let response = match submission.and_then(|s| s.response_to(&task.id)) {
        Some(response) => response,
        None => return Cell::Empty,
    };
    match response {
        Response::Text(text) => Cell::text(text.clone()),
        Response::Number(number) => Cell::Number(*number),
        Response::DateTime(instant) => {
            Cell::text(instant.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        }
        Response::MultipleChoice { option_ids, other } => {
            let mut labels: Vec<&str> = option_ids
                .iter()
                .map(|id| task.option_label(id).unwrap_or("#ERR"))
                .collect();
            if let Some(other) = other {
                labels.push(other.as_str());
            }
            Cell::text(labels.join(","))
        }
        Response::CapturedLocation(coordinate) => {
            Cell::text(super::geom::Geometry::Point(*coordinate).to_wkt())
        }
        Response::DrawnGeometry(geometry) => Cell::text(geometry.to_wkt()),
        Response::Photo(photo) => Cell::text(photo.clone()),
    }
}

fn contributor_cells(submission: Option<&Submission>) -> (Cell, Cell) {
    let created = match submission.and_then(|s| s.created.as_ref()) {
        Some(created) => created,
        None => return (Cell::Empty, Cell::Empty),
    };
    let email = match &created.email {
        Some(email) => Cell::text(email.clone()),
        None => Cell::Empty,
    };
    (Cell::text(created.display_name.clone()), email)
}

fn csv_row(
    loi: &LocationOfInterest,
    submission: Option<&Submission>,
    property_keys: &[String],
    tasks: &[&Task],
) -> Vec<Cell> {
    let mut cells = Vec::with_capacity(4 + property_keys.len() + tasks.len());
    cells.push(match &loi.custom_tag {
        Some(tag) => Cell::text(tag.clone()),
        None => Cell::Empty,
    });
    cells.push(Cell::text(loi.geometry.to_wkt()));
    for key in property_keys {
        cells.push(property_cell(loi, key));
    }
    for task in tasks {
        cells.push(task_cell(task, submission));
    }
    let (name, email) = contributor_cells(submission);
    cells.push(name);
    cells.push(email);
    cells
}

/// Stream a CSV export: one row per (LOI, submission) pair, and one row with
/// empty task columns for each LOI without submissions.
pub fn export_csv(
    store: &dyn Store,
    request: &ExportRequest,
    writer: &mut dyn Write,
) -> Result<ExportOutput, Error> {
    let ctx = load_context(store, request)?;
    let tasks = ctx.job.ordered_tasks();
    let property_keys = property_columns(&ctx.lois);

    let mut header: Vec<Cell> = vec![Cell::text("system:index"), Cell::text("geometry")];
    header.extend(property_keys.iter().map(|key| Cell::text(key.clone())));
    header.extend(tasks.iter().map(|task| Cell::text(task.prompt.clone())));
    header.push(Cell::text("contributor_name"));
    header.push(Cell::text("contributor_email"));
    write_row(writer, &header)?;

    for loi in ctx.visible_lois() {
        match ctx.submissions_by_loi.get(&loi.id) {
            Some(submissions) if !submissions.is_empty() => {
                for submission in submissions {
                    write_row(
                        writer,
                        &csv_row(loi, Some(submission), &property_keys, &tasks),
                    )?;
                }
            }
            _ => write_row(writer, &csv_row(loi, None, &property_keys, &tasks))?,
        }
    }

    Ok(ExportOutput {
        filename: format!("{}.csv", filename_slug(&ctx.job)),
        content_type: "text/csv",
    })
}

// ---- GeoJSON ----

fn feature_of(loi: &LocationOfInterest) -> geojson::Entity {
    let properties: serde_json::Map<String, serde_json::Value> = loi
        .properties
        .iter()
        .map(|(key, value)| (key.clone(), serde_json::Value::from(value)))
        .collect();
    geojson::Entity::Feature {
        id: Some(
            loi.custom_tag
                .clone()
                .unwrap_or_else(|| loi.id.clone()),
        ),
        properties,
        geometry: loi.geometry.to_geojson(),
    }
}

/// Stream a GeoJSON FeatureCollection, one feature per visible LOI. Memory
/// stays bounded by a single record regardless of collection size.
pub fn export_geojson(
    store: &dyn Store,
    request: &ExportRequest,
    writer: &mut dyn Write,
) -> Result<ExportOutput, Error> {
    let ctx = load_context(store, request)?;
    write!(writer, "{{\"type\":\"FeatureCollection\",\"features\":[")?;
    let mut first = true;
    for loi in ctx.visible_lois() {
        let json = serde_json::to_string(&feature_of(loi)).map_err(std::io::Error::from)?;
        if !first {
            write!(writer, ",")?;
        }
        write!(writer, "{}", json)?;
        first = false;
    }
    writeln!(writer, "]}}")?;
    Ok(ExportOutput {
        filename: format!("{}.geojson", filename_slug(&ctx.job)),
        content_type: "application/json",
    })
}

// ---- KML ----

fn xml_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn kml_ring(ring: &super::geom::LinearRing) -> String {
    ring.0
        .iter()
        .map(|c| format!("{},{}", c.lng, c.lat))
        .join(" ")
}

fn write_kml_polygon(
    writer: &mut dyn Write,
    polygon: &super::geom::Polygon,
) -> std::io::Result<()> {
    writeln!(writer, "<Polygon>")?;
    writeln!(
        writer,
        "<outerBoundaryIs><LinearRing><coordinates>{}</coordinates></LinearRing></outerBoundaryIs>",
        kml_ring(&polygon.shell)
    )?;
    for hole in &polygon.holes {
        writeln!(
            writer,
            "<innerBoundaryIs><LinearRing><coordinates>{}</coordinates></LinearRing></innerBoundaryIs>",
            kml_ring(hole)
        )?;
    }
    writeln!(writer, "</Polygon>")
}

fn write_kml_geometry(
    writer: &mut dyn Write,
    geometry: &super::geom::Geometry,
) -> std::io::Result<()> {
    use super::geom::Geometry;
    match geometry {
        Geometry::Point(c) => writeln!(
            writer,
            "<Point><coordinates>{},{}</coordinates></Point>",
            c.lng, c.lat
        ),
        Geometry::Polygon(polygon) => write_kml_polygon(writer, polygon),
        Geometry::MultiPolygon(polygons) => {
            writeln!(writer, "<MultiGeometry>")?;
            for polygon in polygons {
                write_kml_polygon(writer, polygon)?;
            }
            writeln!(writer, "</MultiGeometry>")
        }
    }
}

fn write_placemark(writer: &mut dyn Write, loi: &LocationOfInterest) -> std::io::Result<()> {
    writeln!(writer, "<Placemark>")?;
    let name = loi.custom_tag.as_deref().unwrap_or(&loi.id);
    writeln!(writer, "<name>{}</name>", xml_escape(name))?;
    if !loi.properties.is_empty() {
        writeln!(writer, "<ExtendedData>")?;
        for (key, value) in &loi.properties {
            let rendered = match value {
                PropertyValue::String(s) => xml_escape(s),
                PropertyValue::Number(n) => n.to_string(),
            };
            writeln!(
                writer,
                "<Data name=\"{}\"><value>{}</value></Data>",
                xml_escape(key),
                rendered
            )?;
        }
        writeln!(writer, "</ExtendedData>")?;
    }
    write_kml_geometry(writer, &loi.geometry)?;
    writeln!(writer, "</Placemark>")
}

/// Stream a KML document, one placemark per visible LOI.
pub fn export_kml(
    store: &dyn Store,
    request: &ExportRequest,
    writer: &mut dyn Write,
) -> Result<ExportOutput, Error> {
    let ctx = load_context(store, request)?;
    writeln!(writer, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
    writeln!(writer, "<kml xmlns=\"http://www.opengis.net/kml/2.2\">")?;
    writeln!(writer, "<Document>")?;
    let document_name = ctx.job.name.as_deref().unwrap_or(&ctx.survey.name);
    writeln!(writer, "<name>{}</name>", xml_escape(document_name))?;
    for loi in ctx.visible_lois() {
        write_placemark(writer, loi)?;
    }
    writeln!(writer, "</Document>")?;
    writeln!(writer, "</kml>")?;
    Ok(ExportOutput {
        filename: format!("{}.kml", filename_slug(&ctx.job)),
        content_type: "application/vnd.google-earth.kml+xml",
    })
}


#[cfg(test)]
mod export_csv_rows {
    use super::super::model::TaskData;
    use super::super::test_helpers::*;
    use super::helpers::{export_csv_string, seed};
    use super::*;

    #[test]
    fn dinagat_scenario_byte_for_byte() {
        let survey = survey_with_acl("s1", &[("ada@example.com", Role::DataCollector)]);
        let job = job_with_tasks("j1", "Test Job", vec![]);
        let mut loi = point_loi("loi-1", "j1", 125.6, 10.1);
        loi.custom_tag = Some("POINT_001".into());
        loi.properties = vec![
            ("name".into(), PropertyValue::String("Dinagat Islands".into())),
            ("area".into(), PropertyValue::Number(3.08)),
        ];
        let store = seed(&survey, &job, &[loi], &[]);

        let csv = export_csv_string(&store, &user("u1", "ada@example.com"), "s1", "j1");
        let lines: Vec<&str> = csv.split('\n').collect();
        assert_eq!(
            lines[0],
            "\"system:index\",\"geometry\",\"name\",\"area\",\"contributor_name\",\"contributor_email\""
        );
        assert_eq!(
            lines[1],
            "\"POINT_001\",\"POINT (125.6 10.1)\",\"Dinagat Islands\",3.08,,"
        );
        // Final row carries the trailing delimiter.
        assert_eq!(lines[2], "");
    }

    #[test]
    fn property_columns_in_first_seen_order() {
        let survey = survey_with_acl("s1", &[("ada@example.com", Role::Owner)]);
        let job = job_with_tasks("j1", "j", vec![]);
        let mut first = point_loi("a", "j1", 1.0, 2.0);
        first.properties = vec![
            ("zeta".into(), PropertyValue::Number(1.0)),
            ("alpha".into(), PropertyValue::Number(2.0)),
        ];
        let mut second = point_loi("b", "j1", 3.0, 4.0);
        second.properties = vec![
            ("alpha".into(), PropertyValue::Number(3.0)),
            ("mid".into(), PropertyValue::Number(4.0)),
        ];
        let store = seed(&survey, &job, &[first, second], &[]);

        let csv = export_csv_string(&store, &user("u1", "ada@example.com"), "s1", "j1");
        let header = csv.split('\n').next().unwrap();
        assert_eq!(
            header,
            "\"system:index\",\"geometry\",\"zeta\",\"alpha\",\"mid\",\"contributor_name\",\"contributor_email\""
        );
    }

    #[test]
    fn embedded_quotes_are_doubled() {
        let survey = survey_with_acl("s1", &[("ada@example.com", Role::Owner)]);
        let job = job_with_tasks("j1", "j", vec![]);
        let mut loi = point_loi("a", "j1", 1.0, 2.0);
        loi.properties = vec![(
            "note".into(),
            PropertyValue::String("say \"hi\" twice".into()),
        )];
        let store = seed(&survey, &job, &[loi], &[]);

        let csv = export_csv_string(&store, &user("u1", "ada@example.com"), "s1", "j1");
        assert!(csv.contains("\"say \"\"hi\"\" twice\""));
    }

    #[test]
    fn submission_fan_out() {
        let survey = survey_with_acl("s1", &[("ada@example.com", Role::Owner)]);
        let job = job_with_tasks("j1", "j", vec![text_task("t1", "Notes", 0)]);
        let answered = point_loi("a", "j1", 1.0, 2.0);
        let silent = point_loi("b", "j1", 3.0, 4.0);
        let submissions = vec![
            submission_with(
                "sub-1",
                "a",
                "j1",
                vec![TaskData {
                    task_id: "t1".into(),
                    response: Response::Text("first".into()),
                }],
            ),
            submission_with(
                "sub-2",
                "a",
                "j1",
                vec![TaskData {
                    task_id: "t1".into(),
                    response: Response::Text("second".into()),
                }],
            ),
        ];
        let store = seed(&survey, &job, &[answered, silent], &submissions);

        let csv = export_csv_string(&store, &user("u1", "ada@example.com"), "s1", "j1");
        let lines: Vec<&str> = csv.trim_end().split('\n').collect();
        // Header, two rows for "a", one synthetic row for "b".
        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains("\"first\""));
        assert!(lines[2].contains("\"second\""));
        // The synthetic row has an empty task column.
        assert!(lines[3].starts_with(",\"POINT (3 4)\","));
    }

    #[test]
    fn entries_for_deleted_tasks_are_dropped() {
        let survey = survey_with_acl("s1", &[("ada@example.com", Role::Owner)]);
        let job = job_with_tasks("j1", "j", vec![text_task("t1", "Notes", 0)]);
        let loi = point_loi("a", "j1", 1.0, 2.0);
        let submission = submission_with(
            "sub-1",
            "a",
            "j1",
            vec![
                TaskData {
                    task_id: "t1".into(),
                    response: Response::Text("kept".into()),
                },
                TaskData {
                    task_id: "ghost".into(),
                    response: Response::Text("orphaned".into()),
                },
            ],
        );
        let store = seed(&survey, &job, &[loi], &[submission]);

        let ada = user("u1", "ada@example.com");
        let request = ExportRequest {
            user: &ada,
            survey_id: "s1",
            job_id: "j1",
        };
        let ctx = load_context(&store, &request).unwrap();
        let joined = &ctx.submissions_by_loi["a"][0];
        assert_eq!(joined.task_data.len(), 1);
        assert_eq!(joined.task_data[0].task_id, "t1");
    }

    #[test]
    fn choice_labels_resolve_with_err_fallback_and_other() {
        let survey = survey_with_acl("s1", &[("ada@example.com", Role::Owner)]);
        let job = job_with_tasks(
            "j1",
            "j",
            vec![choice_task(
                "t1",
                "Condition",
                0,
                &[("o1", "Healthy"), ("o2", "Damaged")],
            )],
        );
        let loi = point_loi("a", "j1", 1.0, 2.0);
        let submission = submission_with(
            "sub-1",
            "a",
            "j1",
            vec![TaskData {
                task_id: "t1".into(),
                response: Response::MultipleChoice {
                    option_ids: vec!["o1".into(), "gone".into()],
                    other: Some("regrowing".into()),
                },
            }],
        );
        let store = seed(&survey, &job, &[loi], &[submission]);

        let csv = export_csv_string(&store, &user("u1", "ada@example.com"), "s1", "j1");
        assert!(csv.contains("\"Healthy,#ERR,regrowing\""));
    }

    #[test]
    fn precondition_failures_fail_closed() {
        let survey = survey_with_acl("s1", &[("ada@example.com", Role::Viewer)]);
        let job = job_with_tasks("j1", "j", vec![]);
        let store = seed(&survey, &job, &[], &[]);

        let stranger = user("u9", "stranger@example.com");
        let mut out: Vec<u8> = vec![];
        let request = ExportRequest {
            user: &stranger,
            survey_id: "s1",
            job_id: "j1",
        };
        let err = export_csv(&store, &request, &mut out).unwrap_err();
        assert_eq!(err.status(), 403);
        assert!(out.is_empty());

        let ada = user("u1", "ada@example.com");
        let request = ExportRequest {
            user: &ada,
            survey_id: "s1",
            job_id: "missing",
        };
        let err = export_csv(&store, &request, &mut out).unwrap_err();
        assert_eq!(err.status(), 404);
        assert!(out.is_empty());
    }
}


#[cfg(test)]
mod export_kml_placemarks {
    use super::super::geom::{Coordinate, LinearRing, Polygon};
    use super::super::test_helpers::*;
    use super::helpers::seed;
    use super::*;

    #[test]
    fn placemark_per_loi_with_escaped_data() {
        let survey = survey_with_acl("s1", &[("ada@example.com", Role::Owner)]);
        let job = job_with_tasks("j1", "Parks & Gardens", vec![]);
        let mut point = point_loi("a", "j1", 125.6, 10.1);
        point.properties = vec![(
            "note".into(),
            PropertyValue::String("bench & <shade>".into()),
        )];
        let mut area = point_loi("b", "j1", 0.0, 0.0);
        area.geometry = super::super::geom::Geometry::Polygon(Polygon {
            shell: LinearRing(vec![
                Coordinate::new(0.0, 0.0),
                Coordinate::new(1.0, 0.0),
                Coordinate::new(1.0, 1.0),
                Coordinate::new(0.0, 0.0),
            ]),
            holes: vec![],
        });
        let store = seed(&survey, &job, &[point, area], &[]);

        let mut out: Vec<u8> = vec![];
        let request = ExportRequest {
            user: &user("u1", "ada@example.com"),
            survey_id: "s1",
            job_id: "j1",
        };
        let output = export_kml(&store, &request, &mut out).unwrap();
        let body = String::from_utf8(out).unwrap();

        assert_eq!(output.filename, "parks-gardens.kml");
        assert_eq!(body.matches("<Placemark>").count(), 2);
        assert!(body.contains("<name>Parks &amp; Gardens</name>"));
        assert!(body.contains("bench &amp; &lt;shade&gt;"));
        assert!(body.contains("<Point><coordinates>125.6,10.1</coordinates></Point>"));
        assert!(body.contains(
            "<outerBoundaryIs><LinearRing><coordinates>0,0 1,0 1,1 0,0</coordinates></LinearRing></outerBoundaryIs>"
        ));
    }
}
