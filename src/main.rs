use std::error::Error;
use std::fs::File;
use std::path::PathBuf;
use structopt::StructOpt;
use tracing::info;

use survey_interchange::model::User;
use survey_interchange::store::MemoryStore;
use survey_interchange::{acl, export, import};

#[derive(StructOpt)]
#[structopt(about = "Move field-collected survey data in and out of a store snapshot")]
enum Opt {
    /// Export one job's LOIs and submissions
    Export {
        /// JSON snapshot of the document store
        #[structopt(long, parse(from_os_str))]
        store: PathBuf,
        #[structopt(long)]
        survey: String,
        #[structopt(long)]
        job: String,
        /// csv, geojson or kml
        #[structopt(long, default_value = "csv")]
        format: String,
        /// Act as the participant with this email instead of the local owner
        #[structopt(long)]
        user: Option<String>,
        /// Output file; defaults to the derived attachment name
        #[structopt(short, long, parse(from_os_str))]
        output: Option<PathBuf>,
    },
    /// Import LOIs from a CSV or GeoJSON file into one job
    Import {
        /// JSON snapshot of the document store; updated in place
        #[structopt(long, parse(from_os_str))]
        store: PathBuf,
        #[structopt(long)]
        survey: String,
        #[structopt(long)]
        job: String,
        /// Act as the participant with this email instead of the local owner
        #[structopt(long)]
        user: Option<String>,
        /// The file to import
        #[structopt(parse(from_os_str))]
        file: PathBuf,
    },
}

fn cli_user(email: Option<String>) -> User {
    match email {
        Some(email) => User {
            id: email.clone(),
            display_name: email.clone(),
            email,
        },
        None => User {
            id: acl::LOCAL_OWNER_ID.to_string(),
            email: "owner@localhost".to_string(),
            display_name: "Local Owner".to_string(),
        },
    }
}

fn run_export(
    store_path: PathBuf,
    survey: String,
    job: String,
    format: String,
    email: Option<String>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::from_reader(File::open(&store_path)?)?;
    let user = cli_user(email);
    let request = export::ExportRequest {
        user: &user,
        survey_id: &survey,
        job_id: &job,
    };

    // Buffered so the derived attachment name is known before any file is
    // created.
    let mut body: Vec<u8> = vec![];
    let result = match format.as_str() {
        "csv" => export::export_csv(&store, &request, &mut body)?,
        "geojson" => export::export_geojson(&store, &request, &mut body)?,
        "kml" => export::export_kml(&store, &request, &mut body)?,
        other => return Err(format!("unsupported format: {}", other).into()),
    };
    let target = output.unwrap_or_else(|| PathBuf::from(&result.filename));
    std::fs::write(&target, &body)?;
    info!(
        file = %target.display(),
        content_type = result.content_type,
        bytes = body.len(),
        "export written"
    );
    Ok(())
}

fn run_import(
    store_path: PathBuf,
    survey: String,
    job: String,
    email: Option<String>,
    file: PathBuf,
) -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::from_reader(File::open(&store_path)?)?;
    let user = cli_user(email);
    let filename = file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();
    let upload = File::open(&file)?;

    let request = import::ImportRequest {
        method: "POST",
        parts: vec![
            import::Part::Field {
                name: "survey".to_string(),
                value: survey,
            },
            import::Part::Field {
                name: "job".to_string(),
                value: job,
            },
            import::Part::File {
                filename,
                reader: Box::new(upload),
            },
        ],
    };
    let summary = import::import(&store, &user, request)?;
    store.to_writer(File::create(&store_path)?)?;
    info!(count = summary.count, "import written back to the snapshot");
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();
    match Opt::from_args() {
        Opt::Export {
            store,
            survey,
            job,
            format,
            user,
            output,
        } => run_export(store, survey, job, format, user, output),
        Opt::Import {
            store,
            survey,
            job,
            user,
            file,
        } => run_import(store, survey, job, user, file),
    }
}
