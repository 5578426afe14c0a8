//! Data interchange for field-collected survey data.
//!
//! A survey holds jobs; a job holds locations of interest (LOIs) and the
//! submissions collected against them. This crate moves that data across the
//! system boundary in both directions:
//!
//! - [`export`] streams a job's LOIs and submissions as CSV rows, a GeoJSON
//!   FeatureCollection, or a KML document.
//! - [`import`] ingests uploaded CSV or GeoJSON files as new LOIs and records
//!   individual submissions.
//!
//! [`doc`] translates between the in-memory model and the document store's
//! field-numbered wire schema; [`store`] is the storage boundary, with an
//! in-memory implementation for the CLI and tests.

pub mod acl;
pub mod doc;
pub mod error;
pub mod export;
pub mod geojson;
pub mod geom;
pub mod import;
pub mod model;
pub mod store;
pub mod test_helpers;

pub use self::error::Error;
pub use self::export::{export_csv, export_geojson, export_kml, ExportOutput, ExportRequest};
pub use self::import::{import, record_submission, ImportRequest, ImportSummary, Part};
