//! Ingest coordinator and its per-point outcome types

mod outcome;
mod service;

pub use outcome::{IngestResponse, IngestStatus};
pub use service::IngestService;
