pub mod config;
pub mod dst;
pub mod error;
pub mod ingest;
pub mod layout;
pub mod model;
pub mod observability;
pub mod query;
pub mod simulator;
pub mod store;

pub use config::ServiceConfig;
pub use error::{ConfigError, SeriesError, StorageError};
pub use ingest::{IngestResponse, IngestService, IngestStatus};
pub use layout::{DocumentId, IdentityResolver, IndexResolver, PartitionId, PartitionPeriod};
pub use model::{
    Categories, MeasurementDistance, MeasurementValue, Measurements, SeriesDefinition,
    TimeSeriesPoint,
};
pub use query::{AvailableSeriesLister, SeriesReader};
pub use store::{
    DocumentStore, InMemoryDocumentStore, SharedDocumentStore, SimulatedDocumentStore,
};
