//! Document Store Abstraction
//!
//! The series store persists points through a minimal document-store
//! boundary: bulk upsert by id, range search over the `timestamp` field,
//! per-partition field mappings and partition listing by prefix.
//!
//! Implementations:
//! - `InMemoryDocumentStore`: for unit tests, DST and the CLI
//! - `SimulatedDocumentStore`: fault-injecting wrapper for DST
//!
//! `SharedDocumentStore` holds whichever of these the configuration picks.

mod document;
mod memory;
mod simulated;

pub use document::{
    decode_point, encode_point, extend_mapping, find_mapping_conflict, Document, FieldType,
    FieldValue, PartitionMapping, TIMESTAMP_FIELD,
};
pub use memory::InMemoryDocumentStore;
pub use simulated::{SimulatedDocumentStore, SimulatedStoreConfig, SimulatedStoreStats};

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::StorageError;
use crate::layout::{DocumentId, IndexResolver, PartitionId};
use crate::model::SeriesDefinition;

pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future returned by every store operation
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StorageResult<T>> + Send + 'a>>;

/// One upsert within a bulk request
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation {
    pub partition: PartitionId,
    pub id: DocumentId,
    pub document: Document,
}

/// Outcome of a successful upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Range search over the `timestamp` field of one or more partitions
///
/// Bounds are inclusive and optional. Partitions that do not exist are
/// skipped rather than reported.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub partitions: Vec<PartitionId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub order: SortOrder,
    /// Maximum number of documents returned
    pub size: usize,
}

impl SearchRequest {
    pub fn new(partitions: Vec<PartitionId>, size: usize) -> Self {
        SearchRequest {
            partitions,
            from: None,
            to: None,
            order: SortOrder::Ascending,
            size,
        }
    }

    pub fn range(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Whether a stored timestamp falls inside the requested bounds
    pub fn matches(&self, timestamp: DateTime<Utc>) -> bool {
        self.from.map_or(true, |f| timestamp >= f) && self.to.map_or(true, |t| timestamp <= t)
    }
}

/// A document returned by a search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub partition: PartitionId,
    pub id: DocumentId,
    pub document: Document,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    /// Number of matching documents, before `size` truncation
    pub total: usize,
    /// At most `size` hits, sorted by timestamp in the requested order
    pub hits: Vec<SearchHit>,
}

/// Document store abstraction trait
///
/// Writes are idempotent upserts keyed by (partition, id). Partitions are
/// created implicitly on first write.
pub trait DocumentStore: Send + Sync + 'static {
    /// Upsert a batch of documents
    ///
    /// The outer error fails the whole request; inner results are aligned
    /// with `operations`.
    fn bulk<'a>(
        &'a self,
        operations: &'a [BulkOperation],
    ) -> StoreFuture<'a, Vec<StorageResult<WriteResult>>>;

    /// Search partitions for documents within a timestamp range
    fn search<'a>(&'a self, request: &'a SearchRequest) -> StoreFuture<'a, SearchResponse>;

    /// Field mapping of a partition, `None` if it does not exist
    fn mapping<'a>(
        &'a self,
        partition: &'a PartitionId,
    ) -> StoreFuture<'a, Option<PartitionMapping>>;

    /// Existing partitions whose name starts with `prefix`, sorted by name
    fn partitions<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<PartitionId>>;

    /// Fetch a single document by id
    fn get<'a>(
        &'a self,
        partition: &'a PartitionId,
        id: &'a DocumentId,
    ) -> StoreFuture<'a, Option<Document>>;
}

/// A store chosen at runtime, e.g. from `StoreConfig::build`
pub type SharedDocumentStore = Arc<dyn DocumentStore>;

impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    fn bulk<'a>(
        &'a self,
        operations: &'a [BulkOperation],
    ) -> StoreFuture<'a, Vec<StorageResult<WriteResult>>> {
        (**self).bulk(operations)
    }

    fn search<'a>(&'a self, request: &'a SearchRequest) -> StoreFuture<'a, SearchResponse> {
        (**self).search(request)
    }

    fn mapping<'a>(
        &'a self,
        partition: &'a PartitionId,
    ) -> StoreFuture<'a, Option<PartitionMapping>> {
        (**self).mapping(partition)
    }

    fn partitions<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<PartitionId>> {
        (**self).partitions(prefix)
    }

    fn get<'a>(
        &'a self,
        partition: &'a PartitionId,
        id: &'a DocumentId,
    ) -> StoreFuture<'a, Option<Document>> {
        (**self).get(partition, id)
    }
}

/// Existing partitions holding data for exactly this definition
///
/// Listing is by prefix; names that do not decode back to `definition` are
/// dropped.
pub async fn series_partitions<S: DocumentStore + ?Sized>(
    store: &S,
    definition: &SeriesDefinition,
) -> StorageResult<Vec<PartitionId>> {
    let prefix = IndexResolver::series_prefix(definition);
    let partitions = store.partitions(&prefix).await?;
    Ok(partitions
        .into_iter()
        .filter(|p| {
            PartitionId::parse(p.as_str())
                .map_or(false, |parsed| parsed.definition == *definition)
        })
        .collect())
}

/// Timestamp of a stored document, used for sorting search hits
pub(crate) fn document_timestamp(document: &Document) -> StorageResult<DateTime<Utc>> {
    match document.get(TIMESTAMP_FIELD) {
        Some(FieldValue::Date(ts)) => Ok(*ts),
        _ => Err(StorageError::Corrupt("document has no date timestamp".to_string())),
    }
}
