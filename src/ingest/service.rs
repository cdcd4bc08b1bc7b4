//! Ingest coordinator
//!
//! Per call:
//! 1. validate every point (bad points are `Failed` in place)
//! 2. resolve partition and identity for the rest
//! 3. check each document against a snapshot of its partition mapping
//!    (`Conflict`) and against fields earlier points of the batch add
//! 4. send the accepted documents as one bulk upsert
//! 5. a point held back in step 3 by a batch field is `Conflict` only if a
//!    write carrying that field succeeded, otherwise `Failed` (retryable)
//!
//! Statuses stay index-aligned with the input throughout.

use futures::future::join_all;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

use super::outcome::{IngestResponse, IngestStatus};
use crate::config::ServiceConfig;
use crate::error::{Result, StorageError};
use crate::layout::{IdentityResolver, IndexResolver, PartitionId};
use crate::model::{SeriesDefinition, TimeSeriesPoint};
use crate::store::{
    decode_point, encode_point, find_mapping_conflict, series_partitions, BulkOperation, Document,
    DocumentStore, PartitionMapping, SearchRequest, SortOrder, WriteResult, TIMESTAMP_FIELD,
};

/// A point ready to write, or the reason it was rejected
type Candidate<'p> = std::result::Result<&'p TimeSeriesPoint, String>;

/// Sole writer of series partitions
pub struct IngestService<S: DocumentStore> {
    store: S,
    resolver: IndexResolver,
}

impl<S: DocumentStore> IngestService<S> {
    pub fn new(store: S, resolver: IndexResolver) -> Self {
        IngestService { store, resolver }
    }

    pub fn from_config(store: S, config: &ServiceConfig) -> Self {
        IngestService::new(store, config.layout.resolver())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn resolver(&self) -> &IndexResolver {
        &self.resolver
    }

    /// Ingest a batch of points, one status per point
    ///
    /// Only an invalid definition fails the whole call.
    pub async fn ingest(
        &self,
        definition: &SeriesDefinition,
        points: &[TimeSeriesPoint],
    ) -> Result<IngestResponse> {
        let candidates = points.iter().map(Ok).collect();
        self.ingest_candidates(definition, candidates).await
    }

    /// Ingest points still in wire form
    ///
    /// A point that does not decode is `Failed` at its position.
    pub async fn ingest_raw(
        &self,
        definition: &SeriesDefinition,
        raw: &[serde_json::Value],
    ) -> Result<IngestResponse> {
        let decoded: Vec<std::result::Result<TimeSeriesPoint, String>> = raw
            .iter()
            .map(|value| {
                TimeSeriesPoint::deserialize(value)
                    .map_err(|e| format!("undecodable point: {}", e))
            })
            .collect();
        let candidates = decoded
            .iter()
            .map(|d| d.as_ref().map_err(Clone::clone))
            .collect();
        self.ingest_candidates(definition, candidates).await
    }

    /// Most recent point of the series, `None` if it has no data
    pub async fn last(&self, definition: &SeriesDefinition) -> Result<Option<TimeSeriesPoint>> {
        definition.validate()?;
        let partitions = series_partitions(&self.store, definition).await?;
        if partitions.is_empty() {
            return Ok(None);
        }

        let request = SearchRequest::new(partitions, 1).order(SortOrder::Descending);
        let response = self.store.search(&request).await?;
        let last = response
            .hits
            .first()
            .map(|hit| decode_point(&hit.document))
            .transpose()?;
        Ok(last)
    }

    async fn ingest_candidates(
        &self,
        definition: &SeriesDefinition,
        candidates: Vec<Candidate<'_>>,
    ) -> Result<IngestResponse> {
        definition.validate()?;
        let total = candidates.len();
        let mut statuses = vec![IngestStatus::Failed; total];

        let mut prepared = Vec::with_capacity(total);
        for (position, candidate) in candidates.into_iter().enumerate() {
            match candidate.and_then(|point| validate_point(point).map(|()| point)) {
                Ok(point) => prepared.push((position, self.prepare(definition, point))),
                Err(reason) => debug!("Rejected point {} for {}: {}", position, definition, reason),
            }
        }

        let mut mappings: HashMap<PartitionId, BatchMapping> = self
            .fetch_mappings(&prepared)
            .await
            .into_iter()
            .map(|(partition, stored)| (partition, BatchMapping::new(stored)))
            .collect();

        let mut positions = Vec::with_capacity(prepared.len());
        let mut operations = Vec::with_capacity(prepared.len());
        let mut deferred = Vec::new();
        for (position, operation) in prepared {
            let Some(mapping) = mappings.get_mut(&operation.partition) else {
                continue;
            };
            if let Some((field, existing, attempted)) =
                find_mapping_conflict(&mapping.stored, &operation.document)
            {
                debug!(
                    "Point {} for {} conflicts in {}: field '{}' is {}, got {}",
                    position, definition, operation.partition, field, existing, attempted
                );
                statuses[position] = IngestStatus::Conflict;
                continue;
            }
            if let Some((field, _, _)) =
                find_mapping_conflict(&mapping.pending, &operation.document)
            {
                deferred.push((position, operation.partition.clone(), field.to_string()));
                continue;
            }
            mapping.add(position, &operation.document);
            positions.push(position);
            operations.push(operation);
        }

        if !operations.is_empty() {
            match self.store.bulk(&operations).await {
                Ok(results) => {
                    debug_assert_eq!(results.len(), operations.len());
                    for (position, result) in positions.iter().zip(results) {
                        statuses[*position] = status_for(result);
                    }
                }
                Err(e) => warn!(
                    "Bulk write of {} points for {} failed: {}",
                    operations.len(),
                    definition,
                    e
                ),
            }
        }

        // A clash with this batch only counts once a write carrying the field landed
        for (position, partition, field) in deferred {
            let landed = mappings.get(&partition).map_or(false, |mapping| {
                mapping
                    .carriers(&field)
                    .iter()
                    .any(|carrier| statuses[*carrier] == IngestStatus::Ok)
            });
            if landed {
                debug!(
                    "Point {} for {} conflicts in {} with field '{}' written by this batch",
                    position, definition, partition, field
                );
                statuses[position] = IngestStatus::Conflict;
            }
        }

        let response = IngestResponse { statuses };
        debug_assert_eq!(response.len(), total);
        info!(
            "Ingested {} points into {}: {} ok, {} failed, {} conflict",
            total,
            definition,
            response.count(IngestStatus::Ok),
            response.count(IngestStatus::Failed),
            response.count(IngestStatus::Conflict)
        );
        Ok(response)
    }

    fn prepare(&self, definition: &SeriesDefinition, point: &TimeSeriesPoint) -> BulkOperation {
        let bucket = definition.distance().bucket_start(point.timestamp);
        BulkOperation {
            partition: self.resolver.resolve(definition, bucket),
            id: IdentityResolver::id(point, definition),
            document: encode_point(point, bucket),
        }
    }

    /// Current mapping of every target partition
    ///
    /// Partitions whose mapping cannot be read are absent from the result,
    /// so their points stay `Failed`.
    async fn fetch_mappings(
        &self,
        prepared: &[(usize, BulkOperation)],
    ) -> HashMap<PartitionId, PartitionMapping> {
        let partitions: Vec<PartitionId> = prepared
            .iter()
            .map(|(_, op)| op.partition.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let fetched = join_all(partitions.iter().map(|p| self.store.mapping(p))).await;

        let mut mappings = HashMap::with_capacity(partitions.len());
        for (partition, result) in partitions.into_iter().zip(fetched) {
            match result {
                Ok(mapping) => {
                    mappings.insert(partition, mapping.unwrap_or_default());
                }
                Err(e) => warn!("Could not read mapping of {}: {}", partition, e),
            }
        }
        mappings
    }
}

/// A partition mapping as one batch sees it
///
/// `pending` holds fields that earlier points of the batch introduce;
/// `carriers` records which positions carry each of them.
struct BatchMapping {
    stored: PartitionMapping,
    pending: PartitionMapping,
    carriers: HashMap<String, Vec<usize>>,
}

impl BatchMapping {
    fn new(stored: PartitionMapping) -> Self {
        BatchMapping {
            stored,
            pending: PartitionMapping::new(),
            carriers: HashMap::new(),
        }
    }

    fn add(&mut self, position: usize, document: &Document) {
        for (field, value) in document {
            if self.stored.contains_key(field) {
                continue;
            }
            self.pending
                .entry(field.clone())
                .or_insert_with(|| value.field_type());
            self.carriers.entry(field.clone()).or_default().push(position);
        }
    }

    fn carriers(&self, field: &str) -> &[usize] {
        self.carriers.get(field).map_or(&[], Vec::as_slice)
    }
}

fn status_for(result: std::result::Result<WriteResult, StorageError>) -> IngestStatus {
    match result {
        Ok(_) => IngestStatus::Ok,
        Err(StorageError::MappingConflict { .. }) => IngestStatus::Conflict,
        Err(_) => IngestStatus::Failed,
    }
}

/// Structural checks on a single point
fn validate_point(point: &TimeSeriesPoint) -> std::result::Result<(), String> {
    if point.measurements.is_empty() {
        return Err("point has no measurements".to_string());
    }
    for (name, value) in &point.measurements {
        if name.is_empty() {
            return Err("empty measurement name".to_string());
        }
        if name == TIMESTAMP_FIELD {
            return Err(format!("measurement name '{}' is reserved", TIMESTAMP_FIELD));
        }
        if !value.is_finite() {
            return Err(format!("measurement '{}' is not finite", name));
        }
        if point.categories.contains_key(name) {
            return Err(format!("'{}' is both a measurement and a category", name));
        }
    }
    for (key, _) in point.categories.iter() {
        if key.is_empty() {
            return Err("empty category key".to_string());
        }
        if key == TIMESTAMP_FIELD {
            return Err(format!("category key '{}' is reserved", TIMESTAMP_FIELD));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SeriesError;
    use crate::model::{MeasurementDistance, MeasurementValue};
    use crate::store::{InMemoryDocumentStore, SimulatedDocumentStore, SimulatedStoreConfig};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 3, h, m, 0).unwrap()
    }

    fn minutes() -> SeriesDefinition {
        SeriesDefinition::new("123", "series", MeasurementDistance::Minutes).unwrap()
    }

    fn service() -> IngestService<InMemoryDocumentStore> {
        IngestService::new(InMemoryDocumentStore::new(), IndexResolver::default())
    }

    // =========================================================================
    // Statuses
    // =========================================================================

    #[tokio::test]
    async fn test_ingest_all_ok() {
        let service = service();
        let points: Vec<_> = (0..3)
            .map(|m| TimeSeriesPoint::new(ts(0, m)).measurement("x", m as i64))
            .collect();
        let response = service.ingest(&minutes(), &points).await.unwrap();
        assert!(response.all_ok());
        assert_eq!(service.store().document_count(), 3);
    }

    #[tokio::test]
    async fn test_invalid_point_does_not_abort_batch() {
        let service = service();
        let points = vec![
            TimeSeriesPoint::new(ts(0, 0)).measurement("x", 1),
            TimeSeriesPoint::new(ts(0, 1)),
            TimeSeriesPoint::new(ts(0, 2)).measurement("x", f64::NAN),
            TimeSeriesPoint::new(ts(0, 3)).measurement("timestamp", 1),
            TimeSeriesPoint::new(ts(0, 4)).measurement("x", 1).category("x", "a"),
            TimeSeriesPoint::new(ts(0, 5)).measurement("x", 5),
        ];
        let response = service.ingest(&minutes(), &points).await.unwrap();
        assert_eq!(
            response.statuses,
            vec![
                IngestStatus::Ok,
                IngestStatus::Failed,
                IngestStatus::Failed,
                IngestStatus::Failed,
                IngestStatus::Failed,
                IngestStatus::Ok,
            ]
        );
        assert_eq!(service.store().document_count(), 2);
    }

    #[tokio::test]
    async fn test_conflict_against_stored_mapping() {
        let service = service();
        let first = vec![TimeSeriesPoint::new(ts(0, 0))
            .measurement("x", 1)
            .category("region", "north")];
        service.ingest(&minutes(), &first).await.unwrap();

        // "region" is a keyword field now; using it as a measurement conflicts
        let second = vec![
            TimeSeriesPoint::new(ts(0, 1)).measurement("region", 5),
            TimeSeriesPoint::new(ts(0, 2)).measurement("x", 2.5),
        ];
        let response = service.ingest(&minutes(), &second).await.unwrap();
        assert_eq!(response.statuses, vec![IngestStatus::Conflict, IngestStatus::Ok]);
    }

    #[tokio::test]
    async fn test_conflict_within_one_batch() {
        let service = service();
        let points = vec![
            TimeSeriesPoint::new(ts(0, 0)).measurement("a", 1).category("b", "x"),
            TimeSeriesPoint::new(ts(0, 1)).measurement("b", 1),
        ];
        let response = service.ingest(&minutes(), &points).await.unwrap();
        assert_eq!(response.statuses, vec![IngestStatus::Ok, IngestStatus::Conflict]);
    }

    #[tokio::test]
    async fn test_batch_conflict_needs_the_write_to_land() {
        let store = SimulatedDocumentStore::new(
            InMemoryDocumentStore::new(),
            9,
            SimulatedStoreConfig {
                write_fail_prob: 1.0,
                ..SimulatedStoreConfig::no_faults()
            },
        );
        let service = IngestService::new(store.clone(), IndexResolver::default());
        let points = vec![
            TimeSeriesPoint::new(ts(0, 0)).measurement("a", 1).category("b", "x"),
            TimeSeriesPoint::new(ts(0, 1)).measurement("b", 1),
        ];
        let response = service.ingest(&minutes(), &points).await.unwrap();
        assert_eq!(response.statuses, vec![IngestStatus::Failed, IngestStatus::Failed]);
        assert_eq!(response.retryable_positions(), vec![0, 1]);
        assert!(store.inner().is_empty());

        // Retrying the second point alone is accepted
        let retry = IngestService::new(store.inner().clone(), IndexResolver::default());
        let response = retry.ingest(&minutes(), &points[1..]).await.unwrap();
        assert!(response.all_ok());
    }

    #[tokio::test]
    async fn test_batch_conflict_with_any_landed_carrier() {
        let service = service();
        let points = vec![
            TimeSeriesPoint::new(ts(0, 0)).measurement("a", 1).category("b", "x"),
            TimeSeriesPoint::new(ts(0, 1)).measurement("a", 2).category("b", "y"),
            TimeSeriesPoint::new(ts(0, 2)).measurement("b", 1),
            TimeSeriesPoint::new(ts(0, 3)).measurement("a", 3),
        ];
        let response = service.ingest(&minutes(), &points).await.unwrap();
        assert_eq!(
            response.statuses,
            vec![
                IngestStatus::Ok,
                IngestStatus::Ok,
                IngestStatus::Conflict,
                IngestStatus::Ok
            ]
        );
    }

    #[tokio::test]
    async fn test_conflict_is_scoped_to_partition() {
        let service = service();
        let old = vec![TimeSeriesPoint::new(Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap())
            .measurement("a", 1)
            .category("b", "x")];
        service.ingest(&minutes(), &old).await.unwrap();
        let new = vec![TimeSeriesPoint::new(ts(0, 0)).measurement("b", 1)];
        let response = service.ingest(&minutes(), &new).await.unwrap();
        assert!(response.all_ok());
    }

    #[tokio::test]
    async fn test_invalid_definition_fails_call() {
        let service = service();
        let bad: SeriesDefinition = serde_json::from_value(json!({
            "owner": "1@2", "name": "series", "distance": "minutes"
        }))
        .unwrap();
        let result = service.ingest(&bad, &[]).await;
        assert!(matches!(result, Err(SeriesError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_transient_failures_are_failed() {
        let store = SimulatedDocumentStore::new(
            InMemoryDocumentStore::new(),
            5,
            SimulatedStoreConfig {
                write_fail_prob: 1.0,
                ..SimulatedStoreConfig::no_faults()
            },
        );
        let service = IngestService::new(store, IndexResolver::default());
        let points = vec![TimeSeriesPoint::new(ts(0, 0)).measurement("x", 1)];
        let response = service.ingest(&minutes(), &points).await.unwrap();
        assert_eq!(response.statuses, vec![IngestStatus::Failed]);
    }

    #[tokio::test]
    async fn test_mapping_read_failure_marks_points_failed() {
        let store = SimulatedDocumentStore::new(
            InMemoryDocumentStore::new(),
            5,
            SimulatedStoreConfig {
                search_fail_prob: 1.0,
                ..SimulatedStoreConfig::no_faults()
            },
        );
        let service = IngestService::new(store, IndexResolver::default());
        let points = vec![
            TimeSeriesPoint::new(ts(0, 0)).measurement("x", 1),
            TimeSeriesPoint::new(ts(0, 1)),
        ];
        let response = service.ingest(&minutes(), &points).await.unwrap();
        assert_eq!(response.statuses, vec![IngestStatus::Failed, IngestStatus::Failed]);
        assert_eq!(service.store().inner().document_count(), 0);
    }

    // =========================================================================
    // Overwrite semantics
    // =========================================================================

    #[tokio::test]
    async fn test_overwrite_replaces_measurements() {
        let service = service();
        let first = TimeSeriesPoint::new(ts(0, 0)).measurement("x", 1).measurement("y", 2);
        let second = TimeSeriesPoint::new(ts(0, 0)).measurement("x", 10);
        service.ingest(&minutes(), &[first]).await.unwrap();
        let response = service.ingest(&minutes(), &[second]).await.unwrap();
        assert!(response.all_ok());

        assert_eq!(service.store().document_count(), 1);
        let last = service.last(&minutes()).await.unwrap().unwrap();
        assert_eq!(last.get_measurement("x"), Some(MeasurementValue::Integer(10)));
        assert_eq!(last.get_measurement("y"), None);
    }

    #[tokio::test]
    async fn test_hour_series_truncates_to_bucket() {
        let service = service();
        let hours = minutes().with_distance(MeasurementDistance::Hours);
        let points = vec![
            TimeSeriesPoint::new(ts(0, 0)).measurement("x", 1),
            TimeSeriesPoint::new(ts(0, 1)).measurement("x", 2),
        ];
        let response = service.ingest(&hours, &points).await.unwrap();
        assert!(response.all_ok());
        assert_eq!(service.store().document_count(), 1);

        let last = service.last(&hours).await.unwrap().unwrap();
        assert_eq!(last.timestamp, ts(0, 0));
        assert_eq!(last.get_measurement("x"), Some(MeasurementValue::Integer(2)));
    }

    // =========================================================================
    // Last and raw ingest
    // =========================================================================

    #[tokio::test]
    async fn test_last_absent_and_across_partitions() {
        let service = service();
        assert!(service.last(&minutes()).await.unwrap().is_none());

        let points = vec![
            TimeSeriesPoint::new(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap())
                .measurement("x", 3),
            TimeSeriesPoint::new(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
                .measurement("x", 1),
        ];
        service.ingest(&minutes(), &points).await.unwrap();
        let last = service.last(&minutes()).await.unwrap().unwrap();
        assert_eq!(last.get_measurement("x"), Some(MeasurementValue::Integer(3)));

        // Other distances of the same series are separate
        let hours = minutes().with_distance(MeasurementDistance::Hours);
        assert!(service.last(&hours).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ingest_raw_marks_undecodable_points() {
        let service = service();
        let raw = vec![
            json!({"timestamp": "2021-03-03T00:00:00Z", "measurements": {"x": 1}}),
            json!({"timestamp": "not a time", "measurements": {"x": 1}}),
            json!({"timestamp": "2021-03-03T00:01:00Z", "measurements": {"x": "abc"}}),
            json!({
                "timestamp": "2021-03-03T02:02:00+02:00",
                "measurements": {"x": 2},
                "categories": {"k": "v"}
            }),
        ];
        let response = service.ingest_raw(&minutes(), &raw).await.unwrap();
        assert_eq!(
            response.statuses,
            vec![IngestStatus::Ok, IngestStatus::Failed, IngestStatus::Failed, IngestStatus::Ok]
        );
        let last = service.last(&minutes()).await.unwrap().unwrap();
        assert_eq!(last.timestamp, ts(0, 2));
    }
}
