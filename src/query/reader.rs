//! Series reader: bounded range reads across partitions
//!
//! With both bounds given, only partitions resolved for the range are
//! searched (missing ones are skipped by the store). With an open bound the
//! existing partitions of the series are listed and filtered by period.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::{ServiceConfig, MAX_POINTS_LIMIT};
use crate::error::{Result, SeriesError};
use crate::layout::{IndexResolver, PartitionId};
use crate::model::{SeriesDefinition, TimeSeriesPoint};
use crate::store::{decode_point, series_partitions, DocumentStore, SearchRequest};

/// Points one call may return unless configured otherwise
pub const DEFAULT_MAX_POINTS: usize = 10_000;

pub struct SeriesReader<S: DocumentStore> {
    store: S,
    resolver: IndexResolver,
    max_points: usize,
}

impl<S: DocumentStore> SeriesReader<S> {
    pub fn new(store: S, resolver: IndexResolver) -> Self {
        SeriesReader {
            store,
            resolver,
            max_points: DEFAULT_MAX_POINTS,
        }
    }

    /// Reader with the configured partition period and read cap
    pub fn from_config(store: S, config: &ServiceConfig) -> Self {
        SeriesReader::new(store, config.layout.resolver()).with_max_points(config.read.max_points)
    }

    /// Override the per-call cap; clamped to `[1, MAX_POINTS_LIMIT]`
    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points.clamp(1, MAX_POINTS_LIMIT);
        self
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    /// Points of the series within `[from, to]`, ascending by timestamp
    ///
    /// Points sharing a timestamp but not a category set come back as
    /// separate points. More matches than the cap is `CapacityExceeded`.
    pub async fn read(
        &self,
        definition: &SeriesDefinition,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<TimeSeriesPoint>> {
        definition.validate()?;
        if let (Some(f), Some(t)) = (from, to) {
            if f > t {
                return Ok(Vec::new());
            }
        }

        let partitions = self.partitions_for(definition, from, to).await?;
        if partitions.is_empty() {
            debug!("No partitions for {} in range", definition);
            return Ok(Vec::new());
        }

        let request = SearchRequest::new(partitions, self.max_points).range(from, to);
        let response = self.store.search(&request).await?;
        debug!(
            "Read {} of {} points for {} from {} partitions",
            response.hits.len(),
            response.total,
            definition,
            request.partitions.len()
        );
        if response.total > self.max_points {
            warn!(
                "Range read for {} matched {} points, limit is {}",
                definition, response.total, self.max_points
            );
            return Err(SeriesError::CapacityExceeded {
                limit: self.max_points,
                total: response.total,
            });
        }

        let points = response
            .hits
            .iter()
            .map(|hit| decode_point(&hit.document))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug_assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        Ok(points)
    }

    async fn partitions_for(
        &self,
        definition: &SeriesDefinition,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<PartitionId>> {
        if let (Some(f), Some(t)) = (from, to) {
            return Ok(self.resolver.resolve_range(definition, f, t));
        }
        let existing = series_partitions(&self.store, definition).await?;
        Ok(existing
            .into_iter()
            .filter(|p| {
                PartitionId::parse(p.as_str())
                    .map_or(false, |parsed| self.resolver.period_in_range(&parsed.period, from, to))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestService;
    use crate::model::{MeasurementDistance, MeasurementValue};
    use crate::store::InMemoryDocumentStore;
    use chrono::TimeZone;

    fn minutes() -> SeriesDefinition {
        SeriesDefinition::new("123", "series", MeasurementDistance::Minutes).unwrap()
    }

    fn at(y: i32, mo: u32, d: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 0, m, 0).unwrap()
    }

    async fn seeded(points: &[TimeSeriesPoint]) -> InMemoryDocumentStore {
        let store = InMemoryDocumentStore::new();
        let ingest = IngestService::new(store.clone(), IndexResolver::default());
        assert!(ingest.ingest(&minutes(), points).await.unwrap().all_ok());
        store
    }

    #[tokio::test]
    async fn test_read_ascending_across_years() {
        let store = seeded(&[
            TimeSeriesPoint::new(at(2022, 1, 1, 0)).measurement("x", 3),
            TimeSeriesPoint::new(at(2020, 5, 1, 0)).measurement("x", 1),
            TimeSeriesPoint::new(at(2021, 5, 1, 0)).measurement("x", 2),
        ])
        .await;
        let reader = SeriesReader::new(store, IndexResolver::default());

        let all = reader.read(&minutes(), None, None).await.unwrap();
        let values: Vec<_> = all.iter().filter_map(|p| p.get_measurement("x")).collect();
        assert_eq!(
            values,
            vec![
                MeasurementValue::Integer(1),
                MeasurementValue::Integer(2),
                MeasurementValue::Integer(3)
            ]
        );

        let bounded = reader
            .read(&minutes(), Some(at(2021, 1, 1, 0)), Some(at(2021, 12, 31, 0)))
            .await
            .unwrap();
        assert_eq!(bounded.len(), 1);

        let open_end = reader.read(&minutes(), Some(at(2021, 5, 1, 0)), None).await.unwrap();
        assert_eq!(open_end.len(), 2);

        let open_start = reader.read(&minutes(), None, Some(at(2020, 12, 1, 0))).await.unwrap();
        assert_eq!(open_start.len(), 1);
    }

    #[tokio::test]
    async fn test_read_empty_and_inverted() {
        let reader = SeriesReader::new(InMemoryDocumentStore::new(), IndexResolver::default());
        assert!(reader.read(&minutes(), None, None).await.unwrap().is_empty());
        assert!(reader
            .read(&minutes(), Some(at(2021, 2, 1, 0)), Some(at(2021, 1, 1, 0)))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_read_keeps_category_variants_apart() {
        let store = seeded(&[
            TimeSeriesPoint::new(at(2021, 3, 3, 0))
                .measurement("x", 103)
                .category("category1", "abc")
                .category("category2", "def"),
            TimeSeriesPoint::new(at(2021, 3, 3, 0))
                .measurement("x", 2354)
                .category("category1", "abc"),
        ])
        .await;
        let reader = SeriesReader::new(store, IndexResolver::default());
        let points = reader.read(&minutes(), None, None).await.unwrap();
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| p.timestamp == at(2021, 3, 3, 0)));
    }

    #[tokio::test]
    async fn test_read_over_cap_is_error() {
        let points: Vec<_> = (0..5)
            .map(|m| TimeSeriesPoint::new(at(2021, 3, 3, m)).measurement("x", 1))
            .collect();
        let store = seeded(&points).await;
        let reader = SeriesReader::new(store, IndexResolver::default()).with_max_points(4);
        let result = reader.read(&minutes(), None, None).await;
        assert!(matches!(
            result,
            Err(SeriesError::CapacityExceeded { limit: 4, total: 5 })
        ));

        let exact = reader.with_max_points(5);
        assert_eq!(exact.read(&minutes(), None, None).await.unwrap().len(), 5);
    }

    #[test]
    fn test_max_points_clamped() {
        let reader = SeriesReader::new(InMemoryDocumentStore::new(), IndexResolver::default());
        assert_eq!(reader.max_points(), DEFAULT_MAX_POINTS);
        let reader = reader.with_max_points(0);
        assert_eq!(reader.max_points(), 1);
        let reader = reader.with_max_points(usize::MAX);
        assert_eq!(reader.max_points(), MAX_POINTS_LIMIT);
    }
}
