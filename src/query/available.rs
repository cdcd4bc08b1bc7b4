//! Store-backed listing of available series

use tracing::debug;

use super::aggregation::available_series;
use crate::error::Result;
use crate::layout::{IndexResolver, PartitionId};
use crate::model::SeriesDefinition;
use crate::store::DocumentStore;

pub struct AvailableSeriesLister<S: DocumentStore> {
    store: S,
}

impl<S: DocumentStore> AvailableSeriesLister<S> {
    pub fn new(store: S) -> Self {
        AvailableSeriesLister { store }
    }

    /// Every series with at least one partition, optionally for one owner
    ///
    /// Partitions with foreign names are ignored.
    pub async fn list(&self, owner: Option<&str>) -> Result<Vec<SeriesDefinition>> {
        let prefix = owner.map(IndexResolver::owner_prefix).unwrap_or_default();
        let partitions = self.store.partitions(&prefix).await?;
        let total = partitions.len();
        let definitions: Vec<SeriesDefinition> = partitions
            .iter()
            .filter_map(|p| PartitionId::parse(p.as_str()))
            .map(|parsed| parsed.definition)
            .collect();
        debug!(
            "Listed {} partitions under '{}', {} recognized",
            total,
            prefix,
            definitions.len()
        );
        Ok(available_series(definitions))
    }
}
