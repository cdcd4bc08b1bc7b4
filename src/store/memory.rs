//! In-memory document store for unit tests, DST and local tooling

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::{
    document_timestamp, extend_mapping, find_mapping_conflict, BulkOperation, Document,
    DocumentStore, PartitionMapping, SearchHit, SearchRequest, SearchResponse, SortOrder,
    StorageResult, StoreFuture, WriteResult,
};
use crate::error::StorageError;
use crate::layout::{DocumentId, PartitionId};

#[derive(Debug, Default)]
struct Partition {
    mapping: PartitionMapping,
    documents: HashMap<DocumentId, Document>,
}

impl Partition {
    fn upsert(
        &mut self,
        partition: &PartitionId,
        op: &BulkOperation,
    ) -> StorageResult<WriteResult> {
        if let Some((field, existing, attempted)) =
            find_mapping_conflict(&self.mapping, &op.document)
        {
            return Err(StorageError::MappingConflict {
                partition: partition.to_string(),
                field: field.to_string(),
                existing,
                attempted,
            });
        }
        extend_mapping(&mut self.mapping, &op.document);
        match self.documents.insert(op.id.clone(), op.document.clone()) {
            Some(_) => Ok(WriteResult::Updated),
            None => Ok(WriteResult::Created),
        }
    }
}

/// In-memory document store
///
/// Clones share the same underlying data.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    data: Arc<RwLock<BTreeMap<PartitionId, Partition>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        InMemoryDocumentStore {
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Total number of stored documents across all partitions
    pub fn document_count(&self) -> usize {
        self.data.read().values().map(|p| p.documents.len()).sum()
    }

    pub fn partition_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Drop every partition
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryDocumentStore {
    fn clone(&self) -> Self {
        InMemoryDocumentStore {
            data: Arc::clone(&self.data),
        }
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn bulk<'a>(
        &'a self,
        operations: &'a [BulkOperation],
    ) -> StoreFuture<'a, Vec<StorageResult<WriteResult>>> {
        Box::pin(async move {
            let mut data = self.data.write();
            let results = operations
                .iter()
                .map(|op| {
                    data.entry(op.partition.clone())
                        .or_default()
                        .upsert(&op.partition, op)
                })
                .collect();
            Ok(results)
        })
    }

    fn search<'a>(&'a self, request: &'a SearchRequest) -> StoreFuture<'a, SearchResponse> {
        Box::pin(async move {
            let data = self.data.read();
            let targets: BTreeSet<&PartitionId> = request.partitions.iter().collect();

            let mut matched = Vec::new();
            for partition_id in targets {
                let Some(partition) = data.get(partition_id) else {
                    continue;
                };
                for (id, document) in &partition.documents {
                    let ts = document_timestamp(document)?;
                    if request.matches(ts) {
                        matched.push((ts, partition_id, id, document));
                    }
                }
            }

            let total = matched.len();
            matched.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));
            if request.order == SortOrder::Descending {
                matched.reverse();
            }
            matched.truncate(request.size);

            let hits = matched
                .into_iter()
                .map(|(_, partition, id, document)| SearchHit {
                    partition: partition.clone(),
                    id: id.clone(),
                    document: document.clone(),
                })
                .collect();
            Ok(SearchResponse { total, hits })
        })
    }

    fn mapping<'a>(
        &'a self,
        partition: &'a PartitionId,
    ) -> StoreFuture<'a, Option<PartitionMapping>> {
        Box::pin(async move { Ok(self.data.read().get(partition).map(|p| p.mapping.clone())) })
    }

    fn partitions<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<PartitionId>> {
        Box::pin(async move {
            Ok(self
                .data
                .read()
                .keys()
                .filter(|id| id.as_str().starts_with(prefix))
                .cloned()
                .collect())
        })
    }

    fn get<'a>(
        &'a self,
        partition: &'a PartitionId,
        id: &'a DocumentId,
    ) -> StoreFuture<'a, Option<Document>> {
        Box::pin(async move {
            Ok(self
                .data
                .read()
                .get(partition)
                .and_then(|p| p.documents.get(id).cloned()))
        })
    }
}
