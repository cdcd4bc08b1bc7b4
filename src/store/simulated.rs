//! Simulated document store with fault injection
//!
//! DST-compatible wrapper around any `DocumentStore`. All fault decisions
//! come from one seeded RNG, so a run is reproducible from its seed.
//!
//! Injected faults:
//! - per-operation write failure inside a bulk request (`Unavailable`)
//! - whole-call timeout; a timed-out bulk may or may not have been applied
//! - read failure for search, mapping, listing and get (`Unavailable`)

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{
    BulkOperation, Document, DocumentStore, PartitionMapping, SearchRequest, SearchResponse,
    StorageResult, StoreFuture, WriteResult,
};
use crate::error::StorageError;
use crate::layout::{DocumentId, PartitionId};
use crate::simulator::DeterministicRng;

/// Configuration for simulated fault injection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedStoreConfig {
    /// Probability that a single bulk operation fails
    pub write_fail_prob: f64,
    /// Probability that a call times out
    pub timeout_prob: f64,
    /// Probability that a read call fails
    pub search_fail_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            write_fail_prob: 0.01,
            timeout_prob: 0.005,
            search_fail_prob: 0.01,
            latency_range_us: (0, 0),
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            write_fail_prob: 0.10,
            timeout_prob: 0.05,
            search_fail_prob: 0.10,
            latency_range_us: (0, 0),
        }
    }

    /// No faults, for baseline runs
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            write_fail_prob: 0.0,
            timeout_prob: 0.0,
            search_fail_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub bulk_calls: u64,
    pub write_attempts: u64,
    pub write_failures: u64,
    pub read_calls: u64,
    pub read_failures: u64,
    pub timeouts: u64,
    /// Timed-out bulk calls whose writes were applied anyway
    pub lost_acks: u64,
}

struct SimulatedStoreInner {
    rng: DeterministicRng,
    stats: SimulatedStoreStats,
}

/// Fault decision for a whole bulk call
enum BulkFault {
    None,
    TimeoutBeforeApply,
    TimeoutAfterApply,
}

/// Document store wrapper that injects faults
pub struct SimulatedDocumentStore<S: DocumentStore + Clone> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

impl<S: DocumentStore + Clone> SimulatedDocumentStore<S> {
    pub fn new(inner_store: S, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedDocumentStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng: DeterministicRng::new(seed),
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    /// The wrapped store, bypassing fault injection
    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    pub fn config(&self) -> &SimulatedStoreConfig {
        &self.config
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    fn latency(&self) -> Option<Duration> {
        let (min, max) = self.config.latency_range_us;
        if max == 0 {
            return None;
        }
        let us = self.state.lock().rng.gen_range(min, max);
        Some(Duration::from_micros(us))
    }

    async fn simulate_latency(&self) {
        if let Some(delay) = self.latency() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Decide whether a read call fails, recording stats
    fn read_fault(&self, what: &str) -> Option<StorageError> {
        let mut s = self.state.lock();
        s.stats.read_calls += 1;
        if s.rng.gen_bool(self.config.timeout_prob) {
            s.stats.timeouts += 1;
            return Some(StorageError::Timeout(format!("simulated {} timeout", what)));
        }
        if s.rng.gen_bool(self.config.search_fail_prob) {
            s.stats.read_failures += 1;
            return Some(StorageError::Unavailable(format!("simulated {} failure", what)));
        }
        None
    }

    /// Decide the bulk-level fault and which operations fail individually
    fn bulk_faults(&self, len: usize) -> (BulkFault, Vec<bool>) {
        let mut s = self.state.lock();
        s.stats.bulk_calls += 1;
        s.stats.write_attempts += len as u64;

        let fault = if s.rng.gen_bool(self.config.timeout_prob) {
            s.stats.timeouts += 1;
            if s.rng.gen_bool(0.5) {
                s.stats.lost_acks += 1;
                BulkFault::TimeoutAfterApply
            } else {
                BulkFault::TimeoutBeforeApply
            }
        } else {
            BulkFault::None
        };

        let failed: Vec<bool> = (0..len)
            .map(|_| s.rng.gen_bool(self.config.write_fail_prob))
            .collect();
        s.stats.write_failures += failed.iter().filter(|f| **f).count() as u64;
        (fault, failed)
    }
}

impl<S: DocumentStore + Clone> Clone for SimulatedDocumentStore<S> {
    fn clone(&self) -> Self {
        SimulatedDocumentStore {
            inner_store: self.inner_store.clone(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<S: DocumentStore + Clone> DocumentStore for SimulatedDocumentStore<S> {
    fn bulk<'a>(
        &'a self,
        operations: &'a [BulkOperation],
    ) -> StoreFuture<'a, Vec<StorageResult<WriteResult>>> {
        Box::pin(async move {
            self.simulate_latency().await;
            let (fault, failed) = self.bulk_faults(operations.len());
            if let BulkFault::TimeoutBeforeApply = fault {
                return Err(StorageError::Timeout("simulated bulk timeout".to_string()));
            }

            let forwarded: Vec<BulkOperation> = operations
                .iter()
                .zip(&failed)
                .filter(|(_, failed)| !**failed)
                .map(|(op, _)| op.clone())
                .collect();
            let mut applied = self.inner_store.bulk(&forwarded).await?.into_iter();

            if let BulkFault::TimeoutAfterApply = fault {
                return Err(StorageError::Timeout("simulated bulk timeout after apply".to_string()));
            }

            let mut results = Vec::with_capacity(operations.len());
            for failed in failed {
                let result = if failed {
                    Err(StorageError::Unavailable("simulated write failure".to_string()))
                } else {
                    applied.next().unwrap_or_else(|| {
                        Err(StorageError::Corrupt("inner store dropped a bulk result".to_string()))
                    })
                };
                results.push(result);
            }
            Ok(results)
        })
    }

    fn search<'a>(&'a self, request: &'a SearchRequest) -> StoreFuture<'a, SearchResponse> {
        Box::pin(async move {
            self.simulate_latency().await;
            if let Some(err) = self.read_fault("search") {
                return Err(err);
            }
            self.inner_store.search(request).await
        })
    }

    fn mapping<'a>(
        &'a self,
        partition: &'a PartitionId,
    ) -> StoreFuture<'a, Option<PartitionMapping>> {
        Box::pin(async move {
            self.simulate_latency().await;
            if let Some(err) = self.read_fault("mapping") {
                return Err(err);
            }
            self.inner_store.mapping(partition).await
        })
    }

    fn partitions<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<PartitionId>> {
        Box::pin(async move {
            self.simulate_latency().await;
            if let Some(err) = self.read_fault("list") {
                return Err(err);
            }
            self.inner_store.partitions(prefix).await
        })
    }

    fn get<'a>(
        &'a self,
        partition: &'a PartitionId,
        id: &'a DocumentId,
    ) -> StoreFuture<'a, Option<Document>> {
        Box::pin(async move {
            self.simulate_latency().await;
            if let Some(err) = self.read_fault("get") {
                return Err(err);
            }
            self.inner_store.get(partition, id).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FieldValue, InMemoryDocumentStore, TIMESTAMP_FIELD};
    use chrono::{TimeZone, Utc};

    fn ops(n: usize) -> Vec<BulkOperation> {
        (0..n)
            .map(|i| {
                let mut document = Document::new();
                document.insert(
                    TIMESTAMP_FIELD.to_string(),
                    FieldValue::Date(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()),
                );
                document.insert("x".to_string(), FieldValue::Long(i as i64));
                BulkOperation {
                    partition: PartitionId::from("p"),
                    id: DocumentId::from(format!("d{}", i).as_str()),
                    document,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_no_faults_passes_through() {
        let inner = InMemoryDocumentStore::new();
        let store =
            SimulatedDocumentStore::new(inner.clone(), 1, SimulatedStoreConfig::no_faults());
        let results = store.bulk(&ops(10)).await.unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(inner.document_count(), 10);
        let stats = store.stats();
        assert_eq!(stats.write_attempts, 10);
        assert_eq!(stats.write_failures, 0);
    }

    #[tokio::test]
    async fn test_failed_writes_are_not_applied() {
        let inner = InMemoryDocumentStore::new();
        let config = SimulatedStoreConfig {
            write_fail_prob: 0.5,
            ..SimulatedStoreConfig::no_faults()
        };
        let store = SimulatedDocumentStore::new(inner.clone(), 7, config);
        let results = store.bulk(&ops(100)).await.unwrap();
        assert_eq!(results.len(), 100);
        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(inner.document_count(), ok);
        assert_eq!(store.stats().write_failures as usize, 100 - ok);
        assert!(ok > 0 && ok < 100);
    }

    #[tokio::test]
    async fn test_same_seed_same_faults() {
        let run = |seed| async move {
            let store = SimulatedDocumentStore::new(
                InMemoryDocumentStore::new(),
                seed,
                SimulatedStoreConfig::high_chaos(),
            );
            let mut outcomes = Vec::new();
            for _ in 0..20 {
                match store.bulk(&ops(5)).await {
                    Ok(results) => outcomes.extend(results.iter().map(|r| r.is_ok())),
                    Err(_) => outcomes.push(false),
                }
            }
            outcomes
        };
        assert_eq!(run(99).await, run(99).await);
    }

    #[tokio::test]
    async fn test_read_faults() {
        let config = SimulatedStoreConfig {
            search_fail_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        };
        let store = SimulatedDocumentStore::new(InMemoryDocumentStore::new(), 3, config);
        let request = SearchRequest::new(vec![PartitionId::from("p")], 10);
        assert!(matches!(
            store.search(&request).await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.partitions("").await.is_err());
        assert_eq!(store.stats().read_failures, 2);
    }
}
