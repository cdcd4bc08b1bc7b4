//! Deterministic Simulation Testing for the ingest/read path
//!
//! Shadow-state harness:
//! - seeded random batches over a handful of series
//! - fault injection at the document store (`SimulatedDocumentStore`)
//! - invariant checks after every operation and once more at the end
//!   against the fault-free inner store
//!
//! ```text
//! for seed in 0..1000 {
//!     let mut harness = IngestDstHarness::new(IngestDstConfig::moderate(seed));
//!     harness.run(200).await;
//!     harness.check_invariants().await;
//!     assert!(harness.result().is_success(), "seed {}", seed);
//! }
//! ```
//!
//! The shadow model tracks, per stored identity, every value the document
//! could hold. An `Ok` write pins it to one value; a `Failed` write may or
//! may not have landed (a timed-out bulk can still be applied), so it only
//! adds a candidate.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::ingest::{IngestService, IngestStatus};
use crate::layout::{DocumentId, IdentityResolver, IndexResolver};
use crate::model::{
    Categories, MeasurementDistance, MeasurementValue, SeriesDefinition, TimeSeriesPoint,
};
use crate::query::SeriesReader;
use crate::simulator::DeterministicRng;
use crate::store::{
    decode_point, DocumentStore, InMemoryDocumentStore, SimulatedDocumentStore,
    SimulatedStoreConfig, SimulatedStoreStats,
};

const OWNERS: [&str; 2] = ["100", "200"];
const NAMES: [&str; 2] = ["logins", "signatures"];
const DISTANCES: [MeasurementDistance; 2] =
    [MeasurementDistance::Minutes, MeasurementDistance::Hours];
const MEASUREMENTS: [&str; 2] = ["count", "bytes"];
const CATEGORY_KEYS: [&str; 2] = ["region", "channel"];
const CATEGORY_VALUES: [&str; 2] = ["north", "south"];
/// Points span this many minutes from `window_start()`, crossing a year boundary
const WINDOW_MINUTES: u64 = 240;
const READ_CAP: usize = 100_000;

fn window_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 12, 31, 22, 0, 0)
        .single()
        .expect("fixed window start is a valid instant")
}

/// Configuration for ingest DST
#[derive(Debug, Clone)]
pub struct IngestDstConfig {
    pub seed: u64,
    pub store_config: SimulatedStoreConfig,
    /// Upper bound on points per batch
    pub max_batch: usize,
    /// Probability an operation is a range read
    pub read_probability: f64,
    /// Probability an operation is a `last` lookup
    pub last_probability: f64,
    /// Probability a point reuses a category key as a measurement name
    pub conflict_probability: f64,
    /// Probability a point has no measurements
    pub invalid_probability: f64,
}

impl Default for IngestDstConfig {
    fn default() -> Self {
        IngestDstConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            max_batch: 8,
            read_probability: 0.15,
            last_probability: 0.05,
            conflict_probability: 0.02,
            invalid_probability: 0.02,
        }
    }
}

impl IngestDstConfig {
    pub fn new(seed: u64) -> Self {
        IngestDstConfig {
            seed,
            ..Default::default()
        }
    }

    /// No faults
    pub fn calm(seed: u64) -> Self {
        IngestDstConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            ..Default::default()
        }
    }

    pub fn moderate(seed: u64) -> Self {
        IngestDstConfig {
            seed,
            store_config: SimulatedStoreConfig::default(),
            ..Default::default()
        }
    }

    /// Aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        IngestDstConfig {
            seed,
            store_config: SimulatedStoreConfig::high_chaos(),
            conflict_probability: 0.05,
            invalid_probability: 0.05,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum DstOperation {
    Ingest {
        definition: SeriesDefinition,
        points: Vec<TimeSeriesPoint>,
    },
    Read {
        definition: SeriesDefinition,
    },
    Last {
        definition: SeriesDefinition,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DstOutcome {
    Ingested(Vec<IngestStatus>),
    Read { points: usize },
    Last { found: bool },
    /// Call-level failure (expected under fault injection)
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct RecordedOperation {
    pub id: u64,
    pub operation: DstOperation,
    pub outcome: DstOutcome,
}

/// What a stored identity may currently hold
#[derive(Debug, Clone, Default)]
struct ShadowEntry {
    candidates: Vec<TimeSeriesPoint>,
    /// Some write to this identity was acknowledged `Ok`
    must_exist: bool,
}

/// Random operation generator
pub struct IngestWorkload {
    rng: DeterministicRng,
    config: IngestDstConfig,
    definitions: Vec<SeriesDefinition>,
}

impl IngestWorkload {
    pub fn new(config: IngestDstConfig) -> Self {
        let mut definitions = Vec::new();
        for owner in OWNERS {
            for name in NAMES {
                for distance in DISTANCES {
                    if let Ok(definition) = SeriesDefinition::new(owner, name, distance) {
                        definitions.push(definition);
                    }
                }
            }
        }
        IngestWorkload {
            rng: DeterministicRng::new(config.seed),
            config,
            definitions,
        }
    }

    pub fn definitions(&self) -> &[SeriesDefinition] {
        &self.definitions
    }

    pub fn next_operation(&mut self) -> DstOperation {
        let definition = self.definitions[self.rng.gen_index(self.definitions.len())].clone();
        if self.rng.gen_bool(self.config.read_probability) {
            return DstOperation::Read { definition };
        }
        if self.rng.gen_bool(self.config.last_probability) {
            return DstOperation::Last { definition };
        }
        let count = self.rng.gen_range(1, self.config.max_batch as u64 + 1) as usize;
        let points = (0..count).map(|_| self.next_point()).collect();
        DstOperation::Ingest { definition, points }
    }

    fn next_point(&mut self) -> TimeSeriesPoint {
        let offset = self.rng.gen_range(0, WINDOW_MINUTES * 60) as i64;
        let mut point = TimeSeriesPoint::new(window_start() + Duration::seconds(offset));

        for key in CATEGORY_KEYS {
            if self.rng.gen_bool(0.5) {
                if let Some(value) = self.rng.choose(&CATEGORY_VALUES) {
                    point = point.category(key, *value);
                }
            }
        }

        if self.rng.gen_bool(self.config.invalid_probability) {
            return point;
        }

        for name in MEASUREMENTS {
            if self.rng.gen_bool(0.7) {
                let value = if self.rng.gen_bool(0.1) {
                    MeasurementValue::Float(self.rng.gen_range(0, 10_000) as f64 / 8.0)
                } else {
                    MeasurementValue::Integer(self.rng.gen_i64(0, 1_000_000))
                };
                point = point.measurement(name, value);
            }
        }
        if point.measurements.is_empty() {
            point = point.measurement(MEASUREMENTS[0], 1);
        }

        if self.rng.gen_bool(self.config.conflict_probability) {
            // Category key reused as a numeric field
            let Some(&key) = self.rng.choose(&CATEGORY_KEYS) else {
                return point;
            };
            let kept: BTreeMap<String, String> = point
                .categories
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            point = point.with_categories(Categories::new(kept)).measurement(key, 1);
        }
        point
    }
}

/// Result of a DST run
#[derive(Debug, Clone, Default)]
pub struct IngestDstResult {
    pub seed: u64,
    pub total_operations: u64,
    pub points_submitted: u64,
    pub points_ok: u64,
    pub points_failed: u64,
    pub points_conflict: u64,
    pub reads: u64,
    pub call_failures: u64,
    pub store_stats: SimulatedStoreStats,
    pub invariant_violations: Vec<String>,
    pub history: Vec<RecordedOperation>,
}

impl IngestDstResult {
    pub fn new(seed: u64) -> Self {
        IngestDstResult {
            seed,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops, {} points ({} ok, {} failed, {} conflict), {} reads, {} call failures, {} violations",
            self.seed,
            self.total_operations,
            self.points_submitted,
            self.points_ok,
            self.points_failed,
            self.points_conflict,
            self.reads,
            self.call_failures,
            self.invariant_violations.len()
        )
    }
}

type DstStore = SimulatedDocumentStore<InMemoryDocumentStore>;

/// Main DST harness for ingest and reads
pub struct IngestDstHarness {
    workload: IngestWorkload,
    store: DstStore,
    ingest: IngestService<DstStore>,
    reader: SeriesReader<DstStore>,
    shadow: HashMap<(SeriesDefinition, DocumentId), ShadowEntry>,
    result: IngestDstResult,
}

impl IngestDstHarness {
    pub fn new(config: IngestDstConfig) -> Self {
        // Different seed for the store so faults and workload are independent
        let store = SimulatedDocumentStore::new(
            InMemoryDocumentStore::new(),
            config.seed.wrapping_add(1),
            config.store_config.clone(),
        );
        let resolver = IndexResolver::default();
        let result = IngestDstResult::new(config.seed);
        IngestDstHarness {
            workload: IngestWorkload::new(config),
            ingest: IngestService::new(store.clone(), resolver),
            reader: SeriesReader::new(store.clone(), resolver).with_max_points(READ_CAP),
            store,
            shadow: HashMap::new(),
            result,
        }
    }

    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.workload.next_operation();
            self.execute_operation(op).await;
        }
    }

    async fn execute_operation(&mut self, op: DstOperation) {
        self.result.total_operations += 1;
        let id = self.result.total_operations;

        let outcome = match &op {
            DstOperation::Ingest { definition, points } => {
                self.execute_ingest(definition, points).await
            }
            DstOperation::Read { definition } => self.execute_read(definition).await,
            DstOperation::Last { definition } => self.execute_last(definition).await,
        };
        if let DstOutcome::Failed(_) = outcome {
            self.result.call_failures += 1;
        }
        self.result.history.push(RecordedOperation {
            id,
            operation: op,
            outcome,
        });
    }

    async fn execute_ingest(
        &mut self,
        definition: &SeriesDefinition,
        points: &[TimeSeriesPoint],
    ) -> DstOutcome {
        let response = match self.ingest.ingest(definition, points).await {
            Ok(response) => response,
            Err(e) => return DstOutcome::Failed(e.to_string()),
        };
        self.result.points_submitted += points.len() as u64;

        if response.len() != points.len() {
            self.violation(format!(
                "ingest of {} points returned {} statuses",
                points.len(),
                response.len()
            ));
        }

        for (point, status) in points.iter().zip(&response.statuses) {
            let stored = stored_form(point, definition);
            let entry = self
                .shadow
                .entry((definition.clone(), IdentityResolver::id(point, definition)))
                .or_default();
            match status {
                IngestStatus::Ok => {
                    self.result.points_ok += 1;
                    entry.candidates = vec![stored];
                    entry.must_exist = true;
                }
                IngestStatus::Failed => {
                    self.result.points_failed += 1;
                    entry.candidates.push(stored);
                }
                IngestStatus::Conflict => self.result.points_conflict += 1,
            }
        }
        DstOutcome::Ingested(response.statuses)
    }

    async fn execute_read(&mut self, definition: &SeriesDefinition) -> DstOutcome {
        self.result.reads += 1;
        match self.reader.read(definition, None, None).await {
            Ok(points) => {
                self.check_read(definition, &points);
                DstOutcome::Read { points: points.len() }
            }
            Err(e) => DstOutcome::Failed(e.to_string()),
        }
    }

    async fn execute_last(&mut self, definition: &SeriesDefinition) -> DstOutcome {
        match self.ingest.last(definition).await {
            Ok(last) => {
                let latest_required = self
                    .shadow
                    .iter()
                    .filter(|((def, _), entry)| def == definition && entry.must_exist)
                    .filter_map(|(_, entry)| entry.candidates.first().map(|p| p.timestamp))
                    .max();
                match (&last, latest_required) {
                    (None, Some(ts)) => self.violation(format!(
                        "last({}) is empty but a point at {} was acknowledged",
                        definition, ts
                    )),
                    (Some(point), Some(ts)) if point.timestamp < ts => self.violation(format!(
                        "last({}) returned {} but a point at {} was acknowledged",
                        definition, point.timestamp, ts
                    )),
                    _ => {}
                }
                if let Some(point) = &last {
                    self.check_known(definition, point);
                }
                DstOutcome::Last { found: last.is_some() }
            }
            Err(e) => DstOutcome::Failed(e.to_string()),
        }
    }

    /// Final checks against the fault-free inner store: every series read
    /// in full, and every acknowledged point fetched by its identity
    pub async fn check_invariants(&mut self) {
        let inner = self.store.inner().clone();
        let resolver = IndexResolver::default();
        let reader = SeriesReader::new(inner.clone(), resolver).with_max_points(READ_CAP);
        let definitions = self.workload.definitions().to_vec();
        for definition in &definitions {
            match reader.read(definition, None, None).await {
                Ok(points) => self.check_read(definition, &points),
                Err(e) => {
                    self.violation(format!("fault-free read of {} failed: {}", definition, e))
                }
            }
        }

        let acknowledged: Vec<(SeriesDefinition, DocumentId, DateTime<Utc>)> = self
            .shadow
            .iter()
            .filter(|(_, entry)| entry.must_exist)
            .filter_map(|((def, id), entry)| {
                entry
                    .candidates
                    .first()
                    .map(|p| (def.clone(), id.clone(), p.timestamp))
            })
            .collect();
        for (definition, id, timestamp) in acknowledged {
            let partition = resolver.resolve(&definition, timestamp);
            match inner.get(&partition, &id).await {
                Ok(Some(document)) => match decode_point(&document) {
                    Ok(point) => self.check_known(&definition, &point),
                    Err(e) => self.violation(format!(
                        "document {} in {} is corrupt: {}",
                        id, partition, e
                    )),
                },
                Ok(None) => self.violation(format!(
                    "acknowledged point {} of {} not found in {}",
                    id, definition, partition
                )),
                Err(e) => self.violation(format!("fault-free get of {} failed: {}", id, e)),
            }
        }
        self.result.store_stats = self.store.stats();
    }

    fn check_read(&mut self, definition: &SeriesDefinition, points: &[TimeSeriesPoint]) {
        if !points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp) {
            self.violation(format!("read of {} is not ascending", definition));
        }

        let mut seen = HashSet::new();
        for point in points {
            let id = IdentityResolver::id(point, definition);
            if !seen.insert(id.clone()) {
                self.violation(format!("read of {} returned identity {} twice", definition, id));
            }
            self.check_known(definition, point);
        }

        let missing: Vec<String> = self
            .shadow
            .iter()
            .filter(|((def, id), entry)| {
                def == definition && entry.must_exist && !seen.contains(id)
            })
            .map(|((_, id), _)| id.to_string())
            .collect();
        for id in missing {
            self.violation(format!("acknowledged point {} of {} is missing", id, definition));
        }
    }

    /// A stored point must hold one of the values its identity may hold
    fn check_known(&mut self, definition: &SeriesDefinition, point: &TimeSeriesPoint) {
        let id = IdentityResolver::id(point, definition);
        let known = self
            .shadow
            .get(&(definition.clone(), id.clone()))
            .map_or(false, |entry| entry.candidates.iter().any(|c| c == point));
        if !known {
            self.violation(format!(
                "stored point {} of {} does not match any write",
                id, definition
            ));
        }
    }

    fn violation(&mut self, message: String) {
        tracing::warn!("Seed {}: {}", self.result.seed, message);
        self.result.invariant_violations.push(message);
    }

    pub fn result(&self) -> &IngestDstResult {
        &self.result
    }

    pub fn into_result(self) -> IngestDstResult {
        self.result
    }
}

/// The point as the store keeps it: timestamp truncated to the bucket
fn stored_form(point: &TimeSeriesPoint, definition: &SeriesDefinition) -> TimeSeriesPoint {
    TimeSeriesPoint {
        timestamp: definition.distance().bucket_start(point.timestamp),
        ..point.clone()
    }
}

/// Run a batch of DST runs over consecutive seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> IngestDstConfig,
) -> Vec<IngestDstResult> {
    let mut results = Vec::with_capacity(count);
    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = IngestDstHarness::new(config_fn(seed));
        harness.run(ops_per_run).await;
        harness.check_invariants().await;
        results.push(harness.into_result());
    }
    results
}

pub fn summarize_batch(results: &[IngestDstResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();
    let points: u64 = results.iter().map(|r| r.points_submitted).sum();
    let ok: u64 = results.iter().map(|r| r.points_ok).sum();
    let conflicts: u64 = results.iter().map(|r| r.points_conflict).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} points, {} ok, {} conflict",
        passed, total, points, ok, conflicts
    );
    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }
    summary
}
