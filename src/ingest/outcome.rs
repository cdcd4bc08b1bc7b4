//! Per-point ingest statuses
//!
//! Wire format: `{"statuses": ["Ok", "Failed", "Conflict"]}`, index-aligned
//! with the submitted points.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IngestStatus {
    /// Created or overwritten
    Ok,
    /// Invalid point or transient storage failure; safe to retry
    Failed,
    /// Field type incompatible with the partition mapping
    Conflict,
}

impl fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestStatus::Ok => f.write_str("Ok"),
            IngestStatus::Failed => f.write_str("Failed"),
            IngestStatus::Conflict => f.write_str("Conflict"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub statuses: Vec<IngestStatus>,
}

impl IngestResponse {
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn count(&self, status: IngestStatus) -> usize {
        self.statuses.iter().filter(|s| **s == status).count()
    }

    pub fn all_ok(&self) -> bool {
        self.statuses.iter().all(|s| *s == IngestStatus::Ok)
    }

    /// Positions worth retrying: `Failed` only, a `Conflict` fails again
    pub fn retryable_positions(&self) -> Vec<usize> {
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == IngestStatus::Failed)
            .map(|(i, _)| i)
            .collect()
    }
}
