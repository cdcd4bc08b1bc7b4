//! Partition (physical index) resolution
//!
//! Partition ids have the form `<owner>@<name>@<distance label><period>`:
//!
//! - `123@series@minute2021` (yearly partitions, the default)
//! - `123@series@hour202103` (monthly partitions)
//!
//! The period is a policy independent of the series' own distance: a minute
//! series and a year series owned by the same organization are both split by
//! calendar year unless configured otherwise. Resolution is pure, so callers
//! can compute target partitions before touching storage.

use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SeriesError;
use crate::model::{MeasurementDistance, SeriesDefinition};

const SEPARATOR: char = '@';

/// Time span covered by one partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionPeriod {
    /// One partition per calendar year (UTC)
    #[default]
    Year,
    /// One partition per calendar month (UTC)
    Month,
}

impl PartitionPeriod {
    /// Fixed-width period key: `2021` for years, `202103` for months
    pub fn key(&self, timestamp: DateTime<Utc>) -> String {
        match self {
            PartitionPeriod::Year => format!("{:04}", timestamp.year()),
            PartitionPeriod::Month => format!("{:04}{:02}", timestamp.year(), timestamp.month()),
        }
    }

    fn start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let month = match self {
            PartitionPeriod::Year => 1,
            PartitionPeriod::Month => timestamp.month(),
        };
        Utc.with_ymd_and_hms(timestamp.year(), month, 1, 0, 0, 0)
            .single()
            .expect("first day of a valid month is a valid instant")
    }

    fn next(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let months = match self {
            PartitionPeriod::Year => 12,
            PartitionPeriod::Month => 1,
        };
        start.checked_add_months(Months::new(months))
    }
}

impl FromStr for PartitionPeriod {
    type Err = SeriesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "year" => Ok(PartitionPeriod::Year),
            "month" => Ok(PartitionPeriod::Month),
            other => Err(SeriesError::invalid(format!("unknown partition period: {}", other))),
        }
    }
}

/// Name of a physical partition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(String);

impl PartitionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode a partition id back into its components
    ///
    /// Returns `None` for names that were not produced by `IndexResolver`.
    pub fn parse(id: &str) -> Option<ParsedPartition> {
        let mut parts = id.split(SEPARATOR);
        let owner = parts.next()?;
        let name = parts.next()?;
        let tail = parts.next()?;
        if parts.next().is_some() || owner.is_empty() || name.is_empty() {
            return None;
        }

        let digits_at = tail.find(|c: char| c.is_ascii_digit())?;
        let (label, period) = tail.split_at(digits_at);
        if !period.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let distance = MeasurementDistance::from_partition_label(label)?;
        let definition = SeriesDefinition::new(owner, name, distance).ok()?;

        Some(ParsedPartition {
            definition,
            period: period.to_string(),
        })
    }
}

impl From<String> for PartitionId {
    fn from(name: String) -> Self {
        PartitionId(name)
    }
}

impl From<&str> for PartitionId {
    fn from(name: &str) -> Self {
        PartitionId(name.to_string())
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PartitionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Components recovered from a partition id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPartition {
    pub definition: SeriesDefinition,
    pub period: String,
}

/// Maps (definition, timestamp) to the partition holding that point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexResolver {
    period: PartitionPeriod,
}

impl IndexResolver {
    pub fn new(period: PartitionPeriod) -> Self {
        IndexResolver { period }
    }

    pub fn period(&self) -> PartitionPeriod {
        self.period
    }

    /// Resolve the partition for a single point
    pub fn resolve(&self, definition: &SeriesDefinition, timestamp: DateTime<Utc>) -> PartitionId {
        PartitionId(format!(
            "{}{}",
            Self::series_prefix(definition),
            self.period.key(timestamp)
        ))
    }

    /// Every partition touched by `[from, to]` inclusive, in ascending order
    ///
    /// An inverted range touches nothing.
    pub fn resolve_range(
        &self,
        definition: &SeriesDefinition,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<PartitionId> {
        let mut partitions = Vec::new();
        if from > to {
            return partitions;
        }
        let mut cursor = Some(self.period.start(from));
        while let Some(start) = cursor {
            if start > to {
                break;
            }
            partitions.push(self.resolve(definition, start));
            cursor = self.period.next(start);
        }
        partitions
    }

    /// Check whether an existing partition's period intersects `[from, to]`
    ///
    /// Either bound may be open. Period keys are fixed width, so they compare
    /// lexicographically.
    pub fn period_in_range(
        &self,
        period_key: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> bool {
        let after_from = from.map_or(true, |f| period_key >= self.period.key(f).as_str());
        let before_to = to.map_or(true, |t| period_key <= self.period.key(t).as_str());
        after_from && before_to
    }

    /// Prefix shared by every partition of one series: `owner@name@minute`
    pub fn series_prefix(definition: &SeriesDefinition) -> String {
        format!(
            "{}{}{}{}{}",
            definition.owner(),
            SEPARATOR,
            definition.name(),
            SEPARATOR,
            definition.distance().partition_label()
        )
    }

    /// Prefix shared by every partition of one owner: `owner@`
    pub fn owner_prefix(owner: &str) -> String {
        format!("{}{}", owner, SEPARATOR)
    }
}
