//! Series Load Tool
//!
//! Ingests a synthetic minute series into the configured document store,
//! retries points that came back `Failed` once, then reads the series back
//! under the configured cap and prints hourly sums.
//!
//! ## Usage
//!
//! ```text
//! series-load [--config <path>] [points] [batch_size]
//! ```
//!
//! Defaults: one day of minutes (1440 points) in batches of 100.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | SERIES_STORE | in_memory | Store: in_memory or simulated |
//! | SERIES_SEED | 0 | Fault injection seed for the simulated store |
//! | SERIES_MAX_POINTS | 10000 | Read cap for the read-back |
//! | SERIES_PARTITION_PERIOD | year | Partition period: year or month |
//! | SERIES_LOG_FILTER | info | Log filter (`RUST_LOG` overrides) |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use series_store::model::format_timestamp;
use series_store::observability::init_tracing;
use series_store::query::sum_histogram;
use series_store::{
    IngestService, IngestStatus, MeasurementDistance, SeriesDefinition, SeriesError, SeriesReader,
    ServiceConfig, SharedDocumentStore, TimeSeriesPoint,
};
use std::process::ExitCode;
use tokio::time::Instant;

const USAGE: &str = "usage: series-load [--config <path>] [points] [batch_size]";

#[derive(Debug, PartialEq)]
struct LoadPlan {
    points: usize,
    batch_size: usize,
}

impl Default for LoadPlan {
    fn default() -> Self {
        LoadPlan {
            points: 1440,
            batch_size: 100,
        }
    }
}

impl LoadPlan {
    fn parse(args: &[String]) -> Result<Self, String> {
        if args.len() > 2 {
            return Err("too many arguments".to_string());
        }
        let number = |index: usize, default: usize| match args.get(index) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| format!("expected a number, got '{}'", raw)),
        };
        let defaults = LoadPlan::default();
        let plan = LoadPlan {
            points: number(0, defaults.points)?,
            batch_size: number(1, defaults.batch_size)?,
        };
        if plan.batch_size == 0 {
            return Err("batch_size must be at least 1".to_string());
        }
        Ok(plan)
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0)
            .single()
            .expect("fixed start is a valid instant")
    }

    fn points(&self) -> Vec<TimeSeriesPoint> {
        (0..self.points)
            .map(|i| {
                TimeSeriesPoint::new(Self::start() + Duration::minutes(i as i64))
                    .measurement("count", (i % 60) as i64)
                    .category("source", if i % 2 == 0 { "a" } else { "b" })
            })
            .collect()
    }
}

#[derive(Debug, Default, PartialEq)]
struct LoadStats {
    ok: usize,
    failed: usize,
    conflict: usize,
    retried: usize,
}

impl LoadStats {
    fn record(&mut self, statuses: &[IngestStatus]) {
        for status in statuses {
            match status {
                IngestStatus::Ok => self.ok += 1,
                IngestStatus::Failed => self.failed += 1,
                IngestStatus::Conflict => self.conflict += 1,
            }
        }
    }
}

fn definition() -> Result<SeriesDefinition, SeriesError> {
    SeriesDefinition::new("load", "synthetic", MeasurementDistance::Minutes)
}

/// Ingest in batches, retrying each batch's `Failed` points once
async fn ingest_all(
    ingest: &IngestService<SharedDocumentStore>,
    definition: &SeriesDefinition,
    plan: &LoadPlan,
) -> Result<LoadStats, SeriesError> {
    let mut stats = LoadStats::default();
    for batch in plan.points().chunks(plan.batch_size) {
        let response = ingest.ingest(definition, batch).await?;
        let retry: Vec<TimeSeriesPoint> = response
            .retryable_positions()
            .into_iter()
            .map(|i| batch[i].clone())
            .collect();
        if retry.is_empty() {
            stats.record(&response.statuses);
            continue;
        }

        stats.retried += retry.len();
        let settled: Vec<IngestStatus> = response
            .statuses
            .into_iter()
            .filter(|s| *s != IngestStatus::Failed)
            .collect();
        stats.record(&settled);
        let again = ingest.ingest(definition, &retry).await?;
        stats.record(&again.statuses);
    }
    Ok(stats)
}

async fn run(config: &ServiceConfig, plan: &LoadPlan) -> Result<Vec<String>, SeriesError> {
    let definition = definition()?;
    let store = config.store.build();
    let ingest = IngestService::from_config(store.clone(), config);
    let reader = SeriesReader::from_config(store, config);

    let started = Instant::now();
    let stats = ingest_all(&ingest, &definition, plan).await?;
    let mut out = vec![format!(
        "ingested {} points in {:.2}ms: {} ok, {} failed, {} conflict, {} retried",
        plan.points,
        started.elapsed().as_secs_f64() * 1000.0,
        stats.ok,
        stats.failed,
        stats.conflict,
        stats.retried
    )];

    let points = reader.read(&definition, None, None).await?;
    out.push(format!("read back {} points", points.len()));
    for hour in sum_histogram(&points, definition.distance(), MeasurementDistance::Hours)? {
        let count = hour
            .get_measurement("count")
            .map(|v| v.to_string())
            .unwrap_or_default();
        out.push(format!("{} count={}", format_timestamp(&hour.timestamp), count));
    }
    if let Some(last) = ingest.last(&definition).await? {
        out.push(format!("last {}", format_timestamp(&last.timestamp)));
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config, args) = match ServiceConfig::from_args(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("error: {}\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };
    init_tracing(&config.logging);

    let plan = match LoadPlan::parse(&args) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("error: {}\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    match run(&config, &plan).await {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &str) -> Vec<String> {
        raw.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_plan() {
        assert_eq!(LoadPlan::parse(&[]).unwrap(), LoadPlan::default());
        assert_eq!(
            LoadPlan::parse(&args("120 50")).unwrap(),
            LoadPlan {
                points: 120,
                batch_size: 50
            }
        );
        assert!(LoadPlan::parse(&args("many")).is_err());
        assert!(LoadPlan::parse(&args("10 0")).is_err());
        assert!(LoadPlan::parse(&args("1 2 3")).is_err());
    }

    #[tokio::test]
    async fn test_run_in_memory() {
        let plan = LoadPlan {
            points: 120,
            batch_size: 50,
        };
        let out = run(&ServiceConfig::default(), &plan).await.unwrap();
        assert_eq!(out[1], "read back 120 points");
        // 0 + 1 + ... + 59 per hour
        assert_eq!(out[2], "2021-01-01T00:00:00Z count=1770");
        assert_eq!(out[3], "2021-01-01T01:00:00Z count=1770");
        assert_eq!(out[4], "last 2021-01-01T01:59:00Z");
    }

    #[tokio::test]
    async fn test_run_respects_read_cap() {
        let config = ServiceConfig::from_toml_str("[read]\nmax_points = 100").unwrap();
        let plan = LoadPlan {
            points: 120,
            batch_size: 50,
        };
        assert!(matches!(
            run(&config, &plan).await,
            Err(SeriesError::CapacityExceeded { limit: 100, total: 120 })
        ));
    }

    #[tokio::test]
    async fn test_ingest_retries_failed_points() {
        let raw = "[store]\nkind = \"simulated\"\nwrite_fail_prob = 1.0";
        let config = ServiceConfig::from_toml_str(raw).unwrap();
        let ingest = IngestService::from_config(config.store.build(), &config);
        let plan = LoadPlan {
            points: 10,
            batch_size: 5,
        };
        let stats = ingest_all(&ingest, &definition().unwrap(), &plan).await.unwrap();
        assert_eq!(stats.retried, 10);
        assert_eq!(stats.failed, 10);
        assert_eq!(stats.ok, 0);
    }
}
