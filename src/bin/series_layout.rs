//! Series Layout Tool
//!
//! Predicts where points land without touching storage: the partition a
//! point is written to, every partition a range read scans, and the
//! document identity used for upserts.
//!
//! ## Usage
//!
//! ```text
//! series-layout [--config <path>] resolve <owner> <name> <distance> <timestamp>
//! series-layout [--config <path>] range <owner> <name> <distance> <from> <to>
//! series-layout [--config <path>] identity <distance> <timestamp> [key=value...]
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | SERIES_PARTITION_PERIOD | year | Partition period: year or month |
//! | SERIES_LOG_FILTER | info | Log filter (`RUST_LOG` overrides) |
//! | SERIES_LOG_FORMAT | text | Log format: text or json |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use chrono::{DateTime, Utc};
use series_store::model::{format_timestamp, parse_timestamp};
use series_store::observability::init_tracing;
use series_store::{
    Categories, IdentityResolver, IndexResolver, MeasurementDistance, SeriesDefinition,
    ServiceConfig, TimeSeriesPoint,
};
use std::process::ExitCode;
use tracing::debug;

const USAGE: &str = "usage:
  series-layout [--config <path>] resolve <owner> <name> <distance> <timestamp>
  series-layout [--config <path>] range <owner> <name> <distance> <from> <to>
  series-layout [--config <path>] identity <distance> <timestamp> [key=value...]";

#[derive(Debug, PartialEq)]
enum LayoutCommand {
    Resolve {
        definition: SeriesDefinition,
        timestamp: DateTime<Utc>,
    },
    Range {
        definition: SeriesDefinition,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    Identity {
        distance: MeasurementDistance,
        timestamp: DateTime<Utc>,
        categories: Categories,
    },
}

impl LayoutCommand {
    fn parse(args: &[String]) -> Result<Self, String> {
        let (command, rest) = args.split_first().ok_or("missing command")?;
        match (command.as_str(), rest) {
            ("resolve", [owner, name, distance, timestamp]) => Ok(LayoutCommand::Resolve {
                definition: definition(owner, name, distance)?,
                timestamp: timestamp_arg(timestamp)?,
            }),
            ("range", [owner, name, distance, from, to]) => Ok(LayoutCommand::Range {
                definition: definition(owner, name, distance)?,
                from: timestamp_arg(from)?,
                to: timestamp_arg(to)?,
            }),
            ("identity", [distance, timestamp, pairs @ ..]) => {
                let mut categories = Categories::empty();
                for pair in pairs {
                    let (key, value) = pair
                        .split_once('=')
                        .ok_or_else(|| format!("expected key=value, got '{}'", pair))?;
                    categories.insert(key, value);
                }
                Ok(LayoutCommand::Identity {
                    distance: distance.parse().map_err(|e| format!("{}", e))?,
                    timestamp: timestamp_arg(timestamp)?,
                    categories,
                })
            }
            ("resolve" | "range" | "identity", _) => {
                Err(format!("wrong arguments for '{}'", command))
            }
            (other, _) => Err(format!("unknown command '{}'", other)),
        }
    }

    fn execute(&self, resolver: &IndexResolver) -> Vec<String> {
        match self {
            LayoutCommand::Resolve {
                definition,
                timestamp,
            } => {
                let bucket = definition.distance().bucket_start(*timestamp);
                vec![
                    format!("partition {}", resolver.resolve(definition, bucket)),
                    format!("bucket    {}", format_timestamp(&bucket)),
                ]
            }
            LayoutCommand::Range { definition, from, to } => resolver
                .resolve_range(definition, *from, *to)
                .into_iter()
                .map(|p| p.to_string())
                .collect(),
            LayoutCommand::Identity {
                distance,
                timestamp,
                categories,
            } => {
                let point = TimeSeriesPoint::new(*timestamp).with_categories(categories.clone());
                vec![IdentityResolver::id_at(&point, *distance).to_string()]
            }
        }
    }
}

fn definition(owner: &str, name: &str, distance: &str) -> Result<SeriesDefinition, String> {
    let distance: MeasurementDistance = distance.parse().map_err(|e| format!("{}", e))?;
    SeriesDefinition::new(owner, name, distance).map_err(|e| e.to_string())
}

fn timestamp_arg(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(raw).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config, args) = match ServiceConfig::from_args(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("error: {}\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };
    init_tracing(&config.logging);

    let command = match LayoutCommand::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {}\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };
    debug!("Executing {:?} with {:?} partitions", command, config.layout.partition_period);

    for line in command.execute(&config.layout.resolver()) {
        println!("{}", line);
    }
    ExitCode::SUCCESS
}
