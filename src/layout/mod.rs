//! Physical layout: where a point is stored and under which id
//!
//! Both resolvers are pure functions of their inputs. Operational tooling
//! (reindexing, migration scripts) can call them to predict the layout
//! without touching storage.

mod identity;
mod index;

pub use identity::{DocumentId, IdentityResolver};
pub use index::{IndexResolver, ParsedPartition, PartitionId, PartitionPeriod};
