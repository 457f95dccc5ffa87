//! LTM Core - Usage statistics for local language-model backends
//!
//! This crate provides the domain types and the pure aggregation logic
//! shared by the engine (`ltmd`) and the command-line tools:
//! - `stats` - per-session totals and per-model breakdowns, with merging
//! - `daily` - local calendar-day buckets for historical reports
//! - `model` - the static model catalog (display names, order, colours)
//!
//! Nothing here performs I/O.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod daily;
pub mod error;
pub mod model;
pub mod record;
pub mod session;
pub mod stats;
pub mod tokens;

// Re-exports for convenience
pub use daily::{
    aggregate_by_day, filter_by_modified_date, DailyModelStats, MAX_DAY_COUNT, UNKNOWN_DATE,
};
pub use error::{DomainError, DomainResult};
pub use model::Model;
pub use record::{MetadataRecord, StepRecord, Usage};
pub use session::{most_recent, SessionId, SessionSummary};
pub use stats::{calculate, merge, AggregatedStats, ModelStats, UsageTotals};
pub use tokens::TokenCount;
