//! Historical per-day usage.
//!
//! Records are bucketed by **local** calendar day so that a call made late
//! in the evening is not attributed to the next UTC day. The window always
//! covers `day_count` consecutive days ending today; records outside it are
//! ignored. Records whose date cannot be resolved land in a single
//! [`UNKNOWN_DATE`] bucket, which is dropped when empty.

use std::collections::BTreeMap;

use chrono::{DateTime, Days, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{DomainError, DomainResult};
use crate::record::{MetadataRecord, StepRecord, Usage};
use crate::session::SessionSummary;
use crate::stats::{ModelAccumulator, ModelStats, UsageTotals};
use crate::tokens::cache_efficiency;

/// Date key of the bucket holding records without a resolvable date.
pub const UNKNOWN_DATE: &str = "unknown";

/// Date key format of regular buckets.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Largest day window; larger requests are clamped to it.
pub const MAX_DAY_COUNT: u32 = 365;

// ============================================================================
// Daily Model Stats
// ============================================================================

/// Usage for one calendar day (or the unknown-date bucket).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyModelStats {
    /// `YYYY-MM-DD` in local time, or [`UNKNOWN_DATE`].
    pub date: String,
    /// Per-model usage keyed by display name.
    pub models: BTreeMap<String, ModelStats>,
    pub totals: UsageTotals,
    /// `round(cache_read / (input + cache_read) * 100)`.
    pub cache_efficiency: u32,
}

impl DailyModelStats {
    /// Returns true for the unknown-date bucket.
    pub fn is_unknown_date(&self) -> bool {
        self.date == UNKNOWN_DATE
    }

    /// Model entries in catalog order.
    pub fn models_in_catalog_order(&self) -> Vec<&ModelStats> {
        let mut models: Vec<_> = self.models.values().collect();
        models.sort_by_key(|m| m.sort_order());
        models
    }
}

/// Bucket under construction.
struct DayBucket {
    date: String,
    models: ModelAccumulator,
    totals: UsageTotals,
}

impl DayBucket {
    fn new(date: String) -> Self {
        Self {
            date,
            models: ModelAccumulator::default(),
            totals: UsageTotals::default(),
        }
    }

    fn record(&mut self, usage: &Usage) {
        self.models.record(usage);
        self.totals.record(usage);
    }

    fn is_empty(&self) -> bool {
        self.totals.is_empty() && self.models.is_empty()
    }

    fn finish(self) -> DailyModelStats {
        let models = self
            .models
            .iter()
            .map(|m| (m.display_name.clone(), m.clone()))
            .collect();
        DailyModelStats {
            cache_efficiency: cache_efficiency(self.totals.input, self.totals.cache_read),
            date: self.date,
            models,
            totals: self.totals,
        }
    }
}

// ============================================================================
// Date Resolution
// ============================================================================

/// Parses a backend timestamp into a local calendar date.
///
/// Accepts RFC 3339 (the backend's normal format, any offset) and, as a
/// fallback, offset-less `YYYY-MM-DDTHH:MM:SS[.f]` which is taken as local
/// time already.
pub fn parse_local_date(timestamp: &str) -> DomainResult<NaiveDate> {
    let trimmed = timestamp.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Local).date_naive());
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|dt| dt.date())
        .map_err(|e| DomainError::InvalidTimestamp {
            value: timestamp.to_string(),
            reason: e.to_string(),
        })
}

/// First resolvable date among a metadata record's timestamp sources.
fn resolve_record_date(record: &MetadataRecord) -> Option<NaiveDate> {
    record
        .date_sources()
        .find_map(|ts| parse_local_date(ts).ok())
}

fn resolve_step_date(step: &StepRecord) -> Option<NaiveDate> {
    step.created_at
        .as_deref()
        .and_then(|ts| parse_local_date(ts).ok())
}

/// Clamps a requested window to `1..=MAX_DAY_COUNT`.
fn clamp_day_count(day_count: u32) -> u32 {
    day_count.clamp(1, MAX_DAY_COUNT)
}

/// First day of a window of `day_count` days ending on `today`.
fn window_start(today: NaiveDate, day_count: u32) -> NaiveDate {
    let span = u64::from(clamp_day_count(day_count) - 1);
    today.checked_sub_days(Days::new(span)).unwrap_or(NaiveDate::MIN)
}

// ============================================================================
// Public Operations
// ============================================================================

/// Keeps sessions modified on or after local midnight `day_count - 1` days ago.
pub fn filter_by_modified_date(sessions: &[SessionSummary], day_count: u32) -> Vec<SessionSummary> {
    filter_by_modified_date_at(sessions, day_count, Local::now().date_naive())
}

/// [`filter_by_modified_date`] with an explicit "today".
///
/// Sessions with an unparsable `last_modified` are excluded.
pub fn filter_by_modified_date_at(
    sessions: &[SessionSummary],
    day_count: u32,
    today: NaiveDate,
) -> Vec<SessionSummary> {
    let start = window_start(today, day_count);
    sessions
        .iter()
        .filter(|s| match parse_local_date(&s.last_modified) {
            Ok(date) => date >= start,
            Err(e) => {
                debug!(session_id = %s.session_id, error = %e, "Skipping session with bad timestamp");
                false
            }
        })
        .cloned()
        .collect()
}

/// Buckets usage by local calendar day over the trailing `day_count` days.
pub fn aggregate_by_day(
    metadata: &[MetadataRecord],
    steps: &[StepRecord],
    day_count: u32,
) -> Vec<DailyModelStats> {
    aggregate_by_day_at(metadata, steps, day_count, Local::now().date_naive())
}

/// [`aggregate_by_day`] with an explicit "today".
///
/// Metadata records resolve their day from the record timestamp, then the
/// nested chat start time. Steps resolve it from their own creation time.
/// Either kind falls into the unknown-date bucket when no source parses.
/// The result has one entry per day of the window, newest first, followed
/// by the unknown-date bucket if it received anything.
pub fn aggregate_by_day_at(
    metadata: &[MetadataRecord],
    steps: &[StepRecord],
    day_count: u32,
    today: NaiveDate,
) -> Vec<DailyModelStats> {
    let days = clamp_day_count(day_count);
    let mut buckets: BTreeMap<NaiveDate, DayBucket> = (0..days)
        .filter_map(|offset| today.checked_sub_days(Days::new(u64::from(offset))))
        .map(|date| (date, DayBucket::new(date.format(DATE_FORMAT).to_string())))
        .collect();
    let mut unknown = DayBucket::new(UNKNOWN_DATE.to_string());

    let dated_usage = metadata
        .iter()
        .filter_map(|r| r.usage.as_ref().map(|u| (resolve_record_date(r), u)))
        .chain(
            steps
                .iter()
                .filter_map(|s| s.usage.as_ref().map(|u| (resolve_step_date(s), u))),
        );

    for (date, usage) in dated_usage {
        match date {
            Some(date) => match buckets.get_mut(&date) {
                Some(bucket) => bucket.record(usage),
                None => trace!(%date, "Usage outside day window"),
            },
            None => unknown.record(usage),
        }
    }

    let mut result: Vec<DailyModelStats> = buckets.into_values().map(DayBucket::finish).collect();
    if !unknown.is_empty() {
        result.push(unknown.finish());
    }
    sort_days(&mut result);
    result
}

/// Sorts newest date first with the unknown-date bucket last.
fn sort_days(days: &mut [DailyModelStats]) {
    days.sort_by(|a, b| match (a.is_unknown_date(), b.is_unknown_date()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => b.date.cmp(&a.date),
    });
}
