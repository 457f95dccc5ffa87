//! Single-entry delta cache for session statistics.
//!
//! The cache remembers the aggregate of one session together with the
//! offsets at which each record stream ended. A refresh then only asks the
//! backend for what came after those offsets.
//!
//! | Situation                                   | Action                         |
//! |---------------------------------------------|--------------------------------|
//! | no entry, or entry for another session      | full fetch from (0, 0)         |
//! | same session, same timestamp, not forced    | cached stats, no requests      |
//! | timestamp changed, forced, or last fetch    | fetch from stored offsets      |
//! | stopped at the page cap                     |                                |
//! | reported step count below stored offset     | discard entry, full fetch      |
//!
//! The cache is not synchronized; its single owner (the controller actor)
//! serializes every read-modify-write cycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use ltm_core::{calculate, merge, AggregatedStats, SessionId, SessionSummary};

use crate::fetcher::{fetch_from, FetchBatch};
use crate::transport::{Transport, TransportError};

/// Cached statistics of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub session_id: SessionId,
    /// `last_modified` of the session when the entry was last refreshed.
    pub last_modified: String,
    pub stats: AggregatedStats,
    pub next_metadata_offset: usize,
    pub next_step_offset: usize,
    /// False when the fetch stopped at the page cap with records left.
    pub complete: bool,
    pub captured_at: DateTime<Utc>,
}

/// How a refresh was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshKind {
    /// Full fetch for a session with no usable entry.
    Cold,
    /// Served from cache without any request.
    Hit,
    /// Fetched only records past the stored offsets.
    Delta,
    /// Entry found inconsistent and rebuilt from scratch.
    Rebuilt,
}

/// Result of [`DeltaCache::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub stats: AggregatedStats,
    pub kind: RefreshKind,
    pub request_count: u32,
}

/// What a refresh has to do, decided before touching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPlan {
    Hit,
    Full(RefreshKind),
    Delta {
        metadata_offset: usize,
        step_offset: usize,
    },
}

#[derive(Debug, Default)]
pub struct DeltaCache {
    entry: Option<CacheEntry>,
}

impl DeltaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }

    /// Decides how to refresh `summary`.
    pub fn plan(&self, summary: &SessionSummary, force: bool) -> RefreshPlan {
        let Some(entry) = self
            .entry
            .as_ref()
            .filter(|e| e.session_id == summary.session_id)
        else {
            return RefreshPlan::Full(RefreshKind::Cold);
        };

        // A step count of zero means the backend did not report one.
        if summary.step_count > 0 && summary.step_count < entry.next_step_offset as u64 {
            warn!(
                session_id = %summary.session_id,
                step_count = summary.step_count,
                cached_offset = entry.next_step_offset,
                "Session has fewer steps than cached, discarding cache"
            );
            return RefreshPlan::Full(RefreshKind::Rebuilt);
        }

        if !force && entry.complete && entry.last_modified == summary.last_modified {
            return RefreshPlan::Hit;
        }

        RefreshPlan::Delta {
            metadata_offset: entry.next_metadata_offset,
            step_offset: entry.next_step_offset,
        }
    }

    /// Refreshes the statistics of `summary`'s session.
    ///
    /// On error the previous entry is left as it was, except when it had
    /// already been found inconsistent.
    pub async fn refresh<T>(
        &mut self,
        transport: &T,
        summary: &SessionSummary,
        force: bool,
    ) -> Result<RefreshOutcome, TransportError>
    where
        T: Transport + ?Sized,
    {
        match self.plan(summary, force) {
            RefreshPlan::Hit => {
                debug!(session_id = %summary.session_id, "Cache hit");
                let stats = self
                    .entry
                    .as_ref()
                    .map(|e| e.stats.clone())
                    .unwrap_or_default();
                Ok(RefreshOutcome {
                    stats,
                    kind: RefreshKind::Hit,
                    request_count: 0,
                })
            }
            RefreshPlan::Full(kind) => {
                if kind == RefreshKind::Rebuilt {
                    self.entry = None;
                }
                self.full(transport, summary, kind).await
            }
            RefreshPlan::Delta {
                metadata_offset,
                step_offset,
            } => {
                let batch =
                    fetch_from(transport, &summary.session_id, metadata_offset, step_offset)
                        .await?;
                Ok(self.apply_delta(summary, batch))
            }
        }
    }

    async fn full<T>(
        &mut self,
        transport: &T,
        summary: &SessionSummary,
        kind: RefreshKind,
    ) -> Result<RefreshOutcome, TransportError>
    where
        T: Transport + ?Sized,
    {
        let batch = fetch_from(transport, &summary.session_id, 0, 0).await?;
        let stats = calculate(&batch.metadata, &batch.steps);
        debug!(
            session_id = %summary.session_id,
            kind = ?kind,
            calls = stats.total_calls,
            requests = batch.request_count,
            truncated = batch.truncated,
            "Full fetch complete"
        );

        self.entry = Some(CacheEntry {
            session_id: summary.session_id.clone(),
            last_modified: summary.last_modified.clone(),
            stats: stats.clone(),
            next_metadata_offset: batch.next_metadata_offset,
            next_step_offset: batch.next_step_offset,
            complete: !batch.truncated,
            captured_at: Utc::now(),
        });

        Ok(RefreshOutcome {
            stats,
            kind,
            request_count: batch.request_count,
        })
    }

    fn apply_delta(&mut self, summary: &SessionSummary, batch: FetchBatch) -> RefreshOutcome {
        let previous = self
            .entry
            .take()
            .filter(|e| e.session_id == summary.session_id)
            .map(|e| e.stats)
            .unwrap_or_default();

        let stats = if batch.is_empty() {
            previous
        } else {
            merge(&previous, &calculate(&batch.metadata, &batch.steps))
        };
        debug!(
            session_id = %summary.session_id,
            new_metadata = batch.metadata.len(),
            new_steps = batch.steps.len(),
            calls = stats.total_calls,
            truncated = batch.truncated,
            "Delta applied"
        );

        self.entry = Some(CacheEntry {
            session_id: summary.session_id.clone(),
            last_modified: summary.last_modified.clone(),
            stats: stats.clone(),
            next_metadata_offset: batch.next_metadata_offset,
            next_step_offset: batch.next_step_offset,
            complete: !batch.truncated,
            captured_at: Utc::now(),
        });

        RefreshOutcome {
            stats,
            kind: RefreshKind::Delta,
            request_count: batch.request_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ltm_protocol::Method;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Backend {
        metadata: Mutex<Vec<Value>>,
        steps: Mutex<Vec<Value>>,
        calls: AtomicU32,
        offline: AtomicBool,
        /// Items per page; zero serves everything in one page.
        page_size: usize,
    }

    impl Backend {
        fn push_metadata(&self, model: &str, input: u64) {
            self.metadata.lock().unwrap().push(json!({
                "chatModel": {"model": model, "usage": {"inputTokens": input.to_string()}}
            }));
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for Backend {
        async fn call(&self, method: Method, payload: Value) -> Result<Value, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(TransportError::Connect {
                    port: 1,
                    message: "refused".to_string(),
                });
            }
            let offset = payload["offset"].as_u64().unwrap() as usize;
            let source = match method {
                Method::GetMetadataPage => &self.metadata,
                _ => &self.steps,
            };
            let take = if self.page_size == 0 { usize::MAX } else { self.page_size };
            let items: Vec<Value> = source
                .lock()
                .unwrap()
                .iter()
                .skip(offset)
                .take(take)
                .cloned()
                .collect();
            Ok(json!({ "items": items }))
        }
    }

    fn summary(id: &str, modified: &str) -> SessionSummary {
        SessionSummary::new(SessionId::new(id), "", modified, 0)
    }

    #[tokio::test]
    async fn test_cold_then_hit() {
        let backend = Backend::default();
        backend.push_metadata("MODEL_CLAUDE_4_5_SONNET", 100);
        let mut cache = DeltaCache::new();
        let s = summary("a", "2026-02-01T00:00:00Z");

        let cold = cache.refresh(&backend, &s, false).await.unwrap();
        assert_eq!(cold.kind, RefreshKind::Cold);
        assert_eq!(cold.stats.total_input.as_u64(), 100);
        let calls_after_cold = backend.calls();

        let hit = cache.refresh(&backend, &s, false).await.unwrap();
        assert_eq!(hit.kind, RefreshKind::Hit);
        assert_eq!(hit.request_count, 0);
        assert_eq!(hit.stats, cold.stats);
        assert_eq!(backend.calls(), calls_after_cold);
    }

    #[tokio::test]
    async fn test_delta_fetches_only_new_records() {
        let backend = Backend::default();
        backend.push_metadata("A", 100);
        let mut cache = DeltaCache::new();
        cache
            .refresh(&backend, &summary("a", "2026-02-01T00:00:00Z"), false)
            .await
            .unwrap();

        backend.push_metadata("A", 50);
        backend.push_metadata("B", 25);
        let delta = cache
            .refresh(&backend, &summary("a", "2026-02-01T00:05:00Z"), false)
            .await
            .unwrap();

        assert_eq!(delta.kind, RefreshKind::Delta);
        assert_eq!(delta.stats.total_calls, 3);
        assert_eq!(delta.stats.total_input.as_u64(), 175);
        assert_eq!(delta.stats.model("A").unwrap().calls, 2);
        let entry = cache.entry().unwrap();
        assert_eq!(entry.next_metadata_offset, 3);
        assert_eq!(entry.last_modified, "2026-02-01T00:05:00Z");
    }

    #[tokio::test]
    async fn test_forced_refresh_is_delta_and_updates_timestamp() {
        let backend = Backend::default();
        backend.push_metadata("A", 10);
        let mut cache = DeltaCache::new();
        let s = summary("a", "t1");
        let first = cache.refresh(&backend, &s, false).await.unwrap();

        let forced = cache.refresh(&backend, &s, true).await.unwrap();
        assert_eq!(forced.kind, RefreshKind::Delta);
        assert_eq!(forced.stats, first.stats);
        // one empty page per stream
        assert_eq!(forced.request_count, 2);

        let empty_delta = cache.refresh(&backend, &summary("a", "t2"), false).await.unwrap();
        assert_eq!(empty_delta.stats, first.stats);
        assert_eq!(cache.entry().unwrap().last_modified, "t2");
    }

    #[tokio::test]
    async fn test_other_session_is_cold() {
        let backend = Backend::default();
        backend.push_metadata("A", 10);
        let mut cache = DeltaCache::new();
        cache.refresh(&backend, &summary("a", "t1"), false).await.unwrap();

        let plan = cache.plan(&summary("b", "t1"), false);
        assert_eq!(plan, RefreshPlan::Full(RefreshKind::Cold));
        let other = cache.refresh(&backend, &summary("b", "t1"), true).await.unwrap();
        assert_eq!(other.kind, RefreshKind::Cold);
        assert_eq!(cache.entry().unwrap().session_id.as_str(), "b");
    }

    #[tokio::test]
    async fn test_step_count_below_offset_rebuilds() {
        let backend = Backend::default();
        backend.steps.lock().unwrap().extend([json!({}), json!({}), json!({})]);
        let mut cache = DeltaCache::new();
        cache.refresh(&backend, &summary("a", "t1"), false).await.unwrap();
        assert_eq!(cache.entry().unwrap().next_step_offset, 3);

        backend.steps.lock().unwrap().truncate(1);
        let mut shrunk = summary("a", "t2");
        shrunk.step_count = 1;
        let outcome = cache.refresh(&backend, &shrunk, false).await.unwrap();
        assert_eq!(outcome.kind, RefreshKind::Rebuilt);
        assert_eq!(cache.entry().unwrap().next_step_offset, 1);
    }

    #[tokio::test]
    async fn test_failed_delta_keeps_stale_entry() {
        let backend = Backend::default();
        backend.push_metadata("A", 10);
        let mut cache = DeltaCache::new();
        cache.refresh(&backend, &summary("a", "t1"), false).await.unwrap();
        let before = cache.entry().unwrap().clone();

        backend.offline.store(true, Ordering::SeqCst);
        let err = cache.refresh(&backend, &summary("a", "t2"), false).await;
        assert!(err.is_err());
        assert_eq!(cache.entry(), Some(&before));
    }

    #[tokio::test]
    async fn test_capped_fetch_is_resumed_not_served_as_hit() {
        let backend = Backend {
            page_size: 1,
            ..Default::default()
        };
        for _ in 0..600 {
            backend.push_metadata("A", 1);
        }
        let mut cache = DeltaCache::new();
        let s = summary("a", "t1");

        let first = cache.refresh(&backend, &s, false).await.unwrap();
        assert_eq!(first.kind, RefreshKind::Cold);
        assert_eq!(first.stats.total_calls, 500);
        assert!(!cache.entry().unwrap().complete);

        let second = cache.refresh(&backend, &s, false).await.unwrap();
        assert_eq!(second.kind, RefreshKind::Delta);
        assert_eq!(second.stats.total_calls, 600);
        assert_eq!(second.stats.total_input.as_u64(), 600);
        assert!(cache.entry().unwrap().complete);

        let third = cache.refresh(&backend, &s, false).await.unwrap();
        assert_eq!(third.kind, RefreshKind::Hit);
        assert_eq!(third.request_count, 0);
        assert_eq!(third.stats.total_calls, 600);
    }
}
