//! Page-until-empty retrieval of a session's records.
//!
//! Metadata and steps are two independent offset-addressed streams. Each is
//! read page by page from its start offset until the backend returns an
//! empty page; the offset advances by the number of items received.
//!
//! An error aborts the whole fetch. It is never mistaken for the end of a
//! stream. A stream cut off by [`MAX_PAGES_PER_STREAM`] marks the batch
//! [`truncated`](FetchBatch::truncated); its offsets still point at the
//! first record not read.

use std::future::Future;

use tracing::{debug, warn};

use ltm_core::{MetadataRecord, SessionId, StepRecord};

use crate::transport::{Transport, TransportError};

/// Hard cap on pages read from one stream in one fetch.
pub const MAX_PAGES_PER_STREAM: u32 = 500;

/// Records retrieved by one fetch, with the offsets to resume from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchBatch {
    pub metadata: Vec<MetadataRecord>,
    pub steps: Vec<StepRecord>,
    pub next_metadata_offset: usize,
    pub next_step_offset: usize,
    /// Every underlying request, empty pages included.
    pub request_count: u32,
    /// A stream hit the page cap before returning an empty page.
    pub truncated: bool,
}

impl FetchBatch {
    /// True when neither stream produced anything new.
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty() && self.steps.is_empty()
    }
}

/// Fetches both streams for `session_id` from the given offsets.
pub async fn fetch_from<T>(
    transport: &T,
    session_id: &SessionId,
    start_metadata: usize,
    start_step: usize,
) -> Result<FetchBatch, TransportError>
where
    T: Transport + ?Sized,
{
    let metadata = drain("metadata", start_metadata, |offset| {
        transport.metadata_page(session_id, offset)
    })
    .await?;

    let steps =
        drain("steps", start_step, |offset| transport.steps_page(session_id, offset)).await?;

    debug!(
        session_id = %session_id,
        metadata = metadata.records.len(),
        steps = steps.records.len(),
        next_metadata_offset = metadata.next_offset,
        next_step_offset = steps.next_offset,
        "Fetched session records"
    );

    Ok(FetchBatch {
        request_count: metadata.requests + steps.requests,
        truncated: metadata.truncated || steps.truncated,
        next_metadata_offset: metadata.next_offset,
        next_step_offset: steps.next_offset,
        metadata: metadata.records,
        steps: steps.records,
    })
}

/// One stream read by [`drain`].
struct Drained<R> {
    records: Vec<R>,
    next_offset: usize,
    requests: u32,
    truncated: bool,
}

/// Reads one stream until an empty page or the page cap.
async fn drain<R, F, Fut>(
    stream: &'static str,
    start: usize,
    mut fetch_page: F,
) -> Result<Drained<R>, TransportError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<R>, TransportError>>,
{
    let mut records = Vec::new();
    let mut offset = start;
    let mut requests = 0u32;
    let mut truncated = false;

    loop {
        if requests >= MAX_PAGES_PER_STREAM {
            warn!(stream, offset, "Page cap reached, resuming on next refresh");
            truncated = true;
            break;
        }
        let page = fetch_page(offset).await?;
        requests += 1;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        records.extend(page);
    }

    Ok(Drained {
        records,
        next_offset: offset,
        requests,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ltm_protocol::Method;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Serves `total` items per stream in pages of `page_size`.
    struct Paged {
        total: usize,
        page_size: usize,
        calls: AtomicU32,
        fail_steps: bool,
    }

    impl Paged {
        fn new(total: usize, page_size: usize) -> Self {
            Self {
                total,
                page_size,
                calls: AtomicU32::new(0),
                fail_steps: false,
            }
        }
    }

    #[async_trait]
    impl Transport for Paged {
        async fn call(&self, method: Method, payload: Value) -> Result<Value, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_steps && method == Method::GetStepsPage {
                return Err(TransportError::Timeout { method: method.name() });
            }
            let offset = payload["offset"].as_u64().unwrap() as usize;
            let count = self.total.saturating_sub(offset).min(self.page_size);
            let items: Vec<Value> = (0..count).map(|_| json!({})).collect();
            Ok(json!({ "items": items }))
        }
    }

    #[tokio::test]
    async fn test_fetch_from_zero() {
        let transport = Paged::new(5, 2);
        let batch = fetch_from(&transport, &SessionId::new("s"), 0, 0).await.unwrap();
        assert_eq!(batch.metadata.len(), 5);
        assert_eq!(batch.steps.len(), 5);
        assert_eq!(batch.next_metadata_offset, 5);
        assert_eq!(batch.next_step_offset, 5);
        // 3 pages + 1 empty page per stream
        assert_eq!(batch.request_count, 8);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 8);
        assert!(!batch.truncated);
    }

    #[tokio::test]
    async fn test_fetch_resumes_from_offsets() {
        let transport = Paged::new(5, 10);
        let batch = fetch_from(&transport, &SessionId::new("s"), 3, 5).await.unwrap();
        assert_eq!(batch.metadata.len(), 2);
        assert!(batch.steps.is_empty());
        assert_eq!(batch.next_metadata_offset, 5);
        assert_eq!(batch.next_step_offset, 5);
        assert_eq!(batch.request_count, 3);
    }

    #[tokio::test]
    async fn test_offsets_never_regress() {
        let transport = Paged::new(0, 10);
        let batch = fetch_from(&transport, &SessionId::new("s"), 12, 7).await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.next_metadata_offset, 12);
        assert_eq!(batch.next_step_offset, 7);
        assert_eq!(batch.request_count, 2);
    }

    #[tokio::test]
    async fn test_error_aborts_fetch() {
        let mut transport = Paged::new(3, 10);
        transport.fail_steps = true;
        let err = fetch_from(&transport, &SessionId::new("s"), 0, 0).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_page_cap_bounds_requests() {
        let transport = Paged::new(usize::MAX, 1);
        let id = SessionId::new("s");
        let drained = drain("metadata", 0, |offset| transport.metadata_page(&id, offset))
            .await
            .unwrap();
        assert_eq!(drained.requests, MAX_PAGES_PER_STREAM);
        assert_eq!(drained.records.len(), MAX_PAGES_PER_STREAM as usize);
        assert_eq!(drained.next_offset, MAX_PAGES_PER_STREAM as usize);
        assert!(drained.truncated);
    }

    #[tokio::test]
    async fn test_capped_stream_marks_batch_truncated() {
        let transport = Paged::new(MAX_PAGES_PER_STREAM as usize + 3, 1);
        let batch = fetch_from(&transport, &SessionId::new("s"), 0, 0).await.unwrap();
        assert!(batch.truncated);
        assert_eq!(batch.next_metadata_offset, MAX_PAGES_PER_STREAM as usize);

        let rest = fetch_from(&transport, &SessionId::new("s"), batch.next_metadata_offset, 0)
            .await
            .unwrap();
        assert_eq!(rest.metadata.len(), 3);
        assert!(rest.truncated, "steps stream is still capped");
    }
}
