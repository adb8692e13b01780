//! Telemetry persistence seam. The SQL schema
//! backing it is out of scope for this crate (mirrors the `SearchEngine`
//! scope cut) — [`TelemetryStore`] is the async boundary `metrics.rs`
//! flushes a [`crate::metrics::MetricsSnapshot`] through.

use async_trait::async_trait;

use crate::errors::CoreError;
use crate::metrics::MetricsSnapshot;

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn flush(&self, snapshot: &MetricsSnapshot) -> Result<(), CoreError>;
}

/// Discards every snapshot. Used when no telemetry backend is configured.
pub struct NullTelemetryStore;

#[async_trait]
impl TelemetryStore for NullTelemetryStore {
    async fn flush(&self, _snapshot: &MetricsSnapshot) -> Result<(), CoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_store_always_succeeds() {
        let store = NullTelemetryStore;
        let snapshot = MetricsSnapshot {
            total_queries: 0,
            queries_by_tool: Vec::new(),
            zero_result_count: 0,
            zero_result_rate: 0.0,
            under_10ms: 0,
            under_50ms: 0,
            under_100ms: 0,
            under_500ms: 0,
            over_500ms: 0,
            top_terms: Vec::new(),
            recent_zero_results: Vec::new(),
            exact_repeat_count: 0,
            similar_query_count: 0,
        };
        assert!(store.flush(&snapshot).await.is_ok());
    }
}
