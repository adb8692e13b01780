//! Query Metrics aggregator: in-process counters and capped
//! structures over the `search`/`search_code`/`search_docs` tool calls,
//! flushed periodically (and on shutdown) to an external
//! [`crate::store::TelemetryStore`], behind an `RwLock`-guarded
//! aggregator-with-snapshot shape.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};

const TOP_TERMS_CAPACITY: usize = 100;
const ZERO_RESULT_CAPACITY: usize = 100;
const FINGERPRINT_CAPACITY: usize = 100;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
const SIMILARITY_THRESHOLD: f32 = 0.95;
const MIN_TERM_LEN: usize = 3;

/// Coarse latency buckets (milliseconds): `<10`, `10-50`, `50-100`,
/// `100-500`, `≥500`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LatencyBucket {
    Under10,
    Under50,
    Under100,
    Under500,
    Over500,
}

impl LatencyBucket {
    fn from_duration(d: Duration) -> Self {
        let ms = d.as_millis();
        if ms < 10 {
            LatencyBucket::Under10
        } else if ms < 50 {
            LatencyBucket::Under50
        } else if ms < 100 {
            LatencyBucket::Under100
        } else if ms < 500 {
            LatencyBucket::Under500
        } else {
            LatencyBucket::Over500
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LatencyCounts {
    under_10: u64,
    under_50: u64,
    under_100: u64,
    under_500: u64,
    over_500: u64,
}

impl LatencyCounts {
    fn record(&mut self, bucket: LatencyBucket) {
        match bucket {
            LatencyBucket::Under10 => self.under_10 += 1,
            LatencyBucket::Under50 => self.under_50 += 1,
            LatencyBucket::Under100 => self.under_100 += 1,
            LatencyBucket::Under500 => self.under_500 += 1,
            LatencyBucket::Over500 => self.over_500 += 1,
        }
    }

    fn total(&self) -> u64 {
        self.under_10 + self.under_50 + self.under_100 + self.under_500 + self.over_500
    }
}

/// How a query was actually answered by the hybrid search engine, as
/// distinct from which MCP tool was called. A `search_code` call and a
/// `search_docs` call can both resolve as `Mixed`; the tool name says
/// nothing about whether the lexical index, the vector index, or both
/// produced the returned chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Lexical,
    Semantic,
    Mixed,
}

impl QueryType {
    fn as_str(self) -> &'static str {
        match self {
            QueryType::Lexical => "lexical",
            QueryType::Semantic => "semantic",
            QueryType::Mixed => "mixed",
        }
    }
}

/// One completed query, as reported by the tool dispatcher.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub tool: String,
    pub query: String,
    pub query_type: QueryType,
    pub result_count: usize,
    pub latency: Duration,
    /// Present only when a query embedding was computed (semantic path),
    /// used for similarity-based repetition detection.
    pub query_embedding: Option<Vec<f32>>,
}

/// Zero-result query record kept in the ring buffer for operator review.
#[derive(Debug, Clone)]
pub struct ZeroResultEntry {
    pub query: String,
    pub tool: String,
    pub at: Instant,
}

/// Point-in-time snapshot returned by [`QueryMetrics::snapshot`].
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub queries_by_tool: Vec<(String, u64)>,
    pub queries_by_type: Vec<(String, u64)>,
    pub zero_result_count: u64,
    pub zero_result_rate: f64,
    pub under_10ms: u64,
    pub under_50ms: u64,
    pub under_100ms: u64,
    pub under_500ms: u64,
    pub over_500ms: u64,
    pub top_terms: Vec<(String, u64)>,
    pub recent_zero_results: Vec<String>,
    pub exact_repeat_count: u64,
    pub similar_query_count: u64,
}

fn fingerprint(query: &str) -> [u8; 16] {
    let digest = Sha256::digest(query.trim().to_lowercase().as_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

fn extract_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() >= MIN_TERM_LEN)
        .collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    crate::vecmath::cosine_similarity(a, b)
}

struct Inner {
    total_queries: u64,
    by_tool: std::collections::HashMap<String, u64>,
    by_query_type: std::collections::HashMap<QueryType, u64>,
    latency: LatencyCounts,
    zero_results: u64,
    top_terms: LruCache<String, u64>,
    zero_result_buffer: VecDeque<ZeroResultEntry>,
    fingerprints: LruCache<[u8; 16], ()>,
    recent_embeddings: VecDeque<Vec<f32>>,
    last_flush: Instant,
    exact_repeats: u64,
    similar_queries: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            total_queries: 0,
            by_tool: std::collections::HashMap::new(),
            by_query_type: std::collections::HashMap::new(),
            latency: LatencyCounts::default(),
            zero_results: 0,
            top_terms: LruCache::new(NonZeroUsize::new(TOP_TERMS_CAPACITY).unwrap()),
            zero_result_buffer: VecDeque::with_capacity(ZERO_RESULT_CAPACITY),
            fingerprints: LruCache::new(NonZeroUsize::new(FINGERPRINT_CAPACITY).unwrap()),
            recent_embeddings: VecDeque::with_capacity(FINGERPRINT_CAPACITY),
            last_flush: Instant::now(),
            exact_repeats: 0,
            similar_queries: 0,
        }
    }
}

/// Thread-safe query metrics aggregator. One instance is shared across
/// all tool-dispatch call sites.
pub struct QueryMetrics {
    inner: RwLock<Inner>,
    flush_interval: Duration,
}

impl Default for QueryMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_INTERVAL)
    }
}

impl QueryMetrics {
    pub fn new(flush_interval: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
            flush_interval,
        }
    }

    /// Record one completed query. Never returns an error: a metrics
    /// recording failure must never fail the tool call it's measuring.
    pub fn record(&self, event: &QueryEvent) {
        let mut inner = self.inner.write().unwrap();
        inner.total_queries += 1;
        *inner.by_tool.entry(event.tool.clone()).or_insert(0) += 1;
        *inner.by_query_type.entry(event.query_type).or_insert(0) += 1;
        inner.latency.record(LatencyBucket::from_duration(event.latency));

        if event.result_count == 0 {
            inner.zero_results += 1;
            if inner.zero_result_buffer.len() == ZERO_RESULT_CAPACITY {
                inner.zero_result_buffer.pop_front();
            }
            inner.zero_result_buffer.push_back(ZeroResultEntry {
                query: event.query.clone(),
                tool: event.tool.clone(),
                at: Instant::now(),
            });
        }

        for term in extract_terms(&event.query) {
            let count = inner.top_terms.get(&term).copied().unwrap_or(0);
            inner.top_terms.put(term, count + 1);
        }

        let fp = fingerprint(&event.query);
        inner.fingerprints.put(fp, ());

        if let Some(embedding) = &event.query_embedding {
            if inner.recent_embeddings.len() == FINGERPRINT_CAPACITY {
                inner.recent_embeddings.pop_front();
            }
            inner.recent_embeddings.push_back(embedding.clone());
        }
    }

    /// Whether `query` is an exact repeat of something seen recently
    /// (fingerprint hit). Each hit increments the exact-repeat counter
    ///.
    pub fn is_repeated(&self, query: &str) -> bool {
        let fp = fingerprint(query);
        let mut inner = self.inner.write().unwrap();
        let hit = inner.fingerprints.contains(&fp);
        if hit {
            inner.exact_repeats += 1;
        }
        hit
    }

    /// Whether `embedding` is semantically close (cosine ≥ 0.95) to any
    /// recently recorded query embedding. A hit increments the
    /// similar-query counter.
    pub fn has_similar_recent_query(&self, embedding: &[f32]) -> bool {
        let mut inner = self.inner.write().unwrap();
        let hit = inner
            .recent_embeddings
            .iter()
            .any(|e| cosine(e, embedding) >= SIMILARITY_THRESHOLD);
        if hit {
            inner.similar_queries += 1;
        }
        hit
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read().unwrap();
        let total = inner.latency.total().max(inner.total_queries);
        let zero_rate = if total == 0 {
            0.0
        } else {
            inner.zero_results as f64 / total as f64
        };

        let mut queries_by_tool: Vec<(String, u64)> =
            inner.by_tool.iter().map(|(k, v)| (k.clone(), *v)).collect();
        queries_by_tool.sort_by(|a, b| b.1.cmp(&a.1));

        let mut queries_by_type: Vec<(String, u64)> = inner
            .by_query_type
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), *v))
            .collect();
        queries_by_type.sort_by(|a, b| b.1.cmp(&a.1));

        let mut top_terms: Vec<(String, u64)> = inner
            .top_terms
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        top_terms.sort_by(|a, b| b.1.cmp(&a.1));

        let recent_zero_results = inner
            .zero_result_buffer
            .iter()
            .map(|e| e.query.clone())
            .collect();

        MetricsSnapshot {
            total_queries: inner.total_queries,
            queries_by_tool,
            queries_by_type,
            zero_result_count: inner.zero_results,
            zero_result_rate: zero_rate,
            under_10ms: inner.latency.under_10,
            under_50ms: inner.latency.under_50,
            under_100ms: inner.latency.under_100,
            under_500ms: inner.latency.under_500,
            over_500ms: inner.latency.over_500,
            top_terms,
            recent_zero_results,
            exact_repeat_count: inner.exact_repeats,
            similar_query_count: inner.similar_queries,
        }
    }

    /// Whether enough time has elapsed since the last flush to warrant
    /// another one. Does not itself perform the flush (that requires an
    /// async [`crate::store::TelemetryStore`] call made by the caller).
    pub fn due_for_flush(&self) -> bool {
        let inner = self.inner.read().unwrap();
        inner.last_flush.elapsed() >= self.flush_interval
    }

    pub fn mark_flushed(&self) {
        self.inner.write().unwrap().last_flush = Instant::now();
    }

    /// Upsert the current snapshot into `store`. A zero-length snapshot
    /// (no queries since the last flush) is a no-op. Flush errors are
    /// returned to the caller but never clear the aggregator — collection
    /// continues regardless of whether the external store is reachable.
    pub async fn flush(&self, store: &dyn crate::store::TelemetryStore) -> Result<(), crate::errors::CoreError> {
        let snapshot = self.snapshot();
        if snapshot.total_queries == 0 && snapshot.queries_by_tool.is_empty() {
            self.mark_flushed();
            return Ok(());
        }
        store.flush(&snapshot).await?;
        self.mark_flushed();
        Ok(())
    }

    /// Final flush performed on shutdown, regardless of `due_for_flush`.
    pub async fn close(&self, store: &dyn crate::store::TelemetryStore) -> Result<(), crate::errors::CoreError> {
        let snapshot = self.snapshot();
        store.flush(&snapshot).await
    }
}
