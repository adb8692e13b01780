//! Remote embedders: the GPU server (`mlx`) and local runner
//! (`ollama`) backends. Both share one body, [`RemoteEmbedder<W>`],
//! generalized over a small [`WireFormat`] trait that captures the only
//! two things that differ between them — request/response JSON shape and
//! whether the server's output needs local L2 normalization, instead of
//! two near-identical free functions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock as AsyncRwLock;
use tokio_util::sync::CancellationToken;

use crate::errors::EmbedError;
use crate::vecmath::l2_normalize;

use super::thermal::{ThermalConfig, ThermalState};
use super::{Embedder, EmbedderCapability, EmbedderStatus, Provider, SemanticQuality};

/// The only two things that differ between the GPU-server and
/// local-runner wire protocols.
pub trait WireFormat: Send + Sync {
    /// Human-readable backend name (`"mlx"` / `"ollama"`).
    fn name(&self) -> &str;

    /// Full URL of the embedding endpoint given the configured base.
    fn endpoint(&self, base_url: &str) -> String;

    /// Build the JSON request body for a batch of non-empty texts.
    fn build_request(&self, texts: &[String], model: &str) -> serde_json::Value;

    /// Parse the JSON response into one vector per input text, in order.
    fn parse_response(&self, json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Whether this backend's output needs local L2 normalization
    /// (the local runner does; the GPU server's output is already unit
    /// length and is passed through).
    fn normalize_output(&self) -> bool;

    /// Dimensions to assume if the server doesn't report them and a
    /// one-off test embedding can't be run.
    fn fallback_dims(&self) -> usize {
        768
    }

    fn provider(&self) -> Provider;
}

/// GPU-backed HTTP server wire format (`mlx`). Output is already unit
/// length server-side.
pub struct MlxWireFormat;

impl WireFormat for MlxWireFormat {
    fn name(&self) -> &str {
        "mlx"
    }

    fn endpoint(&self, base_url: &str) -> String {
        format!("{}/embed", base_url.trim_end_matches('/'))
    }

    fn build_request(&self, texts: &[String], model: &str) -> serde_json::Value {
        serde_json::json!({ "model": model, "inputs": texts })
    }

    fn parse_response(&self, json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
        let data = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::Internal {
                message: "mlx response missing 'embeddings' array".to_string(),
            })?;
        parse_vec_array(data)
    }

    fn normalize_output(&self) -> bool {
        false
    }

    fn fallback_dims(&self) -> usize {
        1024
    }

    fn provider(&self) -> Provider {
        Provider::Mlx
    }
}

/// Local runner wire format (`ollama`'s `/api/embed`). Output needs local
/// normalization.
pub struct OllamaWireFormat;

impl WireFormat for OllamaWireFormat {
    fn name(&self) -> &str {
        "ollama"
    }

    fn endpoint(&self, base_url: &str) -> String {
        format!("{}/api/embed", base_url.trim_end_matches('/'))
    }

    fn build_request(&self, texts: &[String], model: &str) -> serde_json::Value {
        serde_json::json!({ "model": model, "input": texts })
    }

    fn parse_response(&self, json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
        let data = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::Internal {
                message: "ollama response missing 'embeddings' array".to_string(),
            })?;
        parse_vec_array(data)
    }

    fn normalize_output(&self) -> bool {
        true
    }

    fn fallback_dims(&self) -> usize {
        768
    }

    fn provider(&self) -> Provider {
        Provider::LocalRunner
    }
}

fn parse_vec_array(data: &[serde_json::Value]) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut out = Vec::with_capacity(data.len());
    for item in data {
        let arr = item.as_array().ok_or_else(|| EmbedError::Internal {
            message: "embedding entry is not an array".to_string(),
        })?;
        out.push(arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect());
    }
    Ok(out)
}

/// Sub-batch sizing.
pub const DEFAULT_SUB_BATCH: usize = 32;
pub const MAX_SUB_BATCH: usize = 256;
const POOL_MAX_IDLE_PER_HOST: usize = 4;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on the liveness probe used by `available`/`capability`: a short
/// bound, past which status is reported unavailable. Deliberately much
/// shorter than the thermal timeout and skips the retry loop — this is
/// a health check, not a real call.
const AVAILABILITY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for a [`RemoteEmbedder`] instance.
#[derive(Debug, Clone)]
pub struct RemoteEmbedderConfig {
    pub base_url: String,
    pub model: String,
    pub max_retries: u32,
    pub sub_batch_size: usize,
    pub inter_batch_delay: Duration,
    pub thermal: ThermalConfig,
}

/// One remote embedder instance: owns its own HTTP client/transport
///.
pub struct RemoteEmbedder<W: WireFormat> {
    wire: W,
    client: AsyncRwLock<reqwest::Client>,
    config: RemoteEmbedderConfig,
    dims: AtomicU64,
    thermal: ThermalState,
    closed: AtomicBool,
}

impl<W: WireFormat> RemoteEmbedder<W> {
    /// Construct and run a bounded health probe. Fails with a remedy
    /// message if the probe doesn't succeed.
    pub async fn connect(wire: W, config: RemoteEmbedderConfig) -> Result<Self, EmbedError> {
        let client = build_client()?;
        let embedder = Self {
            wire,
            client: AsyncRwLock::new(client),
            dims: AtomicU64::new(0),
            thermal: ThermalState::new(),
            closed: AtomicBool::new(false),
            config,
        };

        let probe_timeout = embedder.config.thermal.cold_timeout;
        let probe = embedder.request_batch(&["ping".to_string()], 0, probe_timeout);

        match tokio::time::timeout(probe_timeout, probe).await {
            Ok(Ok(vectors)) => {
                let dims = vectors
                    .first()
                    .map(|v| v.len())
                    .filter(|&d| d > 0)
                    .unwrap_or_else(|| embedder.wire.fallback_dims());
                embedder.dims.store(dims as u64, Ordering::SeqCst);
                Ok(embedder)
            }
            Ok(Err(e)) => Err(EmbedError::config(
                format!("{} backend probe failed: {}", embedder.wire.name(), e),
                Some(format!(
                    "start the {} server, or set EMBEDDER=static to use the fallback backend",
                    embedder.wire.name()
                )),
            )),
            Err(_) => Err(EmbedError::config(
                format!("{} backend probe timed out", embedder.wire.name()),
                Some(format!(
                    "start the {} server, or set EMBEDDER=static to use the fallback backend",
                    embedder.wire.name()
                )),
            )),
        }
    }

    /// Replace the HTTP transport to interrupt any in-flight reader that
    /// hasn't yet noticed cancellation.
    async fn force_close_connections(&self) {
        if let Ok(fresh) = build_client() {
            *self.client.write().await = fresh;
        }
    }

    async fn request_batch(
        &self,
        texts: &[String],
        attempt: u32,
        timeout: Duration,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let _ = attempt;
        let url = self.wire.endpoint(&self.config.base_url);
        let body = self.wire.build_request(texts, &self.config.model);
        let client = self.client.read().await.clone();

        let response = tokio::time::timeout(timeout, client.post(&url).json(&body).send())
            .await
            .map_err(|_| EmbedError::Cancelled {
                message: format!("{} request timed out after {:?}", self.wire.name(), timeout),
            })?
            .map_err(|e| EmbedError::Transient {
                message: format!("{} connect error: {}", self.wire.name(), e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EmbedError::Transient {
                message: format!("{} returned {}: {}", self.wire.name(), status, text),
            });
        }

        let json: serde_json::Value = response.json().await.map_err(|e| EmbedError::Transient {
            message: format!("{} response decode failed: {}", self.wire.name(), e),
        })?;

        let mut vectors = self.wire.parse_response(&json)?;
        if self.wire.normalize_output() {
            for v in vectors.iter_mut() {
                l2_normalize(v);
            }
        }
        Ok(vectors)
    }

    /// Run one sub-batch to completion, retrying transient failures with
    /// a freshly thermal-scaled timeout each attempt.
    async fn run_sub_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut last_err = EmbedError::Internal {
            message: "no attempts made".to_string(),
        };

        for attempt in 0..=self.config.max_retries {
            if cancel.is_cancelled() {
                return Err(EmbedError::Cancelled {
                    message: "parent cancelled".to_string(),
                });
            }

            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => {
                        return Err(EmbedError::Cancelled { message: "parent cancelled during backoff".to_string() });
                    }
                }
            }

            let timeout = self.thermal.effective_timeout(&self.config.thermal, attempt);

            // Race the HTTP exchange against cancellation directly: dropping
            // the losing branch of `select!` aborts the in-flight request
            // immediately, without waiting for the HTTP layer to notice
            // — no detached task needed to get that.
            tokio::select! {
                result = self.request_batch(texts, attempt, timeout) => {
                    match result {
                        Ok(vectors) => return Ok(vectors),
                        Err(e) => {
                            last_err = e;
                            continue;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    self.force_close_connections().await;
                    return Err(EmbedError::Cancelled { message: "parent cancelled mid-request".to_string() });
                }
            }
        }

        Err(last_err)
    }

    /// Batch-embed with an explicit cancellation token and optional
    /// progress callback.
    pub async fn batch_embed_cancellable(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
        mut on_progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EmbedError::Closed);
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let dims = self.dimensions();
        let mut results: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];

        // Positions that need a real round trip vs. zero-vector
        // substitution.
        let mut live_indices = Vec::new();
        let mut live_texts = Vec::new();
        for (i, t) in texts.iter().enumerate() {
            if t.trim().is_empty() {
                results[i] = vec![0.0; dims];
            } else {
                live_indices.push(i);
                live_texts.push(t.clone());
            }
        }

        let sub_batch_size = self.config.sub_batch_size.clamp(1, MAX_SUB_BATCH);
        let total = live_texts.len();
        let mut completed = 0usize;

        for chunk_start in (0..live_texts.len()).step_by(sub_batch_size) {
            if cancel.is_cancelled() {
                return Err(EmbedError::Cancelled {
                    message: "parent cancelled before sub-batch dispatch".to_string(),
                });
            }

            let chunk_end = (chunk_start + sub_batch_size).min(live_texts.len());
            let chunk = &live_texts[chunk_start..chunk_end];
            let chunk_indices = &live_indices[chunk_start..chunk_end];

            let vectors = self.run_sub_batch(chunk, cancel).await?;
            if vectors.len() != chunk.len() {
                return Err(EmbedError::Internal {
                    message: format!(
                        "{} returned {} vectors for {} inputs",
                        self.wire.name(),
                        vectors.len(),
                        chunk.len()
                    ),
                });
            }

            for (idx, vector) in chunk_indices.iter().zip(vectors.into_iter()) {
                results[*idx] = vector;
            }

            self.thermal.record_success();
            self.thermal.increment_batch_index();
            completed += chunk.len();
            if let Some(cb) = on_progress.as_deref_mut() {
                cb(completed, total);
            }

            let delay = self.config.inter_batch_delay.min(Duration::from_secs(5));
            if chunk_end < live_texts.len() && !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(EmbedError::Cancelled { message: "parent cancelled during inter-batch delay".to_string() });
                    }
                }
            }
        }

        Ok(results)
    }
}

fn build_client() -> Result<reqwest::Client, EmbedError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .build()
        .map_err(|e| EmbedError::Internal {
            message: format!("failed to build HTTP client: {e}"),
        })
}

#[async_trait]
impl<W: WireFormat> Embedder for RemoteEmbedder<W> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let cancel = CancellationToken::new();
        let out = self
            .batch_embed_cancellable(&[text.to_string()], &cancel, None)
            .await?;
        out.into_iter()
            .next()
            .ok_or_else(|| EmbedError::Internal {
                message: "empty embedding response".to_string(),
            })
    }

    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let cancel = CancellationToken::new();
        self.batch_embed_cancellable(texts, &cancel, None).await
    }

    fn dimensions(&self) -> usize {
        self.dims.load(Ordering::SeqCst) as usize
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    /// Bounded liveness probe: a single request with a short
    /// timeout, not the full retrying batch path.
    async fn available(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let probe = self.request_batch(&["ping".to_string()], 0, AVAILABILITY_PROBE_TIMEOUT);
        matches!(
            tokio::time::timeout(AVAILABILITY_PROBE_TIMEOUT, probe).await,
            Ok(Ok(_))
        )
    }

    async fn close(&self) -> Result<(), EmbedError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_batch_index(&self, index: u64) {
        self.thermal.set_batch_index(index);
    }

    fn set_final_batch(&self, is_final: bool) {
        self.thermal.set_final_batch(is_final);
    }

    async fn capability(&self) -> EmbedderCapability {
        let status = if self.available().await {
            EmbedderStatus::Ready
        } else {
            EmbedderStatus::Unavailable
        };
        EmbedderCapability {
            provider: self.wire.provider(),
            model: self.config.model.clone(),
            dimensions: self.dimensions(),
            fallback_active: false,
            semantic_quality: SemanticQuality::High,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mlx_endpoint_trims_trailing_slash() {
        let wire = MlxWireFormat;
        assert_eq!(wire.endpoint("http://localhost:9000/"), "http://localhost:9000/embed");
    }

    #[test]
    fn ollama_endpoint_shape() {
        let wire = OllamaWireFormat;
        assert_eq!(wire.endpoint("http://localhost:11434"), "http://localhost:11434/api/embed");
    }

    #[test]
    fn ollama_normalizes_mlx_does_not() {
        assert!(OllamaWireFormat.normalize_output());
        assert!(!MlxWireFormat.normalize_output());
    }
}
