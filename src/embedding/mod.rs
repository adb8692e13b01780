//! Embedding subsystem: the `Embedder` capability set,
//! and the concrete backends that satisfy it —
//! [`static_embedder::StaticEmbedder`] (deterministic hash fallback),
//! [`remote::RemoteEmbedder`] (GPU server / local runner, generalized
//! over [`remote::WireFormat`]), and [`cached::CachedEmbedder`] (LRU
//! wrapper). Backend selection lives in [`factory`].
//!
//! Implementations are composed by wrapping, never by inheriting shared
//! state: `CachedEmbedder` holds a boxed inner
//! `Embedder` and `cached.inner()` is an ownership-preserving projection
//! back to it, not a new owner.

pub mod cached;
pub mod factory;
pub mod remote;
pub mod static_embedder;
pub mod thermal;

use async_trait::async_trait;

use crate::errors::EmbedError;

/// Runtime truth about which embedder is actually active, as opposed to
/// what the caller configured.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedderCapability {
    pub provider: Provider,
    pub model: String,
    pub dimensions: usize,
    pub fallback_active: bool,
    pub semantic_quality: SemanticQuality,
    pub status: EmbedderStatus,
}

impl EmbedderCapability {
    /// The capability reported when there is no embedder at all.
    pub fn none() -> Self {
        Self {
            provider: Provider::None,
            model: String::new(),
            dimensions: 0,
            fallback_active: true,
            semantic_quality: SemanticQuality::None,
            status: EmbedderStatus::Unavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Mlx,
    LocalRunner,
    Static,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SemanticQuality {
    High,
    Low,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbedderStatus {
    Ready,
    Unavailable,
}

/// The capability set every embedding backend satisfies.
///
/// `batch_embed` is the workhorse; `embed` is a one-item convenience call
/// implemented in terms of it by every backend here.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text. Empty/whitespace-only input yields a zero
    /// vector of [`Embedder::dimensions`] width without contacting a
    /// backend.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embed a batch, preserving input order in the output. Empty input
    /// yields empty output.
    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Bounded liveness probe; never blocks indefinitely.
    async fn available(&self) -> bool;

    /// Release any held resources (connections, file handles). Calling
    /// `close` more than once is a no-op.
    async fn close(&self) -> Result<(), EmbedError>;

    /// Explicitly set the thermal batch index (used on indexing resume).
    fn set_batch_index(&self, index: u64);

    /// Mark the next batch dispatched as the final one of a run.
    fn set_final_batch(&self, is_final: bool);

    /// Runtime capability snapshot for `index_status`.
    async fn capability(&self) -> EmbedderCapability;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Minimal in-memory embedder for exercising wrappers (cache, factory)
    /// without a real backend.
    pub struct CountingEmbedder {
        pub dims: usize,
        pub calls: AtomicU64,
        pub closed: AtomicBool,
        pub responses: Mutex<std::collections::HashMap<String, Vec<f32>>>,
    }

    impl CountingEmbedder {
        pub fn new(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                responses: Mutex::new(std::collections::HashMap::new()),
            }
        }

        pub fn call_count(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(EmbedError::Closed);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut v = vec![0.0f32; self.dims];
            if !v.is_empty() {
                let idx = text.len() % v.len();
                v[idx] = 1.0;
            }
            Ok(v)
        }

        async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            let mut out = Vec::with_capacity(texts.len());
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            self.dims
        }

        fn model_name(&self) -> &str {
            "counting-test"
        }

        async fn available(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }

        async fn close(&self) -> Result<(), EmbedError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn set_batch_index(&self, _index: u64) {}
        fn set_final_batch(&self, _is_final: bool) {}

        async fn capability(&self) -> EmbedderCapability {
            EmbedderCapability {
                provider: Provider::Static,
                model: self.model_name().to_string(),
                dimensions: self.dims,
                fallback_active: true,
                semantic_quality: SemanticQuality::Low,
                status: EmbedderStatus::Ready,
            }
        }
    }
}
