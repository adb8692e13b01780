//! LRU cache wrapper: read-through caching in front of any
//! [`Embedder`], keyed by `sha256(text || 0x00 || model)` so cache entries
//! never collide across models.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::errors::EmbedError;

use super::{Embedder, EmbedderCapability};

const DEFAULT_CAPACITY: usize = 1_000;

fn cache_key(text: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0u8]);
    hasher.update(model.as_bytes());
    hex::encode(hasher.finalize())
}

/// Read-through LRU cache over an inner [`Embedder`].
///
/// Composition by wrapping: `CachedEmbedder` owns the inner embedder and
/// exposes it back via [`CachedEmbedder::inner`] rather than duplicating
/// its state.
pub struct CachedEmbedder {
    inner: Box<dyn Embedder>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Box<dyn Embedder>) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: Box<dyn Embedder>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Projection back to the wrapped embedder (not a new owner).
    pub fn inner(&self) -> &dyn Embedder {
        self.inner.as_ref()
    }

    fn get_cached(&self, key: &str) -> Option<Vec<f32>> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn put_cached(&self, key: String, value: Vec<f32>) {
        self.cache.lock().unwrap().put(key, value);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let key = cache_key(text, self.inner.model_name());
        if let Some(hit) = self.get_cached(&key) {
            return Ok(hit);
        }
        let vector = self.inner.embed(text).await?;
        self.put_cached(key, vector.clone());
        Ok(vector)
    }

    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.inner.model_name().to_string();
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = cache_key(text, &model);
            match self.get_cached(&key) {
                Some(hit) => results.push(Some(hit)),
                None => {
                    results.push(None);
                    miss_indices.push(i);
                    miss_texts.push(text.clone());
                }
            }
        }

        if !miss_texts.is_empty() {
            let fetched = self.inner.batch_embed(&miss_texts).await?;
            if fetched.len() != miss_texts.len() {
                return Err(EmbedError::Internal {
                    message: format!(
                        "inner embedder returned {} vectors for {} misses",
                        fetched.len(),
                        miss_texts.len()
                    ),
                });
            }
            for (idx, (text, vector)) in miss_indices.iter().zip(miss_texts.iter().zip(fetched.into_iter())) {
                let key = cache_key(text, &model);
                self.put_cached(key, vector.clone());
                results[*idx] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|v| v.expect("every position filled")).collect())
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn available(&self) -> bool {
        self.inner.available().await
    }

    async fn close(&self) -> Result<(), EmbedError> {
        self.inner.close().await
    }

    fn set_batch_index(&self, index: u64) {
        self.inner.set_batch_index(index);
    }

    fn set_final_batch(&self, is_final: bool) {
        self.inner.set_final_batch(is_final);
    }

    async fn capability(&self) -> EmbedderCapability {
        self.inner.capability().await
    }
}
