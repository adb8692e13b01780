//! Static Embedder: a deterministic, hash-based embedder with
//! no external dependency. Two width variants (256/768) are exposed as
//! constructors over one generic struct.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::errors::EmbedError;
use crate::vecmath::l2_normalize;

use super::{Embedder, EmbedderCapability, EmbedderStatus, Provider, SemanticQuality};

const STOP_WORDS: &[&str] = &[
    "func", "function", "def", "class", "return", "import", "const", "var", "let", "int",
    "string", "bool", "void", "true", "false", "nil", "null", "this", "self", "new",
];

const IDENT_WEIGHT: f32 = 0.7;
const NGRAM_WEIGHT: f32 = 0.3;

/// Deterministic hash-based embedder. Pure function of the input text:
/// same text, same process or a different one, same vector.
pub struct StaticEmbedder {
    dims: usize,
    closed: AtomicBool,
}

impl StaticEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            closed: AtomicBool::new(false),
        }
    }

    pub fn new_256() -> Self {
        Self::new(256)
    }

    pub fn new_768() -> Self {
        Self::new(768)
    }

    /// Pure computation, exposed directly for unit tests and for the
    /// batch path (which must not treat whitespace-only items as an
    /// error).
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        embed_static(text, self.dims)
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EmbedError::Closed);
        }
        Ok(self.embed_text(text))
    }

    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EmbedError::Closed);
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "static-hash"
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

/// The pure algorithm behind [`StaticEmbedder`]:
/// 1. Trim; empty/whitespace-only → zero vector.
/// 2. Extract identifier tokens, split on camelCase/snake_case.
/// 3. Drop stop-words.
/// 4. Each surviving token adds 0.7 at `FNV64(token) mod width`.
/// 5. Each lowercase-alnum 3-gram adds 0.3 at `FNV64(3gram) mod width`.
/// 6. L2-normalize.
fn embed_static(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    let trimmed = text.trim();
    if trimmed.is_empty() || dims == 0 {
        return v;
    }

    for token in identifier_tokens(trimmed) {
        let lower = token.to_lowercase();
        if STOP_WORDS.contains(&lower.as_str()) {
            continue;
        }
        let idx = (fnv64(lower.as_bytes()) % dims as u64) as usize;
        v[idx] += IDENT_WEIGHT;
    }

    let alnum_lower: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();
    let bytes = alnum_lower.as_bytes();
    if bytes.len() >= 3 {
        for window in bytes.windows(3) {
            let idx = (fnv64(window) % dims as u64) as usize;
            v[idx] += NGRAM_WEIGHT;
        }
    }

    l2_normalize(&mut v);
    v
}

/// Extract identifier-like tokens, then split each on camelCase and
/// snake_case boundaries (`HTTPServer` → `HTTP`, `Server`).
fn identifier_tokens(text: &str) -> Vec<String> {
    let mut raw_tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() || c == '_' {
            current.push(c);
        } else if !current.is_empty() {
            raw_tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        raw_tokens.push(current);
    }

    let mut tokens = Vec::new();
    for raw in raw_tokens {
        for part in raw.split('_') {
            if part.is_empty() {
                continue;
            }
            tokens.extend(split_camel_case(part));
        }
    }
    tokens
}

/// Split on camelCase boundaries: lowercase→uppercase, and the first
/// uppercase-then-lowercase of an uppercase run (`HTTPServer` → `HTTP`,
/// `Server`).
fn split_camel_case(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let mut parts = Vec::new();
    let mut start = 0;

    for i in 1..chars.len() {
        let prev = chars[i - 1];
        let cur = chars[i];

        let lower_to_upper = prev.is_lowercase() && cur.is_uppercase();
        let acronym_boundary =
            i + 1 < chars.len() && prev.is_uppercase() && cur.is_uppercase() && chars[i + 1].is_lowercase();

        if lower_to_upper || acronym_boundary {
            parts.push(chars[start..i].iter().collect::<String>());
            start = i;
        }
    }
    parts.push(chars[start..].iter().collect::<String>());
    parts.retain(|p| !p.is_empty());
    parts
}

/// 64-bit FNV-1a. No external crate: the algorithm is ten lines and no
/// `fnv` dependency appears anywhere in the retrieval pack.
fn fnv64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vecmath::{cosine_similarity, l2_norm};

    #[tokio::test]
    async fn empty_input_is_zero_vector() {
        let e = StaticEmbedder::new_256();
        let v = e.embed("   ").await.unwrap();
        assert_eq!(v.len(), 256);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn nonempty_input_is_unit_vector() {
        let e = StaticEmbedder::new_768();
        let v = e.embed("func add(a, b) { return a + b }").await.unwrap();
        assert_eq!(v.len(), 768);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn deterministic_across_instances() {
        let a = StaticEmbedder::new_256();
        let b = StaticEmbedder::new_256();
        let text = "class UserRepository { findById(id) {} }";
        assert_eq!(a.embed(text).await.unwrap(), b.embed(text).await.unwrap());
    }

    #[tokio::test]
    async fn batch_empty_list_is_empty() {
        let e = StaticEmbedder::new_256();
        let out = e.batch_embed(&[]).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn similarity_ordering_matches_semantics() {
        let e = StaticEmbedder::new_256();
        let add1 = e.embed("func add(a,b) return a+b").await.unwrap();
        let add2 = e.embed("func sum(x,y) return x+y").await.unwrap();
        let unrelated = e
            .embed("class UserRepository { findById() }")
            .await
            .unwrap();

        assert!(cosine_similarity(&add1, &add2) > cosine_similarity(&add1, &unrelated));
    }

    #[tokio::test]
    async fn double_close_is_a_no_op() {
        let e = StaticEmbedder::new_256();
        e.close().await.unwrap();
        assert!(e.close().await.is_ok());
        assert!(e.embed("x").await.is_err());
    }

    #[test]
    fn camel_case_split_handles_acronyms() {
        assert_eq!(split_camel_case("HTTPServer"), vec!["HTTP", "Server"]);
        assert_eq!(split_camel_case("getUserId"), vec!["get", "User", "Id"]);
        assert_eq!(split_camel_case("simple"), vec!["simple"]);
    }

    #[test]
    fn identifier_tokens_split_snake_and_camel() {
        let tokens = identifier_tokens("parse_HTTPResponse bodyText");
        assert_eq!(tokens, vec!["parse", "HTTP", "Response", "body", "Text"]);
    }
}
