//! Search engine seam. [`SearchEngine`] is the async-trait boundary the MCP tool
//! layer dispatches through; [`SearchChunk`] is the shared result shape.

use async_trait::async_trait;

use crate::errors::CoreError;

/// Which subset of the index a search call is restricted to. `search_code` always applies `Code`;
/// `search_docs` always applies `Docs`; the generic `search` tool takes
/// it as an explicit argument, defaulting to `All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFilter {
    All,
    Code,
    Docs,
}

impl SearchFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(SearchFilter::All),
            "code" => Some(SearchFilter::Code),
            "docs" => Some(SearchFilter::Docs),
            _ => None,
        }
    }
}

/// One matched chunk of source, the unit the `search`/`search_code`/
/// `search_docs` tools return.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchChunk {
    pub path: String,
    pub language: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    /// Raw, unprocessed source text for this chunk, when the engine
    /// kept it. Preferred over `content` for body rendering.
    pub raw_content: Option<String>,
    /// Processed content (e.g. with doc-comments already extracted),
    /// used for body rendering when `raw_content` is absent, and always
    /// used for the structured `content` field.
    pub content: String,
    pub score: f32,
    pub symbol_name: Option<String>,
    pub symbol_type: Option<String>,
    pub signature: Option<String>,
    /// First line of the symbol's doc comment, if any, used (truncated)
    /// in `match_reason`.
    pub doc_comment_first_line: Option<String>,
    pub matched_terms: Vec<String>,
    /// Whether this chunk was found by both the lexical and vector
    /// retrieval passes.
    pub in_both_lists: bool,
}

const MATCH_REASON_MAX_TERMS: usize = 5;
const DOC_COMMENT_TRUNCATE_AT: usize = 80;

impl SearchChunk {
    /// Body text to render in the fenced/unfenced block: raw content
    /// when present, else processed content.
    pub fn body(&self) -> &str {
        self.raw_content.as_deref().unwrap_or(&self.content)
    }

    /// Language hint for the fenced block, or `text` if unknown.
    pub fn language_hint(&self) -> &str {
        self.language.as_deref().unwrap_or("text")
    }

    pub fn is_markdown(&self) -> bool {
        matches!(self.language.as_deref(), Some("markdown") | Some("md"))
    }

    /// Human-readable reason this chunk matched: primary symbol, a truncated doc-comment first
    /// line, up to five matched terms, and a both-lists indicator.
    pub fn match_reason(&self) -> String {
        let mut parts = Vec::new();

        if let (Some(ty), Some(name)) = (&self.symbol_type, &self.symbol_name) {
            parts.push(format!("{ty} '{name}'"));
        }

        if let Some(doc) = &self.doc_comment_first_line {
            let trimmed = doc.trim();
            if !trimmed.is_empty() {
                if trimmed.len() > DOC_COMMENT_TRUNCATE_AT {
                    parts.push(format!("{}…", &trimmed[..DOC_COMMENT_TRUNCATE_AT]));
                } else {
                    parts.push(trimmed.to_string());
                }
            }
        }

        if !self.matched_terms.is_empty() {
            let terms: Vec<&str> = self
                .matched_terms
                .iter()
                .take(MATCH_REASON_MAX_TERMS)
                .map(String::as_str)
                .collect();
            parts.push(format!("matched: {}", terms.join(", ")));
        }

        if self.in_both_lists {
            parts.push("found in both lexical and semantic results".to_string());
        }

        if parts.is_empty() {
            "semantic similarity".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// Narrowing filters for a search call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub filter: SearchFilter,
    pub language: Option<String>,
    pub symbol_type: Option<String>,
    /// Path-prefix scope to restrict the search to (e.g. `src/`, `docs/`).
    pub scope: Vec<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            filter: SearchFilter::All,
            language: None,
            symbol_type: None,
            scope: Vec::new(),
        }
    }
}

/// The indexing/retrieval collaborator this crate's MCP tools dispatch
/// through. Intentionally thin: storage, chunking, and ranking are out
/// of scope for this crate.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchChunk>, CoreError>;

    /// Whether the engine currently has an up-to-date index to search.
    async fn is_ready(&self) -> bool;

    /// Relative paths of every file currently in the index, used to
    /// register `file://` resources.
    /// Empty when the engine isn't ready yet.
    async fn indexed_paths(&self) -> Vec<String>;
}

/// Always-not-ready engine used as the binary's default wiring when no
/// indexing backend has been connected yet. Every search reports
/// `index_not_found` the same way a real engine would before its first
/// sync, rather than panicking or returning fabricated results.
pub struct NullSearchEngine;

#[async_trait]
impl SearchEngine for NullSearchEngine {
    async fn search(&self, _query: &str, _options: &SearchOptions) -> Result<Vec<SearchChunk>, CoreError> {
        Err(CoreError::index_not_found("no search engine configured"))
    }

    async fn is_ready(&self) -> bool {
        false
    }

    async fn indexed_paths(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// In-memory fake used by MCP dispatch tests.
    pub struct FakeSearchEngine {
        pub chunks: Vec<SearchChunk>,
        pub ready: bool,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeSearchEngine {
        pub fn new(chunks: Vec<SearchChunk>) -> Self {
            Self {
                chunks,
                ready: true,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn not_ready() -> Self {
            Self {
                chunks: Vec::new(),
                ready: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SearchEngine for FakeSearchEngine {
        async fn search(
            &self,
            query: &str,
            options: &SearchOptions,
        ) -> Result<Vec<SearchChunk>, CoreError> {
            self.calls.lock().unwrap().push(query.to_string());
            if !self.ready {
                return Err(CoreError::index_not_found("index not ready"));
            }
            let mut results: Vec<SearchChunk> = self
                .chunks
                .iter()
                .filter(|c| {
                    options
                        .language
                        .as_ref()
                        .map(|l| c.language.as_deref() == Some(l.as_str()))
                        .unwrap_or(true)
                })
                .cloned()
                .collect();
            if options.limit > 0 {
                results.truncate(options.limit);
            }
            Ok(results)
        }

        async fn is_ready(&self) -> bool {
            self.ready
        }

        async fn indexed_paths(&self) -> Vec<String> {
            if !self.ready {
                return Vec::new();
            }
            self.chunks.iter().map(|c| c.path.clone()).collect()
        }
    }

    pub fn sample_chunk() -> SearchChunk {
        SearchChunk {
            path: "src/lib.rs".to_string(),
            language: Some("rust".to_string()),
            start_line: 1,
            end_line: 5,
            raw_content: None,
            content: "fn add(a: i32, b: i32) -> i32 { a + b }".to_string(),
            score: 0.92,
            symbol_name: Some("add".to_string()),
            symbol_type: Some("function".to_string()),
            signature: Some("fn add(a: i32, b: i32) -> i32".to_string()),
            doc_comment_first_line: Some("Adds two integers.".to_string()),
            matched_terms: vec!["add".to_string()],
            in_both_lists: false,
        }
    }
}
