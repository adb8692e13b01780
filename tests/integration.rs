//! End-to-end MCP tool dispatch against an in-process search engine and
//! the static hash embedder, exercising the same `ToolContext` ->
//! `mcp::tools::dispatch` path the stdio server drives.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use codesift_mcp::embedding::static_embedder::StaticEmbedder;
use codesift_mcp::errors::CoreError;
use codesift_mcp::mcp::tools::{self, ToolContext, TOOL_INDEX_STATUS, TOOL_SEARCH, TOOL_SEARCH_CODE, TOOL_SEARCH_DOCS};
use codesift_mcp::metrics::QueryMetrics;
use codesift_mcp::progress::ProgressTracker;
use codesift_mcp::project::{ProjectInfo, ProjectType};
use codesift_mcp::search_engine::{SearchChunk, SearchEngine, SearchFilter, SearchOptions};

struct FixtureEngine {
    chunks: Vec<SearchChunk>,
    ready: bool,
}

impl FixtureEngine {
    fn ready(chunks: Vec<SearchChunk>) -> Self {
        Self { chunks, ready: true }
    }

    fn not_ready() -> Self {
        Self {
            chunks: Vec::new(),
            ready: false,
        }
    }
}

#[async_trait]
impl SearchEngine for FixtureEngine {
    async fn search(&self, _query: &str, options: &SearchOptions) -> Result<Vec<SearchChunk>, CoreError> {
        if !self.ready {
            return Err(CoreError::index_not_found("index not ready"));
        }
        let mut results: Vec<SearchChunk> = self
            .chunks
            .iter()
            .filter(|c| match options.filter {
                SearchFilter::All => true,
                SearchFilter::Code => c.language.as_deref() != Some("markdown"),
                SearchFilter::Docs => c.language.as_deref() == Some("markdown"),
            })
            .filter(|c| match options.language.as_deref() {
                Some(lang) => c.language.as_deref() == Some(lang),
                None => true,
            })
            .cloned()
            .collect();
        results.truncate(options.limit);
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

fn code_chunk() -> SearchChunk {
    SearchChunk {
        path: "src/parser.rs".to_string(),
        language: Some("rust".to_string()),
        start_line: 10,
        end_line: 24,
        raw_content: None,
        content: "fn parse_tokens(input: &str) -> Vec<Token> { /* ... */ }".to_string(),
        score: 0.87,
        symbol_name: Some("parse_tokens".to_string()),
        symbol_type: Some("function".to_string()),
        signature: Some("fn parse_tokens(input: &str) -> Vec<Token>".to_string()),
        doc_comment_first_line: Some("Splits input into tokens.".to_string()),
        matched_terms: vec!["parse".to_string(), "tokens".to_string()],
        in_both_lists: true,
    }
}

fn doc_chunk() -> SearchChunk {
    SearchChunk {
        path: "README.md".to_string(),
        language: Some("markdown".to_string()),
        start_line: 1,
        end_line: 3,
        raw_content: None,
        content: "# Parsing\n\nHow the tokenizer works.".to_string(),
        score: 0.5,
        symbol_name: None,
        symbol_type: None,
        signature: None,
        doc_comment_first_line: None,
        matched_terms: vec!["parsing".to_string()],
        in_both_lists: false,
    }
}

fn context(engine: Arc<dyn SearchEngine>) -> Arc<ToolContext> {
    Arc::new(ToolContext {
        engine,
        embedder: Arc::new(StaticEmbedder::new_256()),
        metrics: Arc::new(QueryMetrics::new(Duration::from_secs(60))),
        progress: Arc::new(ProgressTracker::new()),
        project: ProjectInfo {
            name: "fixture-project".to_string(),
            project_type: ProjectType::Unknown,
        },
    })
}

#[tokio::test]
async fn search_returns_formatted_results() {
    let ctx = context(Arc::new(FixtureEngine::ready(vec![code_chunk(), doc_chunk()])));
    let result = tools::dispatch(&ctx, TOOL_SEARCH, &json!({ "query": "parse tokens" }))
        .await
        .unwrap();

    let results = result["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["file_path"], "src/parser.rs");
    assert_eq!(ctx.metrics.snapshot().total_queries, 1);
}

#[tokio::test]
async fn search_code_forces_code_filter() {
    let ctx = context(Arc::new(FixtureEngine::ready(vec![code_chunk(), doc_chunk()])));
    let result = tools::dispatch(&ctx, TOOL_SEARCH_CODE, &json!({ "query": "parse" }))
        .await
        .unwrap();
    let results = result["results"].as_array().unwrap();
    assert!(results.iter().all(|r| r["file_path"] != "README.md"));
}

#[tokio::test]
async fn search_docs_forces_docs_filter() {
    let ctx = context(Arc::new(FixtureEngine::ready(vec![code_chunk(), doc_chunk()])));
    let result = tools::dispatch(&ctx, TOOL_SEARCH_DOCS, &json!({ "query": "parsing" }))
        .await
        .unwrap();
    let results = result["results"].as_array().unwrap();
    assert!(results.iter().all(|r| r["file_path"] != "src/parser.rs"));
}

#[tokio::test]
async fn missing_query_is_invalid_params() {
    let ctx = context(Arc::new(FixtureEngine::ready(vec![])));
    let err = tools::dispatch(&ctx, TOOL_SEARCH, &json!({})).await.unwrap_err();
    assert_eq!(err.jsonrpc_code(), -32602);
}

#[tokio::test]
async fn search_against_unready_index_reports_index_not_found() {
    let ctx = context(Arc::new(FixtureEngine::not_ready()));
    let err = tools::dispatch(&ctx, TOOL_SEARCH, &json!({ "query": "anything" }))
        .await
        .unwrap_err();
    assert_eq!(err.jsonrpc_code(), -32001);
}

#[tokio::test]
async fn index_status_reports_idle_status_and_capability() {
    let ctx = context(Arc::new(FixtureEngine::ready(vec![code_chunk()])));
    let result = tools::dispatch(&ctx, TOOL_INDEX_STATUS, &json!({})).await.unwrap();
    assert_eq!(result["status"], "idle");
    assert_eq!(result["project_name"], "fixture-project");
    assert!(result.get("actual_provider").is_some());
    assert!(result.get("actual_model").is_some());
}

#[tokio::test]
async fn unknown_tool_is_method_not_found() {
    let ctx = context(Arc::new(FixtureEngine::ready(vec![])));
    let err = tools::dispatch(&ctx, "not_a_real_tool", &json!({})).await.unwrap_err();
    assert_eq!(err.jsonrpc_code(), -32601);
}

#[tokio::test]
async fn repeated_identical_query_is_flagged_in_metrics() {
    let ctx = context(Arc::new(FixtureEngine::ready(vec![code_chunk()])));
    tools::dispatch(&ctx, TOOL_SEARCH, &json!({ "query": "parse tokens" }))
        .await
        .unwrap();
    tools::dispatch(&ctx, TOOL_SEARCH, &json!({ "query": "parse tokens" }))
        .await
        .unwrap();

    let snapshot = ctx.metrics.snapshot();
    assert_eq!(snapshot.total_queries, 2);
    assert_eq!(snapshot.exact_repeat_count, 1);
}
