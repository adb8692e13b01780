//! Tool dispatch: `search`, `search_code`, `search_docs`,
//! and `index_status`, sharing one validate-execute-format body. Built
//! around an `execute(params, ctx) -> Result<Value>` seam, as a fixed,
//! small dispatch table rather than a registry of heterogeneous,
//! script-extensible tools.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::embedding::Embedder;
use crate::errors::CoreError;
use crate::metrics::{QueryEvent, QueryMetrics, QueryType};
use crate::progress::{IndexStatus, ProgressTracker};
use crate::project::ProjectInfo;
use crate::search_engine::{SearchChunk, SearchEngine, SearchFilter, SearchOptions};

pub const TOOL_SEARCH: &str = "search";
pub const TOOL_SEARCH_CODE: &str = "search_code";
pub const TOOL_SEARCH_DOCS: &str = "search_docs";
pub const TOOL_INDEX_STATUS: &str = "index_status";

const DEFAULT_LIMIT: usize = 10;
const MIN_LIMIT: usize = 1;
const MAX_LIMIT: usize = 50;

/// Shared dependencies every tool call can reach.
pub struct ToolContext {
    pub engine: Arc<dyn SearchEngine>,
    pub embedder: Arc<dyn Embedder>,
    pub metrics: Arc<QueryMetrics>,
    pub progress: Arc<ProgressTracker>,
    /// Detected once at startup from the workspace root; never
    /// re-probed per request.
    pub project: ProjectInfo,
}

/// Static descriptors for the fixed tool surface, consumed by
/// `mcp/server.rs::list_tools`.
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: TOOL_SEARCH,
            description: "Search the indexed codebase and documentation by natural-language or keyword query.",
            input_schema: search_schema(SchemaKind::Generic),
        },
        ToolDescriptor {
            name: TOOL_SEARCH_CODE,
            description: "Search only source code chunks, optionally filtered by language or symbol type.",
            input_schema: search_schema(SchemaKind::Code),
        },
        ToolDescriptor {
            name: TOOL_SEARCH_DOCS,
            description: "Search only documentation and prose chunks (README, comments, markdown).",
            input_schema: search_schema(SchemaKind::Docs),
        },
        ToolDescriptor {
            name: TOOL_INDEX_STATUS,
            description: "Report the current indexing run's status, stage, progress, and active embedder capability.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

enum SchemaKind {
    Generic,
    Code,
    Docs,
}

fn search_schema(kind: SchemaKind) -> Value {
    let mut properties = json!({
        "query": { "type": "string", "description": "Search query text" },
        "limit": { "type": "integer", "description": "Max results (1-50, default 10; <=0 becomes default)" },
        "scope": {
            "type": "array",
            "items": { "type": "string" },
            "description": "Path prefixes to restrict the search to"
        }
    });
    match kind {
        SchemaKind::Generic => {
            properties["filter"] = json!({
                "type": "string",
                "enum": ["all", "code", "docs"],
                "description": "Restrict to code chunks, doc chunks, or both (default all)"
            });
            properties["language"] = json!({ "type": "string", "description": "Restrict to a source language" });
        }
        SchemaKind::Code => {
            properties["language"] = json!({ "type": "string", "description": "Restrict to a source language" });
            properties["symbol_type"] = json!({
                "type": "string",
                "enum": ["function", "class", "interface", "type", "method", "any"],
                "description": "Restrict to a symbol kind"
            });
        }
        SchemaKind::Docs => {}
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["query"]
    })
}

/// Run one tool call by name, returning the formatted result or a
/// [`CoreError`] with a JSON-RPC-mappable code.
pub async fn dispatch(ctx: &ToolContext, name: &str, params: &Value) -> Result<Value, CoreError> {
    match name {
        TOOL_SEARCH => run_search(ctx, TOOL_SEARCH, params, SearchFilter::All).await,
        TOOL_SEARCH_CODE => run_search(ctx, TOOL_SEARCH_CODE, params, SearchFilter::Code).await,
        TOOL_SEARCH_DOCS => run_search(ctx, TOOL_SEARCH_DOCS, params, SearchFilter::Docs).await,
        TOOL_INDEX_STATUS => index_status(ctx).await,
        other => Err(CoreError::method_not_found(format!("no such tool: {other}"))),
    }
}

fn parse_query(params: &Value) -> Result<String, CoreError> {
    let query = params
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CoreError::invalid_params("'query' is required and must be a string"))?;
    if query.trim().is_empty() {
        return Err(CoreError::invalid_params("'query' must not be empty"));
    }
    Ok(query.to_string())
}

/// `limit` clamping: values ≤0 become the default; above
/// the max, clamp to the max; below the min, clamp to the min.
fn parse_limit(params: &Value) -> Result<usize, CoreError> {
    match params.get("limit") {
        None | Some(Value::Null) => Ok(DEFAULT_LIMIT),
        Some(v) => {
            let n = v
                .as_i64()
                .ok_or_else(|| CoreError::invalid_params("'limit' must be an integer"))?;
            if n <= 0 {
                Ok(DEFAULT_LIMIT)
            } else {
                Ok((n as usize).clamp(MIN_LIMIT, MAX_LIMIT))
            }
        }
    }
}

fn parse_options(params: &Value, forced_filter: SearchFilter) -> Result<SearchOptions, CoreError> {
    let scope = params
        .get("scope")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    // `search_code`/`search_docs` always force their filter; only the
    // generic `search` tool honors an explicit `filter` argument.
    let filter = if forced_filter == SearchFilter::All {
        match params.get("filter").and_then(|v| v.as_str()) {
            Some(s) => SearchFilter::parse(s)
                .ok_or_else(|| CoreError::invalid_params(format!("invalid 'filter': {s}")))?,
            None => SearchFilter::All,
        }
    } else {
        forced_filter
    };

    Ok(SearchOptions {
        limit: parse_limit(params)?,
        filter,
        language: params
            .get("language")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        symbol_type: params
            .get("symbol_type")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        scope,
    })
}

async fn run_search(
    ctx: &ToolContext,
    tool_name: &str,
    params: &Value,
    forced_filter: SearchFilter,
) -> Result<Value, CoreError> {
    let query = parse_query(params)?;
    let options = parse_options(params, forced_filter)?;

    let progress = ctx.progress.snapshot();
    if progress.status == IndexStatus::Running {
        return Ok(indexing_notice(&progress));
    }

    if !ctx.engine.is_ready().await {
        return Err(CoreError::index_not_found(
            "index is not ready yet; call index_status to check progress",
        ));
    }

    let started = Instant::now();
    let chunks = ctx.engine.search(&query, &options).await?;
    let latency = started.elapsed();

    let query_embedding = ctx.embedder.embed(&query).await.ok();

    // Repetition checks read prior state, so they must run
    // before `record` inserts this query's own fingerprint/embedding.
    ctx.metrics.is_repeated(&query);
    if let Some(embedding) = &query_embedding {
        ctx.metrics.has_similar_recent_query(embedding);
    }

    ctx.metrics.record(&QueryEvent {
        tool: tool_name.to_string(),
        query: query.clone(),
        query_type: classify_query_type(&chunks, query_embedding.is_some()),
        result_count: chunks.len(),
        latency,
        query_embedding,
    });

    Ok(format_results(&query, &chunks))
}

/// Classifies how the hybrid engine actually answered a query, independent
/// of which MCP tool was called. A chunk appearing in both the lexical and
/// vector result lists (`in_both_lists`) is the engine's own signal that
/// the query was answered by both retrieval paths; short of that, the
/// presence of matched lexical terms vs. a usable query embedding decides
/// the call.
fn classify_query_type(chunks: &[SearchChunk], had_embedding: bool) -> QueryType {
    if chunks.iter().any(|c| c.in_both_lists) {
        return QueryType::Mixed;
    }
    let any_lexical_match = chunks.iter().any(|c| !c.matched_terms.is_empty());
    match (any_lexical_match, had_embedding) {
        (true, true) => QueryType::Mixed,
        (true, false) => QueryType::Lexical,
        (false, true) => QueryType::Semantic,
        (false, false) => QueryType::Lexical,
    }
}

/// Markdown notice returned in place of a search while an index run is
/// in progress. The
/// engine is never called in this path.
fn indexing_notice(progress: &crate::progress::IndexProgress) -> Value {
    let markdown = format!(
        "**Indexing in Progress**\n\n\
         Stage: {:?}\n\
         Progress: {:.1}% ({} / {} files)\n",
        progress.stage,
        progress.progress_pct(),
        crate::progress::format_number(progress.files_processed as u64),
        crate::progress::format_number(progress.files_total as u64),
    );
    json!({
        "result_count": 0,
        "results": [],
        "markdown": markdown,
        "indexing": true,
    })
}

fn format_results(query: &str, chunks: &[SearchChunk]) -> Value {
    let markdown = render_markdown(query, chunks);
    json!({
        "query": query,
        "result_count": chunks.len(),
        "results": chunks.iter().map(chunk_to_json).collect::<Vec<_>>(),
        "markdown": markdown,
    })
}

fn chunk_to_json(chunk: &SearchChunk) -> Value {
    json!({
        "file_path": chunk.path,
        "content": chunk.content,
        "score": chunk.score,
        "language": chunk.language,
        "matched_terms": chunk.matched_terms,
        "in_both_lists": chunk.in_both_lists,
        "symbol": chunk.symbol_name,
        "symbol_type": chunk.symbol_type,
        "signature": chunk.signature,
        "match_reason": chunk.match_reason(),
    })
}

/// Renders the Markdown half of a search result: header line, optional symbols line, then a fenced body
/// (or an inlined, unfenced body for markdown docs, separated by a
/// horizontal rule).
fn render_markdown(query: &str, chunks: &[SearchChunk]) -> String {
    if chunks.is_empty() {
        return format!("No results for \"{query}\".");
    }
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        out.push_str(&format!(
            "{}. {}:{}-{} (score: {:.2})\n",
            i + 1,
            chunk.path,
            chunk.start_line,
            chunk.end_line,
            chunk.score
        ));
        if let Some(symbol) = &chunk.symbol_name {
            out.push_str(&format!("`{symbol}`\n"));
        }
        if chunk.is_markdown() {
            out.push_str("\n---\n\n");
            out.push_str(chunk.body());
            out.push_str("\n\n---\n\n");
        } else {
            out.push_str(&format!(
                "```{}\n{}\n```\n\n",
                chunk.language_hint(),
                chunk.body()
            ));
        }
    }
    out
}

/// `index_status`: project/progress snapshot plus a live
/// capability advertisement sourced from the active embedder, never
/// from user config.
async fn index_status(ctx: &ToolContext) -> Result<Value, CoreError> {
    let snapshot = ctx.progress.snapshot();
    let capability = ctx.embedder.capability().await;

    Ok(json!({
        "project_name": ctx.project.name,
        "project_type": format!("{:?}", ctx.project.project_type).to_lowercase(),
        "status": snapshot.status,
        "stage": snapshot.stage,
        "files_total": snapshot.files_total,
        "files_processed": snapshot.files_processed,
        "chunks_indexed": snapshot.chunks_indexed,
        "progress_pct": snapshot.progress_pct(),
        "elapsed_seconds": snapshot.elapsed_seconds(),
        "error_message": snapshot.error_message,
        "actual_provider": capability.provider,
        "actual_model": capability.model,
        "dimensions": capability.dimensions,
        "is_fallback_active": capability.fallback_active,
        "semantic_quality": capability.semantic_quality,
    }))
}
