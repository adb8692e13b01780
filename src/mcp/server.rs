//! MCP JSON-RPC bridge: adapts the tool dispatch table
//! and resource surface in this module to `rmcp`'s `ServerHandler`.
//! Served over stdio rather than Streamable HTTP — stdout carries only
//! the JSON-RPC stream, all logging goes to stderr.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};

use super::resources::{self, RESOURCE_QUERY_METRICS};
use super::tools::{self, ToolContext};
use crate::errors::CoreError;
use crate::mime;

/// Bridges this crate's fixed tool/resource surface to the MCP protocol.
/// Cloned per session; everything reachable from it is `Arc`-wrapped so
/// sessions share the same underlying search engine, metrics, and
/// progress tracker.
#[derive(Clone)]
pub struct McpToolServer {
    ctx: Arc<ToolContext>,
    workspace_root: Arc<PathBuf>,
}

impl McpToolServer {
    pub fn new(ctx: Arc<ToolContext>, workspace_root: PathBuf) -> Self {
        Self {
            ctx,
            workspace_root: Arc::new(workspace_root),
        }
    }

    fn to_mcp_tool(descriptor: &tools::ToolDescriptor) -> Tool {
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> = match &descriptor.input_schema {
            serde_json::Value::Object(map) => Arc::new(map.clone()),
            _ => Arc::new(serde_json::Map::new()),
        };

        Tool {
            name: Cow::Borrowed(descriptor.name),
            title: None,
            description: Some(Cow::Borrowed(descriptor.description)),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for McpToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "codesift-mcp".to_string(),
                title: Some("Codesift".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Codesift — local code search over an embedding index. Use search, \
                 search_code, or search_docs to find relevant chunks, and index_status \
                 to check indexing progress. Read indexed files via file:// resources, \
                 and aggregate query stats via the query_metrics resource."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let descriptors = tools::descriptors();
        let mcp_tools: Vec<Tool> = descriptors.iter().map(Self::to_mcp_tool).collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(mcp_tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        tools::descriptors()
            .into_iter()
            .find(|d| d.name == name)
            .map(|d| Self::to_mcp_tool(&d))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match tools::dispatch(&self.ctx, &request.name, &params).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "[{}] {e}",
                e.jsonrpc_code()
            ))])),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let metrics_resource = Resource {
            raw: RawResource {
                uri: RESOURCE_QUERY_METRICS.to_string(),
                name: "query_metrics".to_string(),
                title: None,
                description: Some("Aggregated query counts, latency buckets, and top terms.".to_string()),
                mime_type: Some("application/json".to_string()),
                size: None,
                icons: None,
            },
            annotations: None,
        };

        let mut resources = vec![metrics_resource];
        for path in self.ctx.engine.indexed_paths().await {
            let mime_type = mime::resolve(&path).to_string();
            resources.push(Resource {
                raw: RawResource {
                    uri: resources::file_uri(&path),
                    name: path,
                    title: None,
                    description: None,
                    mime_type: Some(mime_type),
                    size: None,
                    icons: None,
                },
                annotations: None,
            });
        }

        Ok(ListResourcesResult::with_all_items(resources))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        if request.uri == RESOURCE_QUERY_METRICS {
            let value = resources::query_metrics_resource(&self.ctx.metrics);
            let text = serde_json::to_string_pretty(&value).unwrap_or_default();
            return Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(text, request.uri.clone())],
            });
        }

        if let Some(relative) = request.uri.strip_prefix("file://") {
            let indexed = self.ctx.engine.indexed_paths().await;
            if !indexed.iter().any(|p| p == relative) {
                let err = CoreError::file_not_found(format!("not an indexed file: {relative}"));
                return Err(McpError::new(ErrorCode(err.jsonrpc_code() as i32), err.to_string(), None));
            }

            let content = resources::read_file_resource(&self.workspace_root, &request.uri)
                .map_err(|e| McpError::new(ErrorCode(e.jsonrpc_code() as i32), e.to_string(), None))?;
            return Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(content, request.uri.clone())],
            });
        }

        Err(McpError::new(
            ErrorCode::RESOURCE_NOT_FOUND,
            format!("no such resource: {}", request.uri),
            None,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::test_support::CountingEmbedder;
    use crate::metrics::QueryMetrics;
    use crate::progress::ProgressTracker;
    use crate::project::{ProjectInfo, ProjectType};
    use crate::search_engine::test_support::FakeSearchEngine;
    use std::time::Duration;

    fn server() -> McpToolServer {
        let ctx = Arc::new(ToolContext {
            engine: Arc::new(FakeSearchEngine::new(vec![])),
            embedder: Arc::new(CountingEmbedder::new(8)),
            metrics: Arc::new(QueryMetrics::new(Duration::from_secs(60))),
            progress: Arc::new(ProgressTracker::new()),
            project: ProjectInfo {
                name: "fixture-project".to_string(),
                project_type: ProjectType::Unknown,
            },
        });
        McpToolServer::new(ctx, std::env::temp_dir())
    }

    #[test]
    fn get_tool_finds_known_tool() {
        let server = server();
        assert!(server.get_tool(tools::TOOL_SEARCH).is_some());
        assert!(server.get_tool("nonexistent").is_none());
    }

    #[test]
    fn server_info_advertises_tools_and_resources() {
        let info = server().get_info();
        assert_eq!(info.server_info.name, "codesift-mcp");
    }
}
