//! MCP surface: tool dispatch, resources, and the
//! `rmcp::ServerHandler` bridge tying them to the JSON-RPC stdio
//! transport.

pub mod resources;
pub mod server;
pub mod tools;

pub use server::McpToolServer;
pub use tools::ToolContext;
