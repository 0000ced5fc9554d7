//! Content-retrieval backend: web search and page extraction through an
//! MCP-style tool server.

pub mod client;
pub mod types;

pub use client::{default_tools, McpClient, RetrievalClient, RetrievalError};
pub use types::{ExtractedContent, SearchResponse, SourceRecord};
