//! MCP Server implementation for OData
//!
//! Exposes OData client operations as MCP tools over JSON-RPC

pub mod protocol;
mod server;

pub use protocol::*;
pub use server::ODataMcpServer;
