//! OData MCP Library
//!
//! Model Context Protocol server and protocol client for OData services.
//! Supports both OData v2 (SAP Gateway style) and OData v4.

pub mod config;
pub mod mcp;
pub mod odata;

pub use config::{Config, RuntimeConfig};
pub use odata::{ClientSession, ODataClient, ODataError, QueryOptions, ResponseEnvelope};
